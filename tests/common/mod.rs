// tests/common/mod.rs

//! Shared fixtures: on-disk Yum repositories small enough to read in a
//! test failure, built through the public digest API so checksums are
//! always consistent with the payloads.

use repotag::DigestAlgorithm;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mutating orchestrator actions take the process-wide repo lock;
/// integration tests that use them must not overlap.
pub static SERIAL: Mutex<()> = Mutex::new(());

/// Write a complete arch directory: packages, plain-XML primary, and a
/// repomd.xml that references it.
pub fn write_yum_fixture(arch_dir: &Path, packages: &[(&str, &str, &[u8])]) {
    let repodata = arch_dir.join("repodata");
    fs::create_dir_all(&repodata).unwrap();

    let mut entries = String::new();
    for (name, location, contents) in packages {
        let digest = {
            let mut cursor = std::io::Cursor::new(contents);
            DigestAlgorithm::Sha256.digest_reader(&mut cursor).unwrap()
        };
        entries.push_str(&format!(
            r#"  <package type="rpm">
    <name>{name}</name>
    <checksum type="sha256" pkgid="YES">{digest}</checksum>
    <size package="{}" installed="0" archive="0"/>
    <location href="{location}"/>
  </package>
"#,
            contents.len()
        ));
        let path = arch_dir.join(location);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    let primary = format!(
        "<?xml version=\"1.0\"?>\n<metadata packages=\"{}\">\n{entries}</metadata>\n",
        packages.len()
    );
    let primary_path = repodata.join("primary.xml");
    fs::write(&primary_path, &primary).unwrap();

    let digest = DigestAlgorithm::Sha256.digest_file(&primary_path).unwrap();
    fs::write(
        repodata.join("repomd.xml"),
        format!(
            r#"<?xml version="1.0"?>
<repomd>
  <data type="primary">
    <checksum type="sha256">{digest}</checksum>
    <location href="repodata/primary.xml"/>
    <size>{}</size>
  </data>
</repomd>
"#,
            primary.len()
        ),
    )
    .unwrap();
}

/// Write a config file next to the data dir and return its path.
pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("repotag.toml");
    fs::write(&path, body).unwrap();
    path
}
