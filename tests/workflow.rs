// tests/workflow.rs

//! End-to-end scenarios driven through the orchestrator, over on-disk
//! fixtures. No network: everything here exercises the planning, clean,
//! tag, diff, and list paths against repositories laid out the way a
//! completed mirror run leaves them.

mod common;

use common::{write_yum_fixture, SERIAL};
use repotag::{validate_file, ActionOptions, Check, Config, Orchestrator, HEAD_TAG};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tempfile::TempDir;

fn orchestrator(data_dir: &Path, extra: &str) -> Orchestrator {
    let toml = format!(
        "data_dir = \"{}\"\n{extra}\n\
         [repo.centos-base]\ntype = \"yum\"\nlocal = \"centos-base\"\narch = \"x86_64\"\n",
        data_dir.display()
    );
    Orchestrator::new(Config::from_toml(&toml).unwrap())
}

#[test]
fn test_clean_after_upstream_drop() {
    let _serial = SERIAL.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let head = dir.path().join("head/centos-base/x86_64");

    // The mirrored state still holds bar, but upstream's new primary no
    // longer references it.
    write_yum_fixture(&head, &[("foo", "Packages/foo-1.0.rpm", b"foo bytes")]);
    fs::write(head.join("Packages/bar-2.0.rpm"), b"dropped upstream").unwrap();

    let orch = orchestrator(dir.path(), "");
    orch.clean("centos-base", false, &ActionOptions::default())
        .unwrap();

    assert!(head.join("Packages/foo-1.0.rpm").exists());
    assert!(head.join("repodata/repomd.xml").exists());
    assert!(!head.join("Packages/bar-2.0.rpm").exists());
}

#[test]
fn test_resumed_mirror_revalidation() {
    let dir = TempDir::new().unwrap();
    let head = dir.path().join("head/centos-base/x86_64");
    write_yum_fixture(
        &head,
        &[
            ("foo", "Packages/foo-1.0.rpm", &[0u8; 100]),
            ("bar", "Packages/bar-2.0.rpm", &[0u8; 200]),
        ],
    );

    // Truncate bar the way an interrupted download would.
    let bar = head.join("Packages/bar-2.0.rpm");
    fs::write(&bar, &[0u8; 50]).unwrap();

    // The size predicate the planner uses: foo is up to date and would be
    // skipped, bar fails and would be re-fetched.
    assert!(validate_file(
        &head.join("Packages/foo-1.0.rpm"),
        &Check::Size(100)
    ));
    assert!(!validate_file(&bar, &Check::Size(200)));
}

#[test]
fn test_tag_and_promote() {
    let _serial = SERIAL.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let head = dir.path().join("head/centos-base");
    write_yum_fixture(
        &head.join("x86_64"),
        &[("foo", "Packages/foo-1.0.rpm", b"foo bytes")],
    );

    let orch = orchestrator(dir.path(), "hard_tag_regex = \"^release-\"\n");

    // A plain promotion pointer becomes a symlink.
    orch.tag("centos-base", "prod", HEAD_TAG, true, &ActionOptions::default())
        .unwrap();
    let prod = dir.path().join("prod/centos-base");
    assert!(prod.symlink_metadata().unwrap().file_type().is_symlink());
    assert!(prod.join("x86_64/Packages/foo-1.0.rpm").exists());

    // The release pattern forces a hardlink snapshot despite --symlink.
    orch.tag(
        "centos-base",
        "release-1",
        HEAD_TAG,
        true,
        &ActionOptions::default(),
    )
    .unwrap();
    let release = dir.path().join("release-1/centos-base");
    assert!(!release.symlink_metadata().unwrap().file_type().is_symlink());

    let head_ino = fs::metadata(head.join("x86_64/Packages/foo-1.0.rpm"))
        .unwrap()
        .ino();
    let release_ino = fs::metadata(release.join("x86_64/Packages/foo-1.0.rpm"))
        .unwrap()
        .ino();
    assert_eq!(head_ino, release_ino);
}

#[test]
fn test_snapshot_survives_head_replacement() {
    let _serial = SERIAL.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let head = dir.path().join("head/centos-base");
    write_yum_fixture(
        &head.join("x86_64"),
        &[("foo", "Packages/foo-1.0.rpm", b"version one")],
    );

    let orch = orchestrator(dir.path(), "");
    orch.tag(
        "centos-base",
        "snap",
        HEAD_TAG,
        false,
        &ActionOptions::default(),
    )
    .unwrap();

    // A mirror run replaces head files by rename, never in place; the
    // snapshot keeps the old inode and bytes.
    let target = head.join("x86_64/Packages/foo-1.0.rpm");
    let tmp = target.with_extension("tmp");
    fs::write(&tmp, b"version two!").unwrap();
    fs::rename(&tmp, &target).unwrap();

    let snapped = dir
        .path()
        .join("snap/centos-base/x86_64/Packages/foo-1.0.rpm");
    assert_eq!(fs::read(&snapped).unwrap(), b"version one");
    assert_eq!(fs::read(&target).unwrap(), b"version two!");
}

#[test]
fn test_fan_out_regex_selects_matching_repos() {
    let _serial = SERIAL.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let toml = format!(
        "data_dir = \"{0}\"\n\n\
         [repo.rhel7-os]\ntype = \"yum\"\nlocal = \"rhel7-os\"\narch = \"x86_64\"\n\n\
         [repo.rhel8-os]\ntype = \"yum\"\nlocal = \"rhel8-os\"\narch = \"x86_64\"\n\n\
         [repo.debian-stable]\ntype = \"yum\"\nlocal = \"debian-stable\"\narch = \"amd64\"\n",
        dir.path().display()
    );
    let orch = Orchestrator::new(Config::from_toml(&toml).unwrap());

    for (repo, arch) in [
        ("rhel7-os", "x86_64"),
        ("rhel8-os", "x86_64"),
        ("debian-stable", "amd64"),
    ] {
        let arch_dir = dir.path().join("head").join(repo).join(arch);
        write_yum_fixture(&arch_dir, &[]);
        fs::write(arch_dir.join("stray.rpm"), b"stray").unwrap();
    }

    orch.clean("^rhel[0-9]+-os$", true, &ActionOptions::default())
        .unwrap();

    assert!(!dir.path().join("head/rhel7-os/x86_64/stray.rpm").exists());
    assert!(!dir.path().join("head/rhel8-os/x86_64/stray.rpm").exists());
    // Not matched by the pattern, so untouched.
    assert!(dir.path().join("head/debian-stable/amd64/stray.rpm").exists());
}

#[test]
fn test_diff_between_tags() {
    let dir = TempDir::new().unwrap();
    write_yum_fixture(
        &dir.path().join("head/centos-base/x86_64"),
        &[
            ("foo", "Packages/foo-1.0.rpm", b"foo"),
            ("bar", "Packages/bar-2.0.rpm", b"bar"),
        ],
    );
    write_yum_fixture(
        &dir.path().join("prod/centos-base/x86_64"),
        &[("foo", "Packages/foo-1.0.rpm", b"foo")],
    );

    let orch = orchestrator(dir.path(), "");
    let opts = ActionOptions::default();

    let diff = orch
        .diff("centos-base", "x86_64", "prod", HEAD_TAG, &opts)
        .unwrap();
    assert_eq!(diff.src_only, vec!["bar-2.0.rpm"]);
    assert!(diff.dest_only.is_empty());

    // Same tag on both sides is empty in both columns.
    let same = orch
        .diff("centos-base", "x86_64", HEAD_TAG, HEAD_TAG, &opts)
        .unwrap();
    assert!(same.src_only.is_empty() && same.dest_only.is_empty());
}

#[test]
fn test_list_tags_resolves_soft_tags() {
    let _serial = SERIAL.lock().unwrap();
    let dir = TempDir::new().unwrap();
    write_yum_fixture(
        &dir.path().join("head/centos-base/x86_64"),
        &[("foo", "Packages/foo-1.0.rpm", b"foo")],
    );

    let orch = orchestrator(dir.path(), "");
    let opts = ActionOptions::default();
    orch.tag("centos-base", "prod", HEAD_TAG, true, &opts).unwrap();
    orch.tag("centos-base", "release-1", HEAD_TAG, false, &opts)
        .unwrap();

    let listing = orch.list_tags("centos-base").unwrap();
    let tags: Vec<&str> = listing.tags.iter().map(|t| t.tag.as_str()).collect();
    assert_eq!(tags, vec!["head", "release-1"]);

    let head_entry = listing.tags.iter().find(|t| t.tag == "head").unwrap();
    assert_eq!(head_entry.soft, vec!["prod"]);
    let release_entry = listing.tags.iter().find(|t| t.tag == "release-1").unwrap();
    assert!(release_entry.soft.is_empty());
}

#[test]
fn test_list_repos_reports_mirrored_flag() {
    let dir = TempDir::new().unwrap();
    let toml = format!(
        "data_dir = \"{0}\"\n\n\
         [repo.upstream]\ntype = \"yum\"\nlocal = \"u\"\narch = \"x86_64\"\nurl = \"http://mirror/\"\n\n\
         [repo.scratch]\ntype = \"plain\"\nlocal = \"s\"\narch = \"x86_64\"\n",
        dir.path().display()
    );
    let orch = Orchestrator::new(Config::from_toml(&toml).unwrap());

    let repos = orch.list_repos();
    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0].name, "scratch");
    assert!(!repos[0].mirrored);
    assert_eq!(repos[1].name, "upstream");
    assert!(repos[1].mirrored);
}
