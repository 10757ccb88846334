// src/validate.rs

//! Local file validation by size or cryptographic digest
//!
//! Upstream metadata states either a byte count or a digest (or both) for
//! every file it references. Size checks are preferred when the checksums
//! flag is off and a size is available, since digesting large packages is
//! orders of magnitude slower.

use crate::error::{Error, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Digest algorithms seen in repository metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest an entire stream, returning lowercase hex.
    pub fn digest_reader<R: io::Read>(&self, reader: &mut R) -> io::Result<String> {
        match self {
            Self::Md5 => {
                let mut hasher = Md5::new();
                io::copy(reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                io::copy(reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            Self::Sha512 => {
                let mut hasher = Sha512::new();
                io::copy(reader, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
        }
    }

    /// Digest a file on disk.
    pub fn digest_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        self.digest_reader(&mut file)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // "sha" is the historic Yum spelling of SHA-1.
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha" | "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(Error::Parse(format!("unknown digest algorithm '{other}'"))),
        }
    }
}

/// The predicate a file must satisfy to be considered up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Exact byte count.
    Size(u64),
    /// Digest over the full contents, hex value lowercased.
    Digest {
        algorithm: DigestAlgorithm,
        value: String,
    },
}

/// Whether `path` exists and passes `check`.
///
/// Missing, unreadable, truncated, and corrupted files all return false;
/// the caller re-downloads rather than distinguishing the cases.
pub fn validate_file(path: &Path, check: &Check) -> bool {
    match check {
        Check::Size(expected) => match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                let ok = meta.len() == *expected;
                if !ok {
                    debug!(
                        "{}: size {} != expected {}",
                        path.display(),
                        meta.len(),
                        expected
                    );
                }
                ok
            }
            _ => false,
        },
        Check::Digest { algorithm, value } => match algorithm.digest_file(path) {
            Ok(actual) => {
                let ok = actual.eq_ignore_ascii_case(value);
                if !ok {
                    debug!(
                        "{}: {} {} != expected {}",
                        path.display(),
                        algorithm,
                        actual,
                        value
                    );
                }
                ok
            }
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256 of "hello world\n"
    const HELLO_SHA256: &str =
        "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";
    // md5 of "hello world\n"
    const HELLO_MD5: &str = "6f5902ac237024bdd0c176cb93063dc4";
    // sha1 of "hello world\n"
    const HELLO_SHA1: &str = "22596363b3de40b06f981fb85d82312e8c0ed511";

    fn hello_file() -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello world\n").unwrap();
        f
    }

    #[test]
    fn test_size_check() {
        let f = hello_file();
        assert!(validate_file(f.path(), &Check::Size(12)));
        assert!(!validate_file(f.path(), &Check::Size(11)));
    }

    #[test]
    fn test_digest_checks() {
        let f = hello_file();
        for (algo, hex) in [
            (DigestAlgorithm::Sha256, HELLO_SHA256),
            (DigestAlgorithm::Sha1, HELLO_SHA1),
            (DigestAlgorithm::Md5, HELLO_MD5),
        ] {
            assert!(
                validate_file(
                    f.path(),
                    &Check::Digest {
                        algorithm: algo,
                        value: hex.to_string()
                    }
                ),
                "{algo} should match"
            );
        }
        assert!(!validate_file(
            f.path(),
            &Check::Digest {
                algorithm: DigestAlgorithm::Sha256,
                value: "00".repeat(32)
            }
        ));
    }

    #[test]
    fn test_uppercase_metadata_digest_accepted() {
        let f = hello_file();
        assert!(validate_file(
            f.path(),
            &Check::Digest {
                algorithm: DigestAlgorithm::Sha256,
                value: HELLO_SHA256.to_uppercase()
            }
        ));
    }

    #[test]
    fn test_missing_file_fails_both_checks() {
        let path = Path::new("/no/such/file/repotag-test");
        assert!(!validate_file(path, &Check::Size(0)));
        assert!(!validate_file(
            path,
            &Check::Digest {
                algorithm: DigestAlgorithm::Md5,
                value: HELLO_MD5.to_string()
            }
        ));
    }

    #[test]
    fn test_algorithm_names_parse() {
        assert_eq!(
            "sha".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha1
        );
        assert_eq!(
            "SHA256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }
}
