// src/fetch.rs

//! HTTP fetcher
//!
//! The only component that performs network I/O. Downloads stream to a
//! sibling `.tmp` file and rename into place on success, so an interrupted
//! run never leaves a malformed file at the final path and never overwrites
//! an inode shared with a hardlinked tag. Transport errors are retried with
//! a linear backoff; HTTP error statuses are not.

use crate::config::SslClientAuth;
use crate::error::{Error, Result};
use indicatif::ProgressBar;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts per download.
const MAX_RETRIES: u32 = 3;

/// Base retry delay; multiplied by the attempt number.
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads.
const STREAM_BUFFER_SIZE: usize = 8192;

/// Blocking HTTP client configured for one repository.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Build a client honoring the repo's proxy and mutual-TLS settings.
    pub fn new(proxy: Option<&str>, ssl: Option<&SslClientAuth>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        if let Some(ssl) = ssl {
            let ca = fs::read(&ssl.ca)?;
            let ca = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| Error::Config(format!("invalid CA {}: {e}", ssl.ca.display())))?;

            // reqwest wants certificate and key in a single PEM bundle.
            let mut identity = fs::read(&ssl.cert)?;
            identity.extend(fs::read(&ssl.key)?);
            let identity = reqwest::Identity::from_pem(&identity).map_err(|e| {
                Error::Config(format!(
                    "invalid client cert/key {} / {}: {e}",
                    ssl.cert.display(),
                    ssl.key.display()
                ))
            })?;

            builder = builder.add_root_certificate(ca).identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Download(format!("cannot build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Download `url` into `dest`, returning bytes written.
    ///
    /// The parent directory must already exist (callers ensure it through
    /// `make_dir`). Retries transport failures; an HTTP status >= 400 fails
    /// immediately since a second GET would get the same answer.
    pub fn download_binary_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressBar>,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(Error::Download(format!("HTTP {status} from {url}")));
                    }
                    return self.stream_to_file(response, dest, progress);
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::Download(format!(
                            "{url}: giving up after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("attempt {attempt} for {url} failed: {e}, retrying");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn stream_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        dest: &Path,
        progress: Option<&ProgressBar>,
    ) -> Result<u64> {
        if let Some(pb) = progress {
            if let Some(len) = response.content_length() {
                pb.set_length(len);
            }
        }

        let tmp = dest.with_extension("tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| Error::Download(format!("cannot create {}: {e}", tmp.display())))?;

        let mut written: u64 = 0;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = response
                .read(&mut buffer)
                .map_err(|e| Error::Download(format!("read error: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])?;
            written += n as u64;
            if let Some(pb) = progress {
                pb.set_position(written);
            }
        }
        file.flush()?;
        drop(file);

        // Replace, never overwrite in place: hardlinked tags must keep
        // their old inode.
        fs::rename(&tmp, dest)?;

        debug!("downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}
