//! Remote (URL) sources for ADD.
//!
//! A download lands in a private temporary directory whose lifetime is tied
//! to the returned [`Source`]. The file's mtime comes from `Last-Modified`
//! (or the Unix epoch), never from the time of the fetch, so re-fetching
//! unchanged content produces the same layer.

use std::path::{Path, PathBuf};

use a3s_build_core::config::CopyConfig;
use a3s_build_core::error::{BuildError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use filetime::FileTime;
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_DISPOSITION, LAST_MODIFIED};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::source::{LazySource, Source};

/// On-disk name of a download whose filename could not be determined.
pub const UNNAMED_FILENAME: &str = "__unnamed__";

/// A fetched remote source.
#[derive(Debug)]
pub struct Download {
    /// Temporary tree holding the downloaded file
    pub source: Source,
    /// Filename derived from the URL or `Content-Disposition`; empty if
    /// none could be determined (the file is then stored as
    /// [`UNNAMED_FILENAME`])
    pub filename: String,
}

/// Fetches URL sources.
#[async_trait]
pub trait SourceDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Download>;
}

/// Downloader for instructions that don't accept URLs.
#[derive(Debug, Clone)]
pub struct RejectRemote {
    command: String,
}

impl RejectRemote {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl Default for RejectRemote {
    fn default() -> Self {
        Self::new("COPY")
    }
}

#[async_trait]
impl SourceDownloader for RejectRemote {
    async fn download(&self, url: &str) -> Result<Download> {
        Err(BuildError::InvalidSource {
            source_url: url.to_string(),
            message: format!("source can't be a URL for {}", self.command),
        })
    }
}

/// HTTP(S) downloader.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    download_dir: Option<PathBuf>,
    prefix: String,
    cancel: CancellationToken,
}

impl HttpDownloader {
    pub fn new(config: &CopyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BuildError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            download_dir: config.download_dir.clone(),
            prefix: config.download_prefix.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort in-flight downloads when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    async fn fetch(&self, src_url: &str) -> Result<Download> {
        let url = reqwest::Url::parse(src_url).map_err(|e| BuildError::InvalidSource {
            source_url: src_url.to_string(),
            message: e.to_string(),
        })?;

        // Request and check status
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fetch_failed(src_url, 0, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BuildError::FetchFailed {
                url: src_url.to_string(),
                status_code: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        // Derive name and mtime from the response headers
        let filename = filename_for_download(
            url.path(),
            header_str(&response, CONTENT_DISPOSITION.as_str()),
        );
        let mtime = header_str(&response, LAST_MODIFIED.as_str())
            .and_then(parse_http_date)
            .unwrap_or_else(FileTime::zero);

        // Dropping `dir` on any early return removes the partial download.
        let dir = self.create_staging_dir()?;
        let stored_name = if filename.is_empty() {
            UNNAMED_FILENAME
        } else {
            filename.as_str()
        };
        let file_path = dir.path().join(stored_name);

        // Stream the body to disk
        let mut file = create_exclusive(&file_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_failed(src_url, status.as_u16(), e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        filetime::set_file_times(&file_path, mtime, mtime)?;

        tracing::info!(
            url = %src_url,
            file = %stored_name,
            bytes = written,
            "Downloaded remote source"
        );

        let tree = LazySource::new(dir.path())?;
        Ok(Download {
            source: Source::Remote { tree, dir },
            filename,
        })
    }

    fn create_staging_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let dir = match &self.download_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }?;
        Ok(dir)
    }
}

#[async_trait]
impl SourceDownloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<Download> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(BuildError::Cancelled(format!("download of {}", url)))
            }
            result = self.fetch(url) => result,
        }
    }
}

#[cfg(unix)]
async fn create_exclusive(path: &Path) -> Result<tokio::fs::File> {
    Ok(tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?)
}

#[cfg(not(unix))]
async fn create_exclusive(path: &Path) -> Result<tokio::fs::File> {
    Ok(tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?)
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn fetch_failed(url: &str, status_code: u16, err: reqwest::Error) -> BuildError {
    BuildError::FetchFailed {
        url: url.to_string(),
        status_code,
        message: err.to_string(),
    }
}

/// Whether a source string names a remote URL.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Pick the filename of a download: the last segment of the (percent-encoded)
/// URL path, decoded, else the `Content-Disposition` filename, else empty.
pub fn filename_for_download(url_path: &str, content_disposition: Option<&str>) -> String {
    let url_path = percent_decode_str(url_path).decode_utf8_lossy();
    if !url_path.is_empty() && !url_path.ends_with('/') {
        if let Some(name) = base_name(&url_path) {
            return name;
        }
    }

    if let Some(filename) = content_disposition.and_then(disposition_filename) {
        if !filename.ends_with('/') {
            if let Some(name) = base_name(&filename) {
                return name;
            }
        }
    }

    String::new()
}

fn base_name(path: &str) -> Option<String> {
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}

/// Extract the `filename` parameter from a `Content-Disposition` value,
/// preferring the RFC 2231 `filename*` form when present.
fn disposition_filename(value: &str) -> Option<String> {
    let params = parse_disposition_params(value)?;
    let extended = params
        .iter()
        .find(|(k, _)| k == "filename*")
        .and_then(|(_, v)| decode_ext_value(v));
    extended.or_else(|| {
        params
            .into_iter()
            .find(|(k, _)| k == "filename")
            .map(|(_, v)| v)
    })
    .filter(|name| !name.is_empty())
}

/// Split `type; key=value; key="quoted value"` into lowercase keys and
/// unquoted values. Returns `None` when the disposition type is missing.
fn parse_disposition_params(value: &str) -> Option<Vec<(String, String)>> {
    let (disposition, mut rest) = match value.find(';') {
        Some(idx) => (&value[..idx], &value[idx + 1..]),
        None => (value, ""),
    };
    if disposition.trim().is_empty() {
        return None;
    }

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }
        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let val = if let Some(quoted) = rest.strip_prefix('"') {
            let mut out = String::new();
            let mut chars = quoted.char_indices();
            let mut end = None;
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            out.push(escaped);
                        }
                    }
                    '"' => {
                        end = Some(i + 1);
                        break;
                    }
                    _ => out.push(c),
                }
            }
            rest = &quoted[end?..];
            out
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let token = rest[..end].trim().to_string();
            rest = &rest[end..];
            token
        };
        params.push((key, val));
    }
    Some(params)
}

/// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
        return None;
    }

    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Parse an HTTP date (RFC 1123, RFC 850 or asctime). Dates before the
/// Unix epoch clamp to the epoch.
pub fn parse_http_date(value: &str) -> Option<FileTime> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc2822(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT")
                .ok()
                .map(|t| t.and_utc())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y")
                .ok()
                .map(|t| t.and_utc())
        })?;

    if parsed.timestamp() < 0 {
        return Some(FileTime::zero());
    }
    Some(FileTime::from_unix_time(
        parsed.timestamp(),
        parsed.timestamp_subsec_nanos(),
    ))
}
