//! Monitored site list: URL validation, the line-oriented list format, and the
//! shared snapshot the scheduler publishes after every reload.
//!
//! List format: one URL per line, everything after `#` is a comment, blank
//! lines are ignored. Only absolute `http`/`https` URLs shorter than
//! [`MAX_URL_LEN`] are accepted, and at most [`MAX_SITES`] of them.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Maximum number of sites taken from one reload; extra lines are ignored.
pub const MAX_SITES: usize = 50;

/// URLs must be strictly shorter than this many bytes.
pub const MAX_URL_LEN: usize = 2048;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SiteError {
    #[error("url is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("not a valid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("url has no host")]
    NotAbsolute,

    #[error("line is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum SiteListError {
    #[error("site list {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated endpoint. The URL string as written in the list is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Site(String);

impl Site {
    pub fn parse(raw: &str) -> Result<Self, SiteError> {
        if raw.len() >= MAX_URL_LEN {
            return Err(SiteError::TooLong {
                len: raw.len(),
                max: MAX_URL_LEN,
            });
        }

        let url = Url::parse(raw).map_err(|e| SiteError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SiteError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(SiteError::NotAbsolute);
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Site {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A line that did not make it into the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line_no: usize,
    pub content: String,
    pub reason: SiteError,
}

#[derive(Debug, Default, Clone)]
pub struct ParsedSites {
    pub sites: Vec<Site>,
    pub rejected: Vec<RejectedLine>,
    /// Valid lines dropped because the list was already full.
    pub truncated: usize,
}

/// Parse the site list format. Malformed lines are skipped, never fatal.
///
/// Lines are decoded one at a time, so a stray non-UTF-8 byte only costs the
/// line it sits on.
pub fn parse_site_list(raw: impl AsRef<[u8]>) -> ParsedSites {
    let mut parsed = ParsedSites::default();

    for (idx, raw) in raw.as_ref().split(|b| *b == b'\n').enumerate() {
        let line_no = idx + 1;
        let raw = match raw.iter().position(|b| *b == b'#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let (line, decoded) = match std::str::from_utf8(raw) {
            Ok(text) => (Cow::Borrowed(text.trim()), true),
            Err(_) => (
                Cow::Owned(String::from_utf8_lossy(raw).trim().to_string()),
                false,
            ),
        };

        if line.is_empty() {
            continue;
        }

        if parsed.sites.len() >= MAX_SITES {
            parsed.truncated += 1;
            continue;
        }

        let site = if decoded {
            Site::parse(&line)
        } else {
            Err(SiteError::NotUtf8)
        };
        match site {
            Ok(site) => parsed.sites.push(site),
            Err(reason) => {
                warn!(line = line_no, content = %line, error = %reason, "Skipping invalid site");
                parsed.rejected.push(RejectedLine {
                    line_no,
                    content: line.into_owned(),
                    reason,
                });
            }
        }
    }

    if parsed.truncated > 0 {
        warn!(
            max = MAX_SITES,
            ignored = parsed.truncated,
            "Site list exceeds maximum, extra lines ignored"
        );
    }

    parsed
}

/// Where the scheduler gets a fresh site list at the start of every sweep.
pub trait SiteSource: Send + Sync {
    fn reload(&self) -> Result<Vec<Site>, SiteListError>;
}

/// Site list read from a text file on every reload.
#[derive(Debug, Clone)]
pub struct FileSiteSource {
    path: PathBuf,
}

impl FileSiteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SiteSource for FileSiteSource {
    fn reload(&self) -> Result<Vec<Site>, SiteListError> {
        let raw = std::fs::read(&self.path).map_err(|source| SiteListError::Unreadable {
            path: self.path.clone(),
            source,
        })?;

        let parsed = parse_site_list(raw);
        debug!(
            path = %self.path.display(),
            sites = parsed.sites.len(),
            rejected = parsed.rejected.len(),
            "Reloaded site list"
        );
        Ok(parsed.sites)
    }
}

/// Fixed in-memory list, used for one-shot checks.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteSource {
    sites: Vec<Site>,
}

impl StaticSiteSource {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }
}

impl SiteSource for StaticSiteSource {
    fn reload(&self) -> Result<Vec<Site>, SiteListError> {
        Ok(self.sites.clone())
    }
}

/// Shared handle on the current site snapshot.
///
/// The scheduler replaces the snapshot wholesale after a successful reload;
/// readers only ever see a complete list, old or new.
#[derive(Debug, Clone)]
pub struct SiteList {
    tx: Arc<watch::Sender<Arc<[Site]>>>,
}

impl SiteList {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel::<Arc<[Site]>>(Arc::from(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn with_sites(sites: Vec<Site>) -> Self {
        let list = Self::new();
        list.replace(sites);
        list
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<[Site]> {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, sites: Vec<Site>) {
        self.tx.send_replace(Arc::from(sites));
    }
}

impl Default for SiteList {
    fn default() -> Self {
        Self::new()
    }
}
