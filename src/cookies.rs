//! Persisted Google Scholar cookies.
//!
//! Scholar is far less eager to serve CAPTCHAs to a session that already
//! passed one, so cookies exported from a browser are replayed on every
//! lookup.

use crate::error::{CitedByError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const COOKIE_FILE_NAME: &str = ".rustcitedby_cookies.json";

/// Default cookie file path: `~/.rustcitedby_cookies.json`
pub fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(COOKIE_FILE_NAME))
        .ok_or_else(|| CitedByError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in browser-export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
}

/// File-backed cookie store
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    /// Store at the default location, falling back to the working directory
    /// when no home directory is known.
    pub fn open_default() -> Self {
        let path = default_cookie_path().unwrap_or_else(|e| {
            warn!(error = %e, "Using cookie file in working directory");
            PathBuf::from(COOKIE_FILE_NAME)
        });
        Self { path }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies.
    ///
    /// A missing or unreadable file yields no cookies; lookups then simply run
    /// without a session.
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Cookie file not found");
            return Vec::new();
        }

        let parsed = std::fs::read_to_string(&self.path)
            .map_err(CitedByError::from)
            .and_then(|content| {
                serde_json::from_str::<Vec<Cookie>>(&content).map_err(CitedByError::from)
            });

        match parsed {
            Ok(cookies) => {
                info!(count = cookies.len(), path = %self.path.display(), "Loaded cookies");
                cookies
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unusable cookie file");
                Vec::new()
            }
        }
    }

    /// `Cookie` header value made of every stored cookie whose domain contains
    /// `domain_fragment`. Empty when none match.
    pub fn header_for(&self, domain_fragment: &str) -> String {
        cookie_header(&self.load(), domain_fragment)
    }

    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!(count = cookies.len(), path = %self.path.display(), "Saved cookies");
        Ok(())
    }

    /// Parse a JSON cookie array (as exported by browser extensions) and
    /// store it. Returns the number of cookies saved.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json.trim())?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Cleared cookies");
        }
        Ok(())
    }
}

fn cookie_header(cookies: &[Cookie], domain_fragment: &str) -> String {
    cookies
        .iter()
        .filter(|c| c.domain.contains(domain_fragment))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cookie(name: &str, value: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires: None,
        }
    }

    #[test]
    fn test_load_missing_file() {
        let store = CookieStore::with_path("/nonexistent/path/cookies.json");
        assert!(store.load().is_empty());
        assert_eq!(store.header_for("google"), "");
    }

    #[test]
    fn test_save_load_and_header() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CookieStore::with_path(dir.path().join("cookies.json"));

        store.save(&[
            cookie("NID", "abc", ".google.com"),
            cookie("GSP", "xyz", "scholar.google.com"),
            cookie("other", "1", ".example.com"),
        ])?;

        assert_eq!(store.load().len(), 3);
        assert_eq!(store.header_for("google"), "NID=abc; GSP=xyz");
        Ok(())
    }

    #[test]
    fn test_import_browser_export() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CookieStore::with_path(dir.path().join("cookies.json"));

        let json = r#"[{"name":"NID","value":"v","domain":".google.com","httpOnly":true,"expirationDate":1.7e9}]"#;
        assert_eq!(store.import_json(json)?, 1);

        let loaded = store.load();
        assert!(loaded[0].http_only);
        assert_eq!(loaded[0].expires, Some(1.7e9));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_yields_no_cookies() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "not json")?;
        assert!(CookieStore::with_path(&path).load().is_empty());
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CookieStore::with_path(dir.path().join("cookies.json"));
        store.save(&[cookie("NID", "abc", ".google.com")])?;
        store.clear()?;
        assert!(!store.path().exists());
        store.clear()?;
        Ok(())
    }
}
