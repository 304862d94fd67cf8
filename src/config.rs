//! Process-wide configuration, loaded once at startup into an immutable
//! struct (spec.md §9: "reload requires restart").

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Which credential source the fetcher (C3) should use to authenticate
/// against the source provider (spec.md §4.3).
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// Cookies extracted from a named local browser profile.
    Browser(String),
    /// A Netscape-format cookie jar file.
    CookieFile(PathBuf),
    /// No credentials configured; unauthenticated fetches only.
    None,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub credentials: CredentialSource,
    pub auphonic_api_token: Option<String>,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub bind_addr: String,
    pub max_download_workers: usize,
    pub max_processing_workers: usize,
    pub cleanup_temp_files: bool,
    pub verify_encoder_on_init: bool,
    pub incremental_stitching_threshold: usize,
    pub fetch_timeout: Duration,
    pub transcode_timeout: Duration,
    pub enhancer_poll_interval: Duration,
    pub enhancer_total_budget: Duration,
}

impl AppConfig {
    /// Load from environment (optionally seeded by a `.env` file).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let db_path = env_or("DB_PATH", "./clipweave.db").into();

        let credentials = match env_opt("COOKIES_FROM_BROWSER") {
            Some(browser) if !browser.is_empty() => CredentialSource::Browser(browser),
            _ => match env_opt("COOKIES_FILE") {
                Some(path) if !path.is_empty() => CredentialSource::CookieFile(path.into()),
                _ => CredentialSource::None,
            },
        };

        let auphonic_api_token = env_opt("AUPHONIC_API_TOKEN").filter(|s| !s.is_empty());

        let output_dir: PathBuf = env_or("OUTPUT_DIR", "./output").into();
        let temp_dir: PathBuf = match env_opt("TEMP_DIR") {
            Some(p) if !p.is_empty() => p.into(),
            _ => std::env::temp_dir().join("clipweave"),
        };

        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("unwritable output directory {output_dir:?}"))?;
        std::fs::create_dir_all(&temp_dir)
            .with_context(|| format!("unwritable temp root {temp_dir:?}"))?;

        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8080");

        let max_download_workers = env_usize("MAX_DOWNLOAD_WORKERS", 3);
        let max_processing_workers = env_usize("MAX_PROCESSING_WORKERS", 4);
        let cleanup_temp_files = env_bool("CLEANUP_TEMP_FILES", true);
        let verify_encoder_on_init = env_bool("VERIFY_ENCODER_ON_INIT", true);
        let incremental_stitching_threshold = env_usize("INCREMENTAL_STITCHING_THRESHOLD", 50);

        Ok(Self {
            db_path,
            credentials,
            auphonic_api_token,
            output_dir,
            temp_dir,
            bind_addr,
            max_download_workers,
            max_processing_workers,
            cleanup_temp_files,
            verify_encoder_on_init,
            incremental_stitching_threshold,
            fetch_timeout: Duration::from_secs(60),
            transcode_timeout: Duration::from_secs(120),
            enhancer_poll_interval: Duration::from_secs(5),
            enhancer_total_budget: Duration::from_secs(600),
        })
    }

    pub fn enhancer_enabled(&self) -> bool {
        self.auphonic_api_token.is_some()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref() {
        Some("0") | Some("false") | Some("no") => false,
        Some("1") | Some("true") | Some("yes") => true,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_parses_common_forms() {
        std::env::set_var("CLIPWEAVE_TEST_BOOL", "false");
        assert!(!env_bool("CLIPWEAVE_TEST_BOOL", true));
        std::env::set_var("CLIPWEAVE_TEST_BOOL", "1");
        assert!(env_bool("CLIPWEAVE_TEST_BOOL", false));
        std::env::remove_var("CLIPWEAVE_TEST_BOOL");
        assert!(env_bool("CLIPWEAVE_TEST_BOOL", true));
    }
}
