//! Fetcher (C3, spec.md §4.3): downloads a padded time range from the
//! source provider, with retry/backoff and a local on-disk cache keyed on
//! `(videoId, start, end)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};

use crate::config::CredentialSource;
use crate::error::{AppError, AppResult};

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

pub struct Fetcher {
    client: reqwest::Client,
    credentials: CredentialSource,
    cache_dir: PathBuf,
    timeout: Duration,
    cache: Mutex<HashMap<(String, u64, u64), PathBuf>>,
    cookie_header: OnceCell<Option<String>>,
}

impl Fetcher {
    pub fn new(credentials: CredentialSource, cache_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            cache_dir,
            timeout,
            cache: Mutex::new(HashMap::new()),
            cookie_header: OnceCell::new(),
        }
    }

    /// `fetch(videoId, start, end, paddingStart, paddingEnd) -> filepath`
    ///
    /// Clamps the padded range to `[0, videoDuration)` when known and
    /// retries transient failures with exponential backoff (spec.md §4.3).
    pub async fn fetch(
        &self,
        video_id: &str,
        start: f64,
        end: f64,
        padding_start: f64,
        padding_end: f64,
        known_duration: Option<f64>,
        cancelled: &std::sync::atomic::AtomicBool,
    ) -> AppResult<PathBuf> {
        let padded_start = (start - padding_start).max(0.0);
        let padded_end = match known_duration {
            Some(d) => (end + padding_end).min(d),
            None => end + padding_end,
        };

        let cache_key = (
            video_id.to_string(),
            quantize(padded_start),
            quantize(padded_end),
        );

        if let Some(path) = self.cache.lock().await.get(&cache_key).cloned() {
            if path.exists() {
                return Ok(path);
            }
        }

        let mut last_err = None;
        for (attempt, backoff) in std::iter::once(Duration::ZERO)
            .chain(RETRY_BACKOFFS.into_iter())
            .enumerate()
        {
            if cancelled.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(AppError::Cancelled);
            }
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
            }

            match self.fetch_once(video_id, padded_start, padded_end).await {
                Ok(path) => {
                    self.cache.lock().await.insert(cache_key, path.clone());
                    return Ok(path);
                }
                Err(AppError::FetchPermanent(msg)) => {
                    return Err(AppError::FetchPermanent(msg));
                }
                Err(err) => {
                    tracing::warn!(video_id, attempt, error = %err, "fetch attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::FetchTransient("exhausted retries".to_string())))
    }

    async fn fetch_once(&self, video_id: &str, start: f64, end: f64) -> AppResult<PathBuf> {
        let url = self.source_url(video_id);
        let mut request = self.client.get(&url).timeout(self.timeout);
        request = self.apply_credentials(request).await;

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 || status.as_u16() == 403 {
            return Err(AppError::FetchPermanent(format!(
                "{video_id} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AppError::FetchTransient(format!(
                "{video_id} returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::FetchTransient(e.to_string()))?;

        std::fs::create_dir_all(&self.cache_dir)?;
        let filename = format!(
            "{video_id}_{}_{}.part",
            quantize(start),
            quantize(end)
        );
        let path = self.cache_dir.join(filename);
        std::fs::write(&path, &bytes)?;

        tracing::debug!(video_id, bytes = bytes.len(), start, end, "fetched clip source");
        Ok(path)
    }

    fn source_url(&self, video_id: &str) -> String {
        format!("https://video-source.invalid/watch?v={video_id}")
    }

    async fn apply_credentials(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cookie_header().await {
            Some(header) if !header.is_empty() => request.header(reqwest::header::COOKIE, header),
            _ => request,
        }
    }

    /// Resolves and caches the `Cookie:` header value for this process's
    /// configured credential source, computed once on first use.
    async fn cookie_header(&self) -> Option<String> {
        self.cookie_header
            .get_or_init(|| async {
                match &self.credentials {
                    CredentialSource::CookieFile(path) => load_netscape_cookie_header(path),
                    CredentialSource::Browser(browser) => load_browser_cookie_header(browser).await,
                    CredentialSource::None => None,
                }
            })
            .await
            .clone()
    }
}

/// Parses a Netscape/`cookies.txt`-format cookie jar: tab-separated
/// `domain, includeSubdomains, path, secure, expiry, name, value` per line,
/// `#`-prefixed lines and blanks skipped.
fn load_netscape_cookie_header(path: &Path) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read cookie jar file");
            return None;
        }
    };

    let pairs: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(format!("{}={}", fields[5], fields[6]))
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Reads cookies out of a named browser's on-disk cookie store. Firefox
/// stores cookie values unencrypted in its SQLite profile database, so those
/// are read directly; Chromium-family browsers encrypt `value` at rest via
/// the OS keychain, so only cookies they left in the legacy plaintext column
/// are recovered. Safari's binary cookie format isn't SQLite and isn't read.
async fn load_browser_cookie_header(browser: &str) -> Option<String> {
    if browser.eq_ignore_ascii_case("safari") {
        tracing::warn!("safari's binary cookie store format is unsupported; no cookies attached");
        return None;
    }

    let source_path = default_browser_cookie_path(browser)?;
    if !source_path.exists() {
        tracing::warn!(browser, path = %source_path.display(), "browser cookie store not found");
        return None;
    }

    // Copy to a scratch snapshot first: the live browser process holds the
    // store open, and SQLite's rollback journal can make a direct open fail.
    let snapshot = std::env::temp_dir().join(format!("clipweave-cookies-{}.sqlite", uuid::Uuid::new_v4()));
    if let Err(err) = std::fs::copy(&source_path, &snapshot) {
        tracing::warn!(browser, error = %err, "failed to snapshot browser cookie store");
        return None;
    }

    let header = read_cookie_header_from_sqlite(&snapshot, browser).await;
    let _ = std::fs::remove_file(&snapshot);
    header
}

async fn read_cookie_header_from_sqlite(db_path: &Path, browser: &str) -> Option<String> {
    let url = format!("sqlite://{}?mode=ro", db_path.display());
    let pool = match sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            tracing::warn!(browser, error = %err, "failed to open browser cookie store");
            return None;
        }
    };

    let sql = if browser.eq_ignore_ascii_case("firefox") {
        "SELECT name, value FROM moz_cookies WHERE value != ''"
    } else {
        "SELECT name, value FROM cookies WHERE value != ''"
    };

    let rows: Vec<(String, String)> = sqlx::query_as(sql).fetch_all(&pool).await.unwrap_or_default();
    pool.close().await;

    if rows.is_empty() {
        tracing::warn!(browser, "no readable (unencrypted) cookies found in browser store");
        return None;
    }

    Some(
        rows.into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn default_browser_cookie_path(browser: &str) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let path = match browser.to_ascii_lowercase().as_str() {
        "firefox" => firefox_cookie_db_path(&home)?,
        "chrome" => home.join(".config/google-chrome/Default/Cookies"),
        "chromium" => home.join(".config/chromium/Default/Cookies"),
        "edge" => home.join(".config/microsoft-edge/Default/Cookies"),
        "opera" => home.join(".config/opera/Cookies"),
        "brave" => home.join(".config/BraveSoftware/Brave-Browser/Default/Cookies"),
        _ => return None,
    };
    Some(path)
}

/// Firefox profile directories are randomly suffixed; find the first profile
/// with a `cookies.sqlite` rather than assuming a fixed name.
fn firefox_cookie_db_path(home: &Path) -> Option<PathBuf> {
    let profiles_dir = home.join(".mozilla/firefox");
    std::fs::read_dir(&profiles_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path().join("cookies.sqlite"))
        .find(|p| p.exists())
}

fn classify_transport_error(err: &reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() {
        AppError::FetchTransient(err.to_string())
    } else {
        AppError::FetchTransient(err.to_string())
    }
}

fn quantize(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

pub type SharedFetcher = Arc<Fetcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_is_stable_for_equal_floats() {
        assert_eq!(quantize(1.500_000_1), quantize(1.5));
    }

    #[test]
    fn netscape_cookie_jar_parses_name_value_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(
            &path,
            "# Netscape HTTP Cookie File\n\
             .video-source.invalid\tTRUE\t/\tTRUE\t0\tsession\tabc123\n\
             \n\
             .video-source.invalid\tTRUE\t/\tTRUE\t0\tlocale\ten-US\n",
        )
        .unwrap();

        let header = load_netscape_cookie_header(&path).unwrap();
        assert_eq!(header, "session=abc123; locale=en-US");
    }

    #[test]
    fn netscape_cookie_jar_missing_file_yields_none() {
        let header = load_netscape_cookie_header(Path::new("/nonexistent/cookies.txt"));
        assert!(header.is_none());
    }

    #[tokio::test]
    async fn fetch_rejects_when_already_cancelled() {
        let fetcher = Fetcher::new(
            CredentialSource::None,
            std::env::temp_dir().join("clipweave-fetcher-test"),
            Duration::from_secs(1),
        );
        let cancelled = std::sync::atomic::AtomicBool::new(true);
        let result = fetcher
            .fetch("vid", 0.0, 1.0, 0.0, 0.0, None, &cancelled)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
