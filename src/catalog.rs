//! Clip Catalog (C1, spec.md §4.1): a read-only store of per-word clips,
//! per-video transcripts, and a 2-5-word phrase index.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sqlx::sqlite::{SqlitePoolOptions, SqliteQueryResult};
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::model::{CatalogStats, LookupFilter, PhraseHit, VideoTranscript, TranscriptWord, WordClip};
use crate::normalize::{normalize, normalize_tokens, phrase_hash};

const TRANSCRIPT_CACHE_SIZE: usize = 256;

pub struct Catalog {
    pool: SqlitePool,
    transcript_cache: Mutex<LruCache<String, Arc<VideoTranscript>>>,
}

trait Candidate: Clone {
    fn video_id(&self) -> &str;
    fn measure(&self) -> f64;
    fn start(&self) -> f64;
}

impl Candidate for WordClip {
    fn video_id(&self) -> &str {
        &self.video_id
    }
    fn measure(&self) -> f64 {
        self.duration
    }
    fn start(&self) -> f64 {
        self.start
    }
}

impl Candidate for PhraseHit {
    fn video_id(&self) -> &str {
        &self.video_id
    }
    fn measure(&self) -> f64 {
        self.end - self.start
    }
    fn start(&self) -> f64 {
        self.start
    }
}

/// Deterministic selection policy shared by word and phrase lookup
/// (spec.md §4.1): prefer largest measure, tie-break on `(videoId, start)`,
/// and fall back to ignoring `excludeVideos` if every candidate was excluded.
fn select<T: Candidate>(candidates: &[T], exclude: &[String]) -> Option<T> {
    let pick = |pool: &[T]| -> Option<T> {
        pool.iter()
            .cloned()
            .min_by(|a, b| {
                b.measure()
                    .partial_cmp(&a.measure())
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.video_id().cmp(b.video_id()))
                    .then_with(|| a.start().partial_cmp(&b.start()).unwrap_or(Ordering::Equal))
            })
    };

    let filtered: Vec<T> = candidates
        .iter()
        .filter(|c| !exclude.iter().any(|e| e == c.video_id()))
        .cloned()
        .collect();

    if !filtered.is_empty() {
        pick(&filtered)
    } else if !candidates.is_empty() {
        pick(candidates)
    } else {
        None
    }
}

impl Catalog {
    pub async fn connect(db_path: &std::path::Path) -> AppResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            AppError::Database(sqlx::Error::Configuration(e.to_string().into()))
        })?;

        Ok(Self {
            pool,
            transcript_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TRANSCRIPT_CACHE_SIZE).unwrap(),
            )),
        })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            AppError::Database(sqlx::Error::Configuration(e.to_string().into()))
        })?;
        Ok(Self {
            pool,
            transcript_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TRANSCRIPT_CACHE_SIZE).unwrap(),
            )),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `lookupWord(word, {excludeVideos?, preferredChannels?}) -> clip?`
    pub async fn lookup_word(
        &self,
        word: &str,
        filter: &LookupFilter,
    ) -> AppResult<Option<WordClip>> {
        let normalized = normalize(word);

        let rows = if filter.preferred_channels.is_empty() {
            sqlx::query_as::<_, WordClip>(
                "SELECT word, video_id, start, duration FROM word_clips WHERE word = ?1",
            )
            .bind(&normalized)
            .fetch_all(&self.pool)
            .await?
        } else {
            let placeholders = placeholders(filter.preferred_channels.len());
            let sql = format!(
                "SELECT wc.word, wc.video_id, wc.start, wc.duration \
                 FROM word_clips wc JOIN videos v ON v.video_id = wc.video_id \
                 WHERE wc.word = ?1 AND v.channel_id IN ({placeholders})"
            );
            let mut q = sqlx::query_as::<_, WordClip>(&sql).bind(&normalized);
            for ch in &filter.preferred_channels {
                q = q.bind(ch);
            }
            q.fetch_all(&self.pool).await?
        };

        Ok(select(&rows, &filter.exclude_videos))
    }

    /// `lookupPhrase(phrase, {excludeVideos?, preferredChannels?}) -> phraseHit?`
    ///
    /// Tries the phrase index first; falls back to a transcript scan if the
    /// index has no entry (or the index is empty entirely).
    pub async fn lookup_phrase(
        &self,
        phrase: &str,
        filter: &LookupFilter,
    ) -> AppResult<Option<PhraseHit>> {
        let hash = phrase_hash(phrase);

        let indexed = if filter.preferred_channels.is_empty() {
            sqlx::query(
                "SELECT video_id, start, end_, phrase_text FROM phrase_index WHERE phrase_hash = ?1",
            )
            .bind(&hash)
            .fetch_all(&self.pool)
            .await?
        } else {
            let placeholders = placeholders(filter.preferred_channels.len());
            let sql = format!(
                "SELECT pi.video_id, pi.start, pi.end_, pi.phrase_text \
                 FROM phrase_index pi JOIN videos v ON v.video_id = pi.video_id \
                 WHERE pi.phrase_hash = ?1 AND v.channel_id IN ({placeholders})"
            );
            let mut q = sqlx::query(&sql).bind(&hash);
            for ch in &filter.preferred_channels {
                q = q.bind(ch);
            }
            q.fetch_all(&self.pool).await?
        };

        let hits: Vec<PhraseHit> = indexed
            .into_iter()
            .map(|row| PhraseHit {
                video_id: row.get("video_id"),
                start: row.get("start"),
                end: row.get("end_"),
                text: row.get("phrase_text"),
            })
            .collect();

        if let Some(hit) = select(&hits, &filter.exclude_videos) {
            return Ok(Some(hit));
        }

        self.lookup_phrase_via_transcript_scan(phrase, filter).await
    }

    async fn lookup_phrase_via_transcript_scan(
        &self,
        phrase: &str,
        filter: &LookupFilter,
    ) -> AppResult<Option<PhraseHit>> {
        let tokens = normalize_tokens(phrase);
        if tokens.is_empty() {
            return Ok(None);
        }

        let candidate_videos = self
            .videos_containing_all_words(&tokens, &filter.preferred_channels)
            .await?;
        if candidate_videos.is_empty() {
            return Ok(None);
        }

        let mut hits = Vec::new();
        for video_id in candidate_videos {
            let Some(transcript) = self.get_transcript(&video_id).await? else {
                continue;
            };
            if let Some(hit) = scan_transcript_for_phrase(&transcript, &tokens) {
                hits.push(hit);
            }
        }

        Ok(select(&hits, &filter.exclude_videos))
    }

    async fn videos_containing_all_words(
        &self,
        tokens: &[String],
        preferred_channels: &[String],
    ) -> AppResult<Vec<String>> {
        let mut running: Option<HashSet<String>> = None;
        for token in tokens {
            let rows: Vec<(String,)> = if preferred_channels.is_empty() {
                sqlx::query_as("SELECT DISTINCT video_id FROM word_clips WHERE word = ?1")
                    .bind(token)
                    .fetch_all(&self.pool)
                    .await?
            } else {
                let placeholders = placeholders(preferred_channels.len());
                let sql = format!(
                    "SELECT DISTINCT wc.video_id FROM word_clips wc \
                     JOIN videos v ON v.video_id = wc.video_id \
                     WHERE wc.word = ?1 AND v.channel_id IN ({placeholders})"
                );
                let mut q = sqlx::query_as(&sql).bind(token);
                for ch in preferred_channels {
                    q = q.bind(ch);
                }
                q.fetch_all(&self.pool).await?
            };
            let set: HashSet<String> = rows.into_iter().map(|(v,)| v).collect();
            running = Some(match running {
                None => set,
                Some(prev) => prev.intersection(&set).cloned().collect(),
            });
            if running.as_ref().is_some_and(|s| s.is_empty()) {
                break;
            }
        }
        Ok(running.map(|s| s.into_iter().collect()).unwrap_or_default())
    }

    /// `getTranscript(videoId) -> transcript?`, served through the bounded
    /// in-process LRU (spec.md §4.1, §9).
    pub async fn get_transcript(&self, video_id: &str) -> AppResult<Option<Arc<VideoTranscript>>> {
        if let Some(cached) = {
            let mut cache = self.transcript_cache.lock().unwrap();
            cache.get(video_id).cloned()
        } {
            return Ok(Some(cached));
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT transcript_json FROM video_transcripts WHERE video_id = ?1")
                .bind(video_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((json,)) = row else {
            return Ok(None);
        };

        let words: Vec<(String, f64, f64)> = serde_json::from_str(&json).map_err(|e| {
            AppError::Database(sqlx::Error::Decode(Box::new(e)))
        })?;
        let transcript = Arc::new(VideoTranscript {
            video_id: video_id.to_string(),
            words: words
                .into_iter()
                .map(|(text, start, end)| TranscriptWord { text, start, end })
                .collect(),
        });

        self.transcript_cache
            .lock()
            .unwrap()
            .put(video_id.to_string(), transcript.clone());

        Ok(Some(transcript))
    }

    /// `stats() -> {words, videos, hasTranscripts, hasPhraseIndex}`
    pub async fn stats(&self) -> AppResult<CatalogStats> {
        let words: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT word) FROM word_clips")
            .fetch_one(&self.pool)
            .await?;
        let videos: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        let transcripts: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM video_transcripts")
            .fetch_one(&self.pool)
            .await?;
        let phrases: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM phrase_index")
            .fetch_one(&self.pool)
            .await?;

        Ok(CatalogStats {
            words: words.0.max(0) as u64,
            videos: videos.0.max(0) as u64,
            has_transcripts: transcripts.0 > 0,
            has_phrase_index: phrases.0 > 0,
        })
    }

    /// Seed helper used by tests and local bootstrapping; the real ingester
    /// lives outside this crate's scope (spec.md §1).
    #[cfg(test)]
    pub async fn seed_test_video(
        &self,
        video_id: &str,
        words: &[(&str, f64, f64)],
    ) -> AppResult<SqliteQueryResult> {
        sqlx::query("INSERT OR IGNORE INTO videos (video_id, title) VALUES (?1, ?1)")
            .bind(video_id)
            .execute(&self.pool)
            .await?;

        for (text, start, end) in words {
            let normalized = normalize(text);
            sqlx::query(
                "INSERT OR REPLACE INTO word_clips (word, video_id, start, duration) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&normalized)
            .bind(video_id)
            .bind(start)
            .bind(end - start)
            .execute(&self.pool)
            .await?;
        }

        let transcript: Vec<(String, f64, f64)> = words
            .iter()
            .map(|(t, s, e)| (t.to_string(), *s, *e))
            .collect();
        let json = serde_json::to_string(&transcript).unwrap();
        let duration = words.last().map(|(_, _, e)| *e).unwrap_or(0.0);

        let result = sqlx::query(
            "INSERT OR REPLACE INTO video_transcripts (video_id, transcript_json, word_count, duration) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(video_id)
        .bind(&json)
        .bind(words.len() as i64)
        .bind(duration)
        .execute(&self.pool)
        .await?;

        Ok(result)
    }

    #[cfg(test)]
    pub async fn seed_phrase_index(
        &self,
        video_id: &str,
        phrase_text: &str,
        start: f64,
        end: f64,
    ) -> AppResult<()> {
        let hash = phrase_hash(phrase_text);
        let word_count = normalize_tokens(phrase_text).len() as i64;
        sqlx::query(
            "INSERT OR REPLACE INTO phrase_index (phrase_hash, phrase_text, video_id, start, end_, word_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(hash)
        .bind(normalize(phrase_text))
        .bind(video_id)
        .bind(start)
        .bind(end)
        .bind(word_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?")
        .take(n)
        .collect::<Vec<_>>()
        .join(", ")
}

fn scan_transcript_for_phrase(transcript: &VideoTranscript, tokens: &[String]) -> Option<PhraseHit> {
    let k = tokens.len();
    if transcript.words.len() < k {
        return None;
    }

    for window_start in 0..=(transcript.words.len() - k) {
        let window = &transcript.words[window_start..window_start + k];
        let matches = window
            .iter()
            .zip(tokens.iter())
            .all(|(w, t)| normalize(&w.text) == *t);

        if matches {
            let text = window
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            return Some(PhraseHit {
                video_id: transcript.video_id.clone(),
                start: window.first().unwrap().start,
                end: window.last().unwrap().end,
                text,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_catalog() -> Catalog {
        let catalog = Catalog::connect_in_memory().await.unwrap();
        catalog
            .seed_test_video(
                "aaaaaaaaaaa",
                &[
                    ("hello", 0.0, 0.5),
                    ("world", 0.5, 1.1),
                    ("how", 1.1, 1.5),
                    ("are", 1.5, 1.8),
                    ("you", 1.8, 2.2),
                ],
            )
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn lookup_word_finds_seeded_clip() {
        let catalog = seeded_catalog().await;
        let hit = catalog
            .lookup_word("hello", &LookupFilter::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.video_id, "aaaaaaaaaaa");
        assert!((hit.start - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn lookup_word_missing_returns_none() {
        let catalog = seeded_catalog().await;
        let hit = catalog
            .lookup_word("goodbye", &LookupFilter::default())
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn exclude_videos_waived_when_all_excluded() {
        let catalog = seeded_catalog().await;
        let filter = LookupFilter {
            exclude_videos: vec!["aaaaaaaaaaa".to_string()],
            ..Default::default()
        };
        // Only one candidate exists; exclusion must be waived rather than
        // returning none.
        let hit = catalog.lookup_word("hello", &filter).await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn lookup_phrase_falls_back_to_transcript_scan() {
        let catalog = seeded_catalog().await;
        // No phrase index seeded; scan path must still find it.
        let hit = catalog
            .lookup_phrase("hello world", &LookupFilter::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.video_id, "aaaaaaaaaaa");
        assert!((hit.start - 0.0).abs() < 1e-9);
        assert!((hit.end - 1.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn transcript_scan_fallback_applies_preferred_channels() {
        let catalog = Catalog::connect_in_memory().await.unwrap();
        catalog
            .seed_test_video("aaaaaaaaaaa", &[("hello", 0.0, 0.5), ("world", 0.5, 1.1)])
            .await
            .unwrap();
        catalog
            .seed_test_video("bbbbbbbbbbb", &[("hello", 0.0, 0.6), ("world", 0.6, 1.3)])
            .await
            .unwrap();
        sqlx::query("UPDATE videos SET channel_id = ?1 WHERE video_id = ?2")
            .bind("channel-a")
            .bind("aaaaaaaaaaa")
            .execute(catalog.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE videos SET channel_id = ?1 WHERE video_id = ?2")
            .bind("channel-b")
            .bind("bbbbbbbbbbb")
            .execute(catalog.pool())
            .await
            .unwrap();

        let filter = LookupFilter {
            preferred_channels: vec!["channel-b".to_string()],
            ..Default::default()
        };
        // No phrase index seeded for either video, so this exercises the
        // transcript-scan fallback, not the indexed branch.
        let hit = catalog
            .lookup_phrase("hello world", &filter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.video_id, "bbbbbbbbbbb");
    }

    #[tokio::test]
    async fn lookup_phrase_prefers_indexed_entry_over_scan() {
        let catalog = seeded_catalog().await;
        catalog
            .seed_phrase_index("aaaaaaaaaaa", "hello world", 0.0, 1.1)
            .await
            .unwrap();
        let hit = catalog
            .lookup_phrase("hello world", &LookupFilter::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text, "hello world");
    }

    #[tokio::test]
    async fn selection_prefers_largest_duration_then_lexicographic() {
        let catalog = Catalog::connect_in_memory().await.unwrap();
        catalog
            .seed_test_video("bbbbbbbbbbb", &[("hi", 0.0, 0.3)])
            .await
            .unwrap();
        catalog
            .seed_test_video("aaaaaaaaaaa", &[("hi", 0.0, 0.9)])
            .await
            .unwrap();
        let hit = catalog
            .lookup_word("hi", &LookupFilter::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.video_id, "aaaaaaaaaaa");
    }

    #[tokio::test]
    async fn stats_reflect_seeded_data() {
        let catalog = seeded_catalog().await;
        let stats = catalog.stats().await.unwrap();
        assert_eq!(stats.videos, 1);
        assert!(stats.has_transcripts);
        assert!(!stats.has_phrase_index);
    }
}
