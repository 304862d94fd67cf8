//! Planner (C2, spec.md §4.2): greedy longest-phrase-match over a normalized
//! token list, producing an ordered partition of `[0, n)` into clip picks
//! and placeholders.

use crate::catalog::Catalog;
use crate::error::AppResult;
use crate::model::{LookupFilter, SegmentPick};
use crate::normalize::normalize_tokens;

/// Upper bound on phrase length considered by the greedy matcher, clamped
/// against the token count (spec.md §4.2).
const DEFAULT_MAX_PHRASE_LEN: usize = 5;

pub struct PlannerOptions {
    pub max_phrase_len: usize,
    pub preferred_channels: Vec<String>,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_phrase_len: DEFAULT_MAX_PHRASE_LEN,
            preferred_channels: Vec::new(),
        }
    }
}

/// Plan a sentence into an ordered sequence of `SegmentPick`s.
///
/// Greedy longest-phrase-match: at each position, try windows from
/// `maxPhraseLen` down to 1 word, take the first window with a catalog hit,
/// diversifying away from already-used videos where a hit exists elsewhere,
/// and falling back to a single-word placeholder only when no window at all
/// (down to length 1) produces a hit.
pub async fn plan(catalog: &Catalog, text: &str, options: &PlannerOptions) -> AppResult<Vec<SegmentPick>> {
    let tokens = normalize_tokens(text);
    let n = tokens.len();
    let max_len = options.max_phrase_len.max(1);

    let mut picks = Vec::new();
    let mut used_videos: Vec<String> = Vec::new();
    let mut i = 0usize;

    while i < n {
        let upper = max_len.min(n - i);
        let mut matched = None;

        'window: for len in (1..=upper).rev() {
            let span = &tokens[i..i + len];
            let phrase = span.join(" ");

            if len == 1 {
                let filter = diversified_filter(options, &used_videos);
                if let Some(clip) = catalog.lookup_word(&phrase, &filter).await? {
                    matched = Some((len, SegmentPick::Clip {
                        video_id: clip.video_id,
                        start: clip.start,
                        end: clip.end(),
                        text: phrase,
                        word_span: (i, i + len),
                    }));
                    break 'window;
                }
            } else {
                let filter = diversified_filter(options, &used_videos);
                if let Some(hit) = catalog.lookup_phrase(&phrase, &filter).await? {
                    matched = Some((len, SegmentPick::Clip {
                        video_id: hit.video_id,
                        start: hit.start,
                        end: hit.end,
                        text: phrase,
                        word_span: (i, i + len),
                    }));
                    break 'window;
                }
            }
        }

        match matched {
            Some((len, pick)) => {
                if let SegmentPick::Clip { video_id, .. } = &pick {
                    used_videos.push(video_id.clone());
                }
                picks.push(pick);
                i += len;
            }
            None => {
                picks.push(SegmentPick::Placeholder {
                    text: tokens[i].clone(),
                    word_span: (i, i + 1),
                });
                i += 1;
            }
        }
    }

    Ok(picks)
}

/// Retry a diversity-excluded lookup by waiving the exclusion if nothing
/// else turns up; `Catalog::lookup_word`/`lookup_phrase` already implement
/// the excludeVideos waiver internally, so this just seeds the filter.
fn diversified_filter(options: &PlannerOptions, used_videos: &[String]) -> LookupFilter {
    LookupFilter {
        exclude_videos: used_videos.to_vec(),
        preferred_channels: options.preferred_channels.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog_with_sentence() -> Catalog {
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
    async fn plan_partitions_input_exactly() {
        let catalog = catalog_with_sentence().await;
        let picks = plan(&catalog, "hello world how are you", &PlannerOptions::default())
            .await
            .unwrap();

        let mut covered = 0usize;
        for pick in &picks {
            let (s, e) = pick.word_span();
            assert_eq!(s, covered, "picks must partition [0,n) contiguously");
            covered = e;
        }
        assert_eq!(covered, 5);
    }

    #[tokio::test]
    async fn plan_prefers_longest_phrase_match() {
        let catalog = catalog_with_sentence().await;
        catalog
            .seed_phrase_index("aaaaaaaaaaa", "hello world", 0.0, 1.1)
            .await
            .unwrap();

        let picks = plan(&catalog, "hello world how are you", &PlannerOptions::default())
            .await
            .unwrap();

        assert_eq!(picks[0].word_span(), (0, 2));
        assert_eq!(picks[0].text(), "hello world");
    }

    #[tokio::test]
    async fn plan_emits_placeholder_for_unknown_word() {
        let catalog = catalog_with_sentence().await;
        let picks = plan(&catalog, "hello xyzzy", &PlannerOptions::default())
            .await
            .unwrap();

        assert_eq!(picks.len(), 2);
        assert!(picks[1].is_placeholder());
        assert_eq!(picks[1].text(), "xyzzy");
    }

    #[tokio::test]
    async fn empty_input_yields_no_picks() {
        let catalog = catalog_with_sentence().await;
        let picks = plan(&catalog, "   ", &PlannerOptions::default()).await.unwrap();
        assert!(picks.is_empty());
    }
}
