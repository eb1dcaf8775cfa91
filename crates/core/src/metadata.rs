//! Video metadata and the persisted per-run record.
//!
//! [`VideoMetadata::from_completion`] turns the raw text returned by the
//! generative service into title/description/tags/thumbnail prompt. Any
//! malformed answer falls back to [`VideoMetadata::templated`], so the
//! metadata stage never fails a run because of bad model output.

use serde::{Deserialize, Serialize};

/// Minimum number of tags attached to an upload.
pub const MIN_TAGS: usize = 10;
/// Maximum number of tags attached to an upload.
pub const MAX_TAGS: usize = 20;
/// Platform limit on title length.
pub const MAX_TITLE_CHARS: usize = 100;

/// Appended to every thumbnail prompt before image generation.
pub const THUMBNAIL_STYLE_SUFFIX: &str =
    ". High quality, vibrant colors, professional YouTube thumbnail style, 16:9 aspect ratio";

/// Pool used for templated tags and for padding short tag lists.
pub const DEFAULT_TAGS: [&str; 20] = [
    "lofi",
    "lofi hip hop",
    "study music",
    "chill beats",
    "lofi beats",
    "beats to study to",
    "beats to relax to",
    "focus music",
    "relaxing music",
    "chillhop",
    "study beats",
    "instrumental",
    "calm music",
    "background music",
    "jazzhop",
    "sleep music",
    "coffee shop music",
    "work music",
    "ambient",
    "lo-fi",
];

/// Title, description, tags, and thumbnail prompt for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub thumbnail_prompt: String,
}

/// Where a [`VideoMetadata`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Generated,
    Template,
}

/// Lenient view of the model's JSON answer.
#[derive(Debug, Deserialize)]
struct RawMetadata {
    title: Option<String>,
    description: Option<String>,
    tags: Option<RawTags>,
    thumbnail_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<String>),
    Csv(String),
}

impl VideoMetadata {
    /// Deterministic metadata derived from the music prompt alone.
    pub fn templated(music_prompt: &str) -> Self {
        let parts = prompt_parts(music_prompt);
        let mood = parts.last().copied().unwrap_or("chill vibes");
        let ambience = parts.get(2).copied().unwrap_or("soft rain ambience");

        let title = truncate_chars(
            &format!("lofi beats to study & relax to | {mood}"),
            MAX_TITLE_CHARS,
        );
        let description = format!(
            "Relax, study, and focus with this lo-fi mix.\n\n\
             {music_prompt}.\n\n\
             Put on your headphones, grab a warm drink, and let the beats carry you \
             through your study session, late-night work, or quiet evening.\n\n\
             #lofi #studymusic #chillbeats #lofihiphop #relax"
        );
        let thumbnail_prompt = format!(
            "Cozy anime style lo-fi scene of a student studying by a window at night, \
             {ambience}, warm desk lamp light, plants and headphones, 16:9 ratio, YouTube thumbnail"
        );

        Self {
            title,
            description,
            tags: normalize_tags(Vec::new()),
            thumbnail_prompt,
        }
    }

    /// Parse a completion, falling back to [`Self::templated`] when it is
    /// not usable JSON or lacks a title or description.
    pub fn from_completion(raw: &str, music_prompt: &str) -> (Self, MetadataSource) {
        let body = strip_code_fences(raw);
        let parsed = match serde_json::from_str::<RawMetadata>(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Metadata completion is not valid JSON, using templated metadata");
                return (Self::templated(music_prompt), MetadataSource::Template);
            }
        };

        let title = parsed.title.map(|t| t.trim().to_string()).unwrap_or_default();
        let description = parsed
            .description
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        if title.is_empty() || description.is_empty() {
            tracing::warn!("Metadata completion lacks a title or description, using templated metadata");
            return (Self::templated(music_prompt), MetadataSource::Template);
        }

        let tags = match parsed.tags {
            Some(RawTags::List(list)) => list,
            Some(RawTags::Csv(csv)) => csv.split(',').map(str::to_string).collect(),
            None => Vec::new(),
        };
        let thumbnail_prompt = parsed
            .thumbnail_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| Self::templated(music_prompt).thumbnail_prompt);

        let metadata = Self {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description,
            tags: normalize_tags(tags),
            thumbnail_prompt,
        };
        (metadata, MetadataSource::Generated)
    }

    /// Thumbnail prompt with the fixed style suffix appended.
    pub fn enhanced_thumbnail_prompt(&self) -> String {
        format!("{}{THUMBNAIL_STYLE_SUFFIX}", self.thumbnail_prompt.trim_end_matches('.'))
    }
}

/// The JSON document written once per successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub timestamp_id: String,
    pub music_prompt: String,
    pub audio_path: String,
    pub video_path: String,
    pub thumbnail_path: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub thumbnail_prompt: String,
    pub video_id: String,
    pub video_url: String,
    pub upload_timestamp: String,
    pub privacy_status: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prompt_parts(music_prompt: &str) -> Vec<&str> {
    music_prompt
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Trim, de-duplicate (case-insensitively), cap at [`MAX_TAGS`], and pad
/// from [`DEFAULT_TAGS`] up to [`MIN_TAGS`].
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_TAGS);
    for tag in &tags {
        push_tag(&mut out, tag);
    }
    for tag in DEFAULT_TAGS {
        if out.len() >= MIN_TAGS {
            break;
        }
        push_tag(&mut out, tag);
    }
    out
}

fn push_tag(out: &mut Vec<String>, tag: &str) {
    let tag = tag.trim().trim_start_matches('#').trim();
    if tag.is_empty() || out.len() >= MAX_TAGS {
        return;
    }
    if !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        out.push(tag.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str =
        "Lofi study music, 80 BPM, soft rain ambience, mellow piano keys, late night relaxation";

    fn tags(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tag{i}")).collect()
    }

    #[test]
    fn parses_well_formed_completion() {
        let raw = r#"{"title": "Rainy Night Lofi", "description": "Beats for studying.",
                      "tags": ["lofi", "rain", "study"], "thumbnail_prompt": "anime girl by a rainy window"}"#;
        let (meta, source) = VideoMetadata::from_completion(raw, PROMPT);
        assert_eq!(source, MetadataSource::Generated);
        assert_eq!(meta.title, "Rainy Night Lofi");
        assert_eq!(meta.thumbnail_prompt, "anime girl by a rainy window");
        assert_eq!(&meta.tags[..3], &["lofi", "rain", "study"]);
        assert_eq!(meta.tags.len(), MIN_TAGS);
    }

    #[test]
    fn strips_markdown_code_fence() {
        let raw = "```json\n{\"title\": \"T\", \"description\": \"D\", \"tags\": [], \"thumbnail_prompt\": \"P\"}\n```";
        let (meta, source) = VideoMetadata::from_completion(raw, PROMPT);
        assert_eq!(source, MetadataSource::Generated);
        assert_eq!(meta.title, "T");
    }

    #[test]
    fn malformed_completion_falls_back_to_template() {
        let (meta, source) = VideoMetadata::from_completion("Sure! Here is your title: ...", PROMPT);
        assert_eq!(source, MetadataSource::Template);
        assert_eq!(meta, VideoMetadata::templated(PROMPT));
    }

    #[test]
    fn missing_title_falls_back_to_template() {
        let raw = r#"{"description": "D", "tags": ["a"]}"#;
        let (_, source) = VideoMetadata::from_completion(raw, PROMPT);
        assert_eq!(source, MetadataSource::Template);
    }

    #[test]
    fn templated_metadata_is_deterministic_and_complete() {
        let a = VideoMetadata::templated(PROMPT);
        let b = VideoMetadata::templated(PROMPT);
        assert_eq!(a, b);
        assert!(a.title.contains("late night relaxation"));
        assert!(a.description.contains(PROMPT));
        assert!(a.thumbnail_prompt.contains("soft rain ambience"));
        assert!((MIN_TAGS..=MAX_TAGS).contains(&a.tags.len()));
    }

    #[test]
    fn comma_separated_tags_are_accepted() {
        let raw = r#"{"title": "T", "description": "D", "tags": "lofi, chill, #study"}"#;
        let (meta, _) = VideoMetadata::from_completion(raw, PROMPT);
        assert_eq!(&meta.tags[..3], &["lofi", "chill", "study"]);
    }

    #[test]
    fn tags_are_capped_and_deduplicated() {
        let mut input = tags(30);
        input.insert(1, "TAG0".into());
        let out = normalize_tags(input);
        assert_eq!(out.len(), MAX_TAGS);
        assert_eq!(out.iter().filter(|t| t.eq_ignore_ascii_case("tag0")).count(), 1);
    }

    #[test]
    fn long_titles_are_truncated() {
        let long = "x".repeat(250);
        let raw = format!(r#"{{"title": "{long}", "description": "D"}}"#);
        let (meta, _) = VideoMetadata::from_completion(&raw, PROMPT);
        assert_eq!(meta.title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn enhanced_prompt_appends_style_once() {
        let meta = VideoMetadata {
            title: "t".into(),
            description: "d".into(),
            tags: vec![],
            thumbnail_prompt: "cozy room.".into(),
        };
        assert_eq!(
            meta.enhanced_thumbnail_prompt(),
            "cozy room. High quality, vibrant colors, professional YouTube thumbnail style, 16:9 aspect ratio"
        );
    }

    #[test]
    fn record_serializes_with_expected_keys() {
        let record = MetadataRecord {
            timestamp_id: "20261016_093000".into(),
            music_prompt: PROMPT.into(),
            audio_path: "audio/lofi_20261016_093000.mp3".into(),
            video_path: "audio/video_20261016_093000.mp4".into(),
            thumbnail_path: "thumbnails/thumb_20261016_093000.png".into(),
            title: "T".into(),
            description: "D".into(),
            tags: vec!["lofi".into()],
            thumbnail_prompt: "P".into(),
            video_id: "abc123".into(),
            video_url: "https://www.youtube.com/watch?v=abc123".into(),
            upload_timestamp: "2026-10-16T09:35:00+00:00".into(),
            privacy_status: "private".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "timestamp_id",
            "music_prompt",
            "audio_path",
            "video_path",
            "thumbnail_path",
            "title",
            "description",
            "tags",
            "thumbnail_prompt",
            "video_id",
            "video_url",
            "upload_timestamp",
            "privacy_status",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        let back: MetadataRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
