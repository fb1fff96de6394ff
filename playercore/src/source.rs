//! Media source descriptors and their validation.
//!
//! [`MediaSource`] is what the lesson data layer hands over, unchecked.
//! [`MediaSource::resolve`] validates it against its kind and yields a
//! [`ResolvedSource`] whose locator is normalized: a playable URL for native
//! files, a bare video identifier for embedded kinds.

use url::Url;

use crate::errors::PlaybackError;
use crate::model::{EmbedTechnology, MediaKind};
use crate::time_utils::parse_offset;

const NATIVE_SCHEMES: [&str; 5] = ["http", "https", "blob", "data", "file"];
const YOUTUBE_ID_LEN: usize = 11;

#[derive(Clone, Debug, PartialEq)]
pub struct MediaSource {
    pub kind: MediaKind,
    pub locator: String,
    pub title: Option<String>,
    /// Saved position to restore once the backend is ready.
    pub resume_from: Option<f64>,
}

impl MediaSource {
    pub fn new(kind: MediaKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            title: None,
            resume_from: None,
        }
    }

    pub fn native(locator: impl Into<String>) -> Self {
        Self::new(MediaKind::NativeFile, locator)
    }

    pub fn youtube(locator: impl Into<String>) -> Self {
        Self::new(MediaKind::EmbeddedYouTube, locator)
    }

    pub fn vimeo(locator: impl Into<String>) -> Self {
        Self::new(MediaKind::EmbeddedVimeo, locator)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_resume_from(mut self, seconds: f64) -> Self {
        self.resume_from = Some(seconds);
        self
    }

    /// Checks that the locator matches the kind and normalizes it.
    pub fn resolve(&self) -> Result<ResolvedSource, PlaybackError> {
        let locator = self.locator.trim();
        if locator.is_empty() {
            return Err(PlaybackError::source_validation("empty locator"));
        }

        let (normalized, url_offset) = match self.kind {
            MediaKind::NativeFile => (validate_native_locator(locator)?, None),
            MediaKind::EmbeddedYouTube => {
                let id = extract_youtube_id(locator).ok_or_else(|| {
                    PlaybackError::SourceValidation(format!(
                        "'{locator}' is not a YouTube video identifier or URL"
                    ))
                })?;
                (id, extract_youtube_start(locator))
            }
            MediaKind::EmbeddedVimeo => {
                let id = extract_vimeo_id(locator).ok_or_else(|| {
                    PlaybackError::SourceValidation(format!(
                        "'{locator}' is not a Vimeo video identifier or URL"
                    ))
                })?;
                (id, None)
            }
        };

        let resume_from = match self.resume_from {
            Some(seconds) if !seconds.is_finite() || seconds < 0.0 => {
                return Err(PlaybackError::SourceValidation(format!(
                    "invalid resume position {seconds}"
                )));
            }
            Some(seconds) => Some(seconds),
            None => url_offset.filter(|s| *s > 0.0),
        };

        Ok(ResolvedSource {
            kind: self.kind,
            locator: normalized,
            title: self.title.clone(),
            resume_from,
        })
    }
}

/// A validated source; immutable for the lifetime of one session.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSource {
    kind: MediaKind,
    locator: String,
    title: Option<String>,
    resume_from: Option<f64>,
}

impl ResolvedSource {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Playable URL for native files, bare identifier for embeds.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn resume_from(&self) -> Option<f64> {
        self.resume_from
    }

    pub fn technology(&self) -> Option<EmbedTechnology> {
        self.kind.technology()
    }
}

fn validate_native_locator(locator: &str) -> Result<String, PlaybackError> {
    if locator.chars().any(char::is_whitespace) {
        return Err(PlaybackError::SourceValidation(format!(
            "media locator '{locator}' contains whitespace"
        )));
    }

    match Url::parse(locator) {
        Ok(url) if NATIVE_SCHEMES.contains(&url.scheme()) => Ok(locator.to_string()),
        Ok(url) => Err(PlaybackError::SourceValidation(format!(
            "unsupported media URL scheme '{}'",
            url.scheme()
        ))),
        // relative paths are resolved by the host against the page
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(locator.to_string()),
        Err(err) => Err(PlaybackError::SourceValidation(format!(
            "malformed media URL '{locator}': {err}"
        ))),
    }
}

fn is_youtube_id(candidate: &str) -> bool {
    candidate.len() == YOUTUBE_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn parse_loose_url(locator: &str) -> Option<Url> {
    if locator.contains("://") {
        Url::parse(locator).ok()
    } else {
        Url::parse(&format!("https://{locator}")).ok()
    }
}

/// Host without the `www.`, `m.` or `music.` prefix.
fn bare_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    for prefix in ["www.", "m.", "music."] {
        if let Some(stripped) = host.strip_prefix(prefix) {
            return Some(stripped.to_string());
        }
    }
    Some(host)
}

/// Extracts the 11-character video identifier from a bare identifier or any
/// of the accepted YouTube URL shapes.
pub fn extract_youtube_id(locator: &str) -> Option<String> {
    let locator = locator.trim();
    if is_youtube_id(locator) {
        return Some(locator.to_string());
    }

    let url = parse_loose_url(locator)?;
    let host = bare_host(&url)?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let candidate = match host.as_str() {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("embed" | "v" | "e" | "shorts" | "live") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    };

    candidate.filter(|id| is_youtube_id(id))
}

/// Start offset carried by a YouTube URL (`t=` or `start=`).
fn extract_youtube_start(locator: &str) -> Option<f64> {
    let url = parse_loose_url(locator)?;
    url.query_pairs()
        .find(|(key, _)| key == "t" || key == "start")
        .and_then(|(_, value)| parse_offset(&value))
}

/// Extracts the numeric Vimeo identifier from a bare identifier or a
/// `vimeo.com/...` / `player.vimeo.com/video/...` URL.
pub fn extract_vimeo_id(locator: &str) -> Option<String> {
    let locator = locator.trim();
    let is_vimeo_id =
        |s: &str| !s.is_empty() && s.len() <= 12 && s.bytes().all(|b| b.is_ascii_digit());

    if is_vimeo_id(locator) {
        return Some(locator.to_string());
    }

    let url = parse_loose_url(locator)?;
    let host = bare_host(&url)?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    let candidate = match host.as_str() {
        "player.vimeo.com" => match segments.as_slice() {
            ["video", id, ..] => Some(*id),
            _ => None,
        },
        // vimeo.com/ID, vimeo.com/channels/<name>/ID, vimeo.com/groups/<name>/videos/ID
        "vimeo.com" => segments.iter().rev().find(|s| is_vimeo_id(**s)).copied(),
        _ => None,
    };

    candidate.filter(|id| is_vimeo_id(*id)).map(str::to_string)
}
