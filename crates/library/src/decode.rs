//! The consumed beatmap decoder interface.
//!
//! Text-format parsing is the host's business; the importer only needs the
//! handful of extracted fields that feed the object schema.

use derive_more::{Display, Error};
use mapstash_db::{BeatmapDifficulty, BeatmapMetadata};

/// A decode error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for decode operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file is not a parseable beatmap.
    #[display("malformed beatmap file")]
    Malformed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Everything the importer extracts from one hashable file.
#[derive(Debug, Clone, Default)]
pub struct DecodedBeatmap {
    pub online_id: Option<i64>,
    pub set_online_id: Option<i64>,
    /// Ruleset online id; resolution against the database happens at
    /// import time, and an entry whose ruleset is unknown or flagged
    /// unavailable is skipped.
    pub ruleset_id: i32,
    pub difficulty_name: String,
    pub metadata: BeatmapMetadata,
    pub difficulty: BeatmapDifficulty,
    pub distance_spacing: f64,
    pub beat_divisor: i32,
    pub grid_size: i32,
    pub timeline_zoom: f64,
}

/// Decodes a hashable file into an in-memory beatmap.
pub trait BeatmapDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DecodedBeatmap>;
}

#[cfg(any(test, feature = "mock"))]
mod line {
    use super::{BeatmapDecoder, DecodedBeatmap, ErrorKind, Result};

    /// A minimal `key: value` line decoder for tests.
    ///
    /// Recognized keys: `online_id`, `set_online_id`, `ruleset`, `name`,
    /// `title`, `artist`, `author`. Unknown keys are ignored; a file
    /// without a `ruleset` key (or with no parseable line at all) is
    /// malformed.
    #[derive(Default)]
    pub struct LineDecoder;

    impl BeatmapDecoder for LineDecoder {
        fn decode(&self, data: &[u8]) -> Result<DecodedBeatmap> {
            let Ok(text) = std::str::from_utf8(data) else {
                exn::bail!(ErrorKind::Malformed);
            };
            let mut decoded = DecodedBeatmap::default();
            let mut ruleset_seen = false;
            for line in text.lines() {
                let Some((key, value)) = line.split_once(':') else { continue };
                let value = value.trim();
                match key.trim() {
                    "online_id" => decoded.online_id = value.parse().ok(),
                    "set_online_id" => decoded.set_online_id = value.parse().ok(),
                    "ruleset" => {
                        decoded.ruleset_id = value.parse().map_err(|_| ErrorKind::Malformed)?;
                        ruleset_seen = true;
                    },
                    "name" => decoded.difficulty_name = value.to_string(),
                    "title" => decoded.metadata.title = value.to_string(),
                    "artist" => decoded.metadata.artist = value.to_string(),
                    "author" => decoded.metadata.author = value.to_string(),
                    _ => {},
                }
            }
            if !ruleset_seen {
                exn::bail!(ErrorKind::Malformed);
            }
            Ok(decoded)
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::line::LineDecoder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_decoder_roundtrip() {
        let decoded = LineDecoder
            .decode(b"ruleset: 0\nonline_id: 42\nname: Insane\ntitle: A Song\n")
            .unwrap();
        assert_eq!(decoded.ruleset_id, 0);
        assert_eq!(decoded.online_id, Some(42));
        assert_eq!(decoded.difficulty_name, "Insane");
        assert_eq!(decoded.metadata.title, "A Song");
    }

    #[test]
    fn test_line_decoder_rejects_empty() {
        let err = LineDecoder.decode(b"").unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Malformed));
    }

    #[test]
    fn test_line_decoder_requires_ruleset() {
        assert!(LineDecoder.decode(b"title: No Ruleset\n").is_err());
    }
}
