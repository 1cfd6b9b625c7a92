//! Value records embedded in beatmap rows.

/// Descriptive metadata for a beatmap.
///
/// A value record: it has no identity of its own and is stored inline in
/// its owning beatmap's row. The romanised variants are optional because
/// most maps only carry the original-script fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeatmapMetadata {
    pub title: String,
    pub title_romanised: Option<String>,
    pub artist: String,
    pub artist_romanised: Option<String>,
    pub author: String,
    pub source: String,
    pub tags: String,
    /// Preview point in milliseconds; `-1` means unset.
    pub preview_time: i32,
    pub audio_file: String,
    pub background_file: String,
}

/// The six numeric difficulty parameters of a beatmap.
///
/// A value record, stored inline like [`BeatmapMetadata`].
#[derive(Debug, Clone, PartialEq)]
pub struct BeatmapDifficulty {
    pub drain_rate: f32,
    pub circle_size: f32,
    pub overall_difficulty: f32,
    pub approach_rate: f32,
    pub slider_multiplier: f64,
    pub slider_tick_rate: f64,
}

impl Default for BeatmapDifficulty {
    fn default() -> Self {
        Self {
            drain_rate: 5.0,
            circle_size: 5.0,
            overall_difficulty: 5.0,
            approach_rate: 5.0,
            slider_multiplier: 1.4,
            slider_tick_rate: 1.0,
        }
    }
}
