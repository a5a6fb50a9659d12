use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// No compression: the body is wrapped in stored DEFLATE blocks.
pub const NO_COMPRESSION: i32 = 0;
/// Fastest compression.
pub const BEST_SPEED: i32 = 1;
/// Smallest output.
pub const BEST_COMPRESSION: i32 = 9;
/// The codec's default trade-off (level 6).
pub const DEFAULT_COMPRESSION: i32 = -1;

/// A validated gzip compression level.
///
/// Mirrors the usual gzip convention: `0` stores, `1` is fastest, `9` is
/// smallest and `-1` picks the codec default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "i32")]
pub struct Level(i32);

impl Level {
    /// Level `0`.
    pub const NONE: Level = Level(NO_COMPRESSION);
    /// Level `1`.
    pub const FASTEST: Level = Level(BEST_SPEED);
    /// Level `9`.
    pub const BEST: Level = Level(BEST_COMPRESSION);
    /// Level `-1`.
    pub const DEFAULT: Level = Level(DEFAULT_COMPRESSION);

    /// Validates a raw level.
    pub fn new(level: i32) -> Result<Self> {
        if (DEFAULT_COMPRESSION..=BEST_COMPRESSION).contains(&level) {
            Ok(Level(level))
        } else {
            Err(Error::InvalidLevel(level))
        }
    }

    /// Returns the raw level.
    pub fn get(self) -> i32 {
        self.0
    }

    pub(crate) fn into_flate2(self) -> flate2::Compression {
        match self.0 {
            DEFAULT_COMPRESSION => flate2::Compression::default(),
            level => flate2::Compression::new(level.unsigned_abs()),
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::DEFAULT
    }
}

impl TryFrom<i32> for Level {
    type Error = Error;

    fn try_from(level: i32) -> Result<Self> {
        Level::new(level)
    }
}

/// How a response `Content-Type` is compared against the excluded set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeMatch {
    /// Byte-for-byte comparison of the whole header value.
    ///
    /// `text/html` in the excluded set does **not** match
    /// `text/html; charset=utf-8`.
    #[default]
    Exact,
    /// Compare only the media type: parameters after `;` are dropped,
    /// whitespace is trimmed and case is ignored.
    IgnoreParameters,
}

/// Middleware configuration, fixed once the handler is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GzipConfig {
    level: Level,
    #[serde(rename = "exclude_content_types")]
    excluded_content_types: HashSet<String>,
    content_type_match: ContentTypeMatch,
}

impl GzipConfig {
    /// Creates a configuration with the given level and nothing excluded.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Sets the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a content type that must never be compressed.
    pub fn exclude_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.excluded_content_types.insert(content_type.into());
        self
    }

    /// Adds several excluded content types.
    pub fn exclude_content_types<I, S>(mut self, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_content_types
            .extend(content_types.into_iter().map(Into::into));
        self
    }

    /// Selects how content types are matched against the excluded set.
    pub fn content_type_match(mut self, mode: ContentTypeMatch) -> Self {
        self.content_type_match = mode;
        self
    }

    /// Returns the configured level.
    pub fn compression_level(&self) -> Level {
        self.level
    }

    /// Returns the excluded content types.
    pub fn excluded_content_types(&self) -> &HashSet<String> {
        &self.excluded_content_types
    }

    /// Returns `true` if a response with this content type must be sent as-is.
    pub fn is_excluded(&self, content_type: &str) -> bool {
        match self.content_type_match {
            ContentTypeMatch::Exact => self.excluded_content_types.contains(content_type),
            ContentTypeMatch::IgnoreParameters => {
                let essence = media_type(content_type);
                self.excluded_content_types
                    .iter()
                    .any(|excluded| media_type(excluded).eq_ignore_ascii_case(essence))
            }
        }
    }
}

fn media_type(content_type: &str) -> &str {
    content_type
        .split_once(';')
        .map_or(content_type, |(essence, _)| essence)
        .trim()
}
