//! Artifact keys.
//!
//! An [`ArtifactKey`] identifies one derived artifact: the absolute,
//! NFC-normalized path of the source asset plus the [`Variant`] that was
//! rendered from it. Two spellings of the same path (relative vs absolute,
//! NFD vs NFC) always produce the same key.
//!
//! # Example
//!
//! ```
//! use artcache::cache::{ArtifactKey, Variant};
//!
//! let quick = ArtifactKey::new("/photos/café.png", Variant::Quick);
//! let full = ArtifactKey::new("/photos/cafe\u{0301}.png", Variant::Full);
//!
//! assert_eq!(quick.source(), full.source());
//! assert_ne!(quick.artifact_stem(), full.artifact_stem());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Number of hex characters kept from the BLAKE3 digest for file names.
const STEM_LEN: usize = 32;

/// Which rendition of a source an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Small, fast preview shown while the full thumbnail is pending.
    Quick,
    /// Full-quality thumbnail.
    Full,
}

impl Variant {
    /// Stable tag used in the index file and in artifact digests.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }

    /// Integer code stored in the index database.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Quick => 0,
            Self::Full => 1,
        }
    }

    /// Inverse of [`Variant::code`].
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Quick),
            1 => Some(Self::Full),
            _ => None,
        }
    }

    /// Variant matching the legacy `is_quick` flag.
    #[must_use]
    pub fn from_quick(is_quick: bool) -> Self {
        if is_quick {
            Self::Quick
        } else {
            Self::Full
        }
    }

    /// Whether this is the quick variant.
    #[must_use]
    pub fn is_quick(self) -> bool {
        self == Self::Quick
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identity of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    source: String,
    variant: Variant,
}

impl ArtifactKey {
    /// Build a key from a source path.
    ///
    /// Relative paths are made absolute against the current directory
    /// (symlinks are not resolved and the file need not exist), then the
    /// path text is normalized to NFC.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, variant: Variant) -> Self {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            source: absolute.to_string_lossy().nfc().collect(),
            variant,
        }
    }

    /// Rebuild a key from its stored parts without re-normalizing.
    ///
    /// Used when reading the index back from disk.
    #[must_use]
    pub fn from_parts(source: String, variant: Variant) -> Self {
        Self { source, variant }
    }

    /// Normalized absolute source path as text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalized absolute source path.
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.source)
    }

    /// Rendition of this key.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Deterministic file stem for the artifact of this key.
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.variant.tag().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.source.as_bytes());
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..STEM_LEN].to_string()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.source, self.variant)
    }
}
