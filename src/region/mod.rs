//! Tagged regions and the sink that receives them.
//!
//! A scan produces a forest of [`TaggedRegion`]s: labeled, byte-addressed
//! spans of the source. Walkers never build the forest themselves; they push
//! each region into a [`RegionSink`] in scan order and get back a
//! [`RegionId`] they can use as the parent of later regions.

mod list;

use std::fmt;
use std::num::NonZeroU32;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;

pub use list::RegionList;

// =============================================================================
// RegionId
// =============================================================================

/// 1-based sequential handle assigned by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegionId(NonZeroU32);

impl RegionId {
    /// Build an id from its 1-based value. Returns `None` for zero.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(RegionId)
    }

    /// Id of the region stored at 0-based position `index`.
    pub fn from_index(index: usize) -> Self {
        let value = u32::try_from(index + 1).unwrap_or(u32::MAX);
        RegionId(NonZeroU32::new(value).unwrap_or(NonZeroU32::MAX))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// 0-based position in emission order.
    #[inline]
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// StyleFlags
// =============================================================================

/// Rendering hints forwarded verbatim to the sink.
///
/// The scanner never interprets these; they tell a viewer how to draw a
/// region (as a summary list, greyed out, as an error, as a header).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StyleFlags(u32);

impl StyleFlags {
    pub const NONE: StyleFlags = StyleFlags(0);
    /// Region summarizes its children (e.g. Dublin Core properties)
    pub const SUMMARY_LIST: StyleFlags = StyleFlags(1 << 0);
    /// Padding, reserved or otherwise uninteresting bytes
    pub const MUTED_TEXT: StyleFlags = StyleFlags(1 << 1);
    /// A recoverable inconsistency was detected in this region
    pub const ERROR: StyleFlags = StyleFlags(1 << 2);
    /// Fixed-size header of a structure
    pub const HEADER: StyleFlags = StyleFlags(1 << 3);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        StyleFlags(bits)
    }

    pub const fn contains(self, other: StyleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StyleFlags {
    type Output = StyleFlags;

    fn bitor(self, rhs: StyleFlags) -> StyleFlags {
        StyleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StyleFlags {
    fn bitor_assign(&mut self, rhs: StyleFlags) {
        self.0 |= rhs.0;
    }
}

// =============================================================================
// ThumbnailImage
// =============================================================================

/// Decoded pixels bound to a region.
///
/// Palette images carry one index per pixel in `pixels` and their colors in
/// `palette`; direct-color images carry RGBA8 and no palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailImage {
    pub width: u32,
    pub height: u32,
    /// Bits per pixel of `pixels` (8 for palette indices, 32 for RGBA)
    pub bit_depth: u8,
    #[serde(skip_serializing)]
    pub palette: Option<Vec<[u8; 4]>>,
    #[serde(skip_serializing)]
    pub pixels: Vec<u8>,
}

impl ThumbnailImage {
    /// Wrap an RGBA8 buffer.
    pub fn rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth: 32,
            palette: None,
            pixels,
        }
    }

    /// Wrap an 8-bit index buffer and its palette.
    pub fn indexed(width: u32, height: u32, indices: Vec<u8>, palette: Vec<[u8; 4]>) -> Self {
        Self {
            width,
            height,
            bit_depth: 8,
            palette: Some(palette),
            pixels: indices,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.palette.is_some()
    }
}

// =============================================================================
// TaggedRegion
// =============================================================================

/// A labeled span of the source, optionally nested under a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedRegion {
    pub offset: u64,
    pub length: u32,
    pub label: Option<String>,
    pub parent: Option<RegionId>,
    pub style: StyleFlags,
    pub thumbnail: Option<ThumbnailImage>,
}

impl TaggedRegion {
    /// One past the last byte covered.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    /// Label text, or an empty string for unlabeled regions.
    pub fn label_str(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

// =============================================================================
// RegionSink
// =============================================================================

/// Receiver of regions in scan order.
///
/// The scanner calls a sink from one thread at a time and never revises a
/// region after adding it, except through [`RegionSink::attach_thumbnail`].
pub trait RegionSink {
    /// Record a region and return its 1-based id.
    fn add_region(
        &mut self,
        flags: StyleFlags,
        offset: u64,
        length: u32,
        label: Option<String>,
        parent: Option<RegionId>,
    ) -> RegionId;

    /// Bind decoded pixels to a previously added region.
    fn attach_thumbnail(&mut self, region: RegionId, thumbnail: ThumbnailImage);
}
