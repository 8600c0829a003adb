//! Scan orchestration: options, format detection and entry points.
//!
//! Every entry point takes a [`ByteSource`], a [`RegionSink`] and a
//! [`CancellationToken`]. Regions are pushed into the sink as they are found,
//! so a scan that fails part-way leaves everything emitted before the failure
//! in the sink.
//!
//! # Example
//!
//! ```no_run
//! use regionscan::{scan_auto, CancellationToken, FileSource, RegionList};
//!
//! let mut source = FileSource::open("photo.jpg")?;
//! let mut regions = RegionList::new();
//! let format = scan_auto(&mut source, &mut regions, &CancellationToken::new())?;
//! println!("{}: {} regions", format, regions.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cancel;
mod context;
pub mod thumbnail;
mod worker;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ScanError;
use crate::format::{bmp, gif, ico, jpeg, png, riff};
use crate::io::{read_u32_le, ByteSource};
use crate::metadata::{exif, icc};
use crate::region::RegionSink;

pub use cancel::CancellationToken;
pub use context::{Emitter, ScanContext};
pub(crate) use context::{absorb_nested, WalkFn};
pub use worker::{spawn_scan, ScanHandle, ScanOutcome};

// =============================================================================
// ScanOptions
// =============================================================================

/// Default longest edge of a decoded thumbnail.
pub const DEFAULT_THUMBNAIL_MAX_DIM: u32 = 256;

/// Default cap on the encoded bytes handed to a thumbnail decoder (64MB).
pub const DEFAULT_THUMBNAIL_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Default limit on nested scans (ICO frame, EXIF thumbnail, ...).
pub const DEFAULT_MAX_DEPTH: u32 = 8;

/// Knobs that change what a scan produces, not what it recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Decode thumbnails for image chunks
    pub thumbnails: bool,
    /// Longest edge of a decoded thumbnail in pixels
    pub thumbnail_max_dim: u32,
    /// Largest encoded image that will be decoded into a thumbnail
    pub thumbnail_max_bytes: u64,
    /// Maximum nesting of re-entrant scans
    pub max_depth: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            thumbnails: true,
            thumbnail_max_dim: DEFAULT_THUMBNAIL_MAX_DIM,
            thumbnail_max_bytes: DEFAULT_THUMBNAIL_MAX_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

// =============================================================================
// FileFormat
// =============================================================================

/// Formats the scanner can walk from the start of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    WebP,
    Png,
    Gif,
    Bmp,
    Ico,
    Jpeg,
    /// Standalone TIFF/EXIF block
    Tiff,
    /// Standalone ICC profile
    Icc,
}

impl FileFormat {
    pub const ALL: [FileFormat; 8] = [
        FileFormat::WebP,
        FileFormat::Png,
        FileFormat::Gif,
        FileFormat::Bmp,
        FileFormat::Ico,
        FileFormat::Jpeg,
        FileFormat::Tiff,
        FileFormat::Icc,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            FileFormat::WebP => "WebP",
            FileFormat::Png => "PNG",
            FileFormat::Gif => "GIF",
            FileFormat::Bmp => "BMP",
            FileFormat::Ico => "ICO",
            FileFormat::Jpeg => "JPEG",
            FileFormat::Tiff => "TIFF",
            FileFormat::Icc => "ICC",
        }
    }

    fn walker(self) -> WalkFn {
        match self {
            FileFormat::WebP => riff::walk,
            FileFormat::Png => png::walk,
            FileFormat::Gif => gif::walk,
            FileFormat::Bmp => bmp::walk,
            FileFormat::Ico => ico::walk,
            FileFormat::Jpeg => jpeg::walk,
            FileFormat::Tiff => exif::walk_stream,
            FileFormat::Icc => icc::walk_stream,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webp" | "riff" => Ok(FileFormat::WebP),
            "png" => Ok(FileFormat::Png),
            "gif" => Ok(FileFormat::Gif),
            "bmp" | "dib" => Ok(FileFormat::Bmp),
            "ico" | "cur" => Ok(FileFormat::Ico),
            "jpeg" | "jpg" => Ok(FileFormat::Jpeg),
            "tiff" | "tif" | "exif" => Ok(FileFormat::Tiff),
            "icc" | "icm" => Ok(FileFormat::Icc),
            other => Err(format!(
                "unknown format '{}' (expected one of: webp, png, gif, bmp, ico, jpeg, tiff, icc)",
                other
            )),
        }
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Bytes examined by [`detect_format`]; enough to reach the ICC `acsp` magic.
const DETECT_BYTES: usize = 40;

/// Identify the format of `source` from its leading bytes.
///
/// The cursor is left at the start of the stream.
pub fn detect_format(source: &mut dyn ByteSource) -> Result<FileFormat, ScanError> {
    source.seek(0, crate::io::Origin::Begin)?;
    let head = source.read(DETECT_BYTES)?;
    source.seek(0, crate::io::Origin::Begin)?;

    detect_from_bytes(&head).ok_or_else(|| {
        ScanError::not_this_format("recognized", "leading bytes match no known signature")
    })
}

/// Signature checks behind [`detect_format`].
pub fn detect_from_bytes(head: &[u8]) -> Option<FileFormat> {
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some(FileFormat::WebP);
    }
    if head.starts_with(&png::SIGNATURE) {
        return Some(FileFormat::Png);
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some(FileFormat::Gif);
    }
    if head.len() >= 3 && head[0] == 0xFF && head[1] == 0xD8 && head[2] == 0xFF {
        return Some(FileFormat::Jpeg);
    }
    if head.starts_with(b"II*\0") || head.starts_with(b"MM\0*") {
        return Some(FileFormat::Tiff);
    }
    if head.len() >= 18 && head.starts_with(b"BM") {
        let dib_size = read_u32_le(&head[14..18]);
        if bmp::is_known_header_size(dib_size) {
            return Some(FileFormat::Bmp);
        }
    }
    if head.len() >= 40 && &head[36..40] == b"acsp" {
        return Some(FileFormat::Icc);
    }
    if head.len() >= 6 && ico::looks_like_directory(head) {
        return Some(FileFormat::Ico);
    }
    None
}

// =============================================================================
// Entry Points
// =============================================================================

/// Walk `source` as `format` with explicit options.
pub fn scan_format(
    format: FileFormat,
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
    options: &ScanOptions,
) -> Result<(), ScanError> {
    let out = Emitter::new(sink, *options, cancel.clone());
    let mut ctx = ScanContext::new(source, out, 0, None);
    ctx.seek_to(0)?;
    (format.walker())(&mut ctx)
}

/// Detect the format of `source`, then walk it.
pub fn scan_auto(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<FileFormat, ScanError> {
    scan_auto_with(source, sink, cancel, &ScanOptions::default())
}

/// [`scan_auto`] with explicit options.
pub fn scan_auto_with(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
    options: &ScanOptions,
) -> Result<FileFormat, ScanError> {
    cancel.check()?;
    let format = detect_format(source)?;
    scan_format(format, source, sink, cancel, options)?;
    Ok(format)
}

/// Walk a RIFF/WebP stream.
pub fn scan_webp(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::WebP, source, sink, cancel, &ScanOptions::default())
}

/// Walk a PNG stream.
pub fn scan_png(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Png, source, sink, cancel, &ScanOptions::default())
}

/// Walk a GIF87a/89a stream.
pub fn scan_gif(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Gif, source, sink, cancel, &ScanOptions::default())
}

/// Walk a Windows bitmap.
pub fn scan_bmp(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Bmp, source, sink, cancel, &ScanOptions::default())
}

/// Walk an ICO/CUR directory and its frames.
pub fn scan_ico(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Ico, source, sink, cancel, &ScanOptions::default())
}

/// Walk a JPEG/JFIF stream.
pub fn scan_jpeg(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Jpeg, source, sink, cancel, &ScanOptions::default())
}

/// Walk a standalone TIFF/EXIF block.
pub fn scan_tiff(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Tiff, source, sink, cancel, &ScanOptions::default())
}

/// Walk a standalone ICC profile.
pub fn scan_icc(
    source: &mut dyn ByteSource,
    sink: &mut dyn RegionSink,
    cancel: &CancellationToken,
) -> Result<(), ScanError> {
    scan_format(FileFormat::Icc, source, sink, cancel, &ScanOptions::default())
}
