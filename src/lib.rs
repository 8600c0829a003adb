//! # regionscan
//!
//! A format-aware binary metadata scanner.
//!
//! Given a byte stream holding a WebP, PNG, GIF, BMP, ICO/CUR or JPEG image
//! (or a standalone TIFF/EXIF block or ICC profile), the scanner walks the
//! container structure and reports a tree of labeled byte ranges: headers,
//! chunks, segments, and the fields of any EXIF, ICC, Photoshop/IPTC or XMP
//! metadata found inside. Embedded images are decoded into small thumbnails.
//!
//! ## Architecture
//!
//! - [`io`] - Seekable byte sources, with a block-cached file source
//! - [`region`] - Tagged regions and the sink that receives them
//! - [`mod@format`] - Container walkers
//! - [`metadata`] - EXIF/TIFF, ICC, Photoshop/IPTC and XMP decoders
//! - [`scan`] - Detection, entry points, cancellation and the worker thread
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use regionscan::{scan_auto, CancellationToken, FileSource, RegionList};
//!
//! let mut source = FileSource::open("image.webp")?;
//! let mut regions = RegionList::new();
//! scan_auto(&mut source, &mut regions, &CancellationToken::new())?;
//! print!("{}", regions.render_tree());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod metadata;
pub mod region;
pub mod scan;

// Re-export commonly used types
pub use config::Config;
pub use error::{IoError, LzwError, ScanError};
pub use io::{ByteSource, Direction, FileSource, MemorySource, Origin, SubSource};
pub use metadata::{
    parse_exif, parse_exif_with, parse_icc, parse_icc_with, parse_photoshop,
    parse_photoshop_with, parse_xmp, parse_xmp_with, IimBlock, IimDataset, ImageResourceDataset,
};
pub use region::{RegionId, RegionList, RegionSink, StyleFlags, TaggedRegion, ThumbnailImage};
pub use scan::{
    detect_format, detect_from_bytes, scan_auto, scan_auto_with, scan_bmp, scan_format, scan_gif,
    scan_icc, scan_ico, scan_jpeg, scan_png, scan_tiff, scan_webp, spawn_scan,
    CancellationToken, FileFormat, ScanHandle, ScanOptions, ScanOutcome,
};
