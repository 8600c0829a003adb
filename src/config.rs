//! Command-line configuration for the `regionscan` binary.
//!
//! Every option can also be set through an environment variable with the
//! `REGIONSCAN_` prefix:
//!
//! - `REGIONSCAN_FORMAT` - Force a format instead of detecting it
//! - `REGIONSCAN_JSON` - Print JSON instead of the indented tree
//! - `REGIONSCAN_NO_THUMBNAILS` - Skip thumbnail decoding
//! - `REGIONSCAN_THUMBNAIL_MAX_DIM` - Longest thumbnail edge (default: 256)
//! - `REGIONSCAN_THUMBNAIL_MAX_BYTES` - Largest image decoded (default: 64MB)
//! - `REGIONSCAN_MAX_DEPTH` - Nesting limit for embedded streams (default: 8)
//! - `REGIONSCAN_BLOCK_SIZE` - File cache block size (default: 64KB)
//! - `REGIONSCAN_CACHE_BLOCKS` - File cache capacity in blocks (default: 64)

use std::path::PathBuf;

use clap::Parser;

use crate::io::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BLOCKS};
use crate::scan::{
    FileFormat, ScanOptions, DEFAULT_MAX_DEPTH, DEFAULT_THUMBNAIL_MAX_BYTES,
    DEFAULT_THUMBNAIL_MAX_DIM,
};

// =============================================================================
// Limits
// =============================================================================

/// Largest accepted thumbnail edge.
pub const MAX_THUMBNAIL_DIM: u32 = 4096;

/// Largest accepted nesting limit.
pub const MAX_DEPTH_LIMIT: u32 = 64;

/// Smallest and largest accepted cache block size.
pub const MIN_BLOCK_SIZE: usize = 512;
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// regionscan - Map the structure and metadata of an image file.
///
/// Walks WebP, PNG, GIF, BMP, ICO/CUR and JPEG containers (and standalone
/// TIFF/EXIF or ICC files) and prints every header, chunk and metadata field
/// with its byte range.
#[derive(Parser, Debug, Clone)]
#[command(name = "regionscan")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// File to scan.
    pub path: PathBuf,

    /// Scan as this format instead of detecting it
    /// (webp, png, gif, bmp, ico, jpeg, tiff, icc).
    #[arg(short, long, env = "REGIONSCAN_FORMAT")]
    pub format: Option<FileFormat>,

    // =========================================================================
    // Output
    // =========================================================================
    /// Print the regions as JSON.
    #[arg(long, default_value_t = false, env = "REGIONSCAN_JSON")]
    pub json: bool,

    /// Pretty-print JSON output (requires --json).
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    // =========================================================================
    // Scan Options
    // =========================================================================
    /// Do not decode thumbnails.
    #[arg(long, default_value_t = false, env = "REGIONSCAN_NO_THUMBNAILS")]
    pub no_thumbnails: bool,

    /// Longest edge of a decoded thumbnail in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_MAX_DIM, env = "REGIONSCAN_THUMBNAIL_MAX_DIM")]
    pub thumbnail_max_dim: u32,

    /// Largest encoded image, in bytes, decoded into a thumbnail.
    #[arg(
        long,
        default_value_t = DEFAULT_THUMBNAIL_MAX_BYTES,
        env = "REGIONSCAN_THUMBNAIL_MAX_BYTES"
    )]
    pub thumbnail_max_bytes: u64,

    /// Maximum nesting of embedded streams (ICO frames, EXIF thumbnails).
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, env = "REGIONSCAN_MAX_DEPTH")]
    pub max_depth: u32,

    // =========================================================================
    // File Cache
    // =========================================================================
    /// Block size in bytes for the file cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "REGIONSCAN_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of cached blocks.
    #[arg(long, default_value_t = DEFAULT_CACHE_BLOCKS, env = "REGIONSCAN_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.pretty && !self.json {
            return Err("--pretty only applies to JSON output; add --json".to_string());
        }

        if self.thumbnail_max_dim == 0 || self.thumbnail_max_dim > MAX_THUMBNAIL_DIM {
            return Err(format!(
                "thumbnail_max_dim must be between 1 and {}",
                MAX_THUMBNAIL_DIM
            ));
        }

        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(format!("max_depth must be between 1 and {}", MAX_DEPTH_LIMIT));
        }

        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err("block_size must be between 512B and 16MB".to_string());
        }

        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Scan options selected on the command line.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            thumbnails: !self.no_thumbnails,
            thumbnail_max_dim: self.thumbnail_max_dim,
            thumbnail_max_bytes: self.thumbnail_max_bytes,
            max_depth: self.max_depth,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
