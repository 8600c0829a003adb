//! Decoders for metadata blocks embedded in image containers.
//!
//! Each decoder works on an in-memory slice and reports regions at
//! `base_offset + position`, so the same code serves a PNG `eXIf` chunk, a
//! JPEG APP1 segment and a standalone file.

pub mod exif;
pub mod icc;
pub mod photoshop;
pub mod xmp;

pub use exif::{parse_exif, parse_exif_with};
pub use icc::{parse_icc, parse_icc_with};
pub use photoshop::{
    parse_photoshop, parse_photoshop_with, IimBlock, IimDataset, ImageResourceDataset,
};
pub use xmp::{parse_xmp, parse_xmp_with};
