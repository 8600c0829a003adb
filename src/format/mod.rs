//! Container walkers.
//!
//! Each walker reads one container format from the start of a
//! [`ScanContext`](crate::scan::ScanContext) window and emits regions for
//! its headers, chunks and payloads. Metadata found inside a container is
//! handed to the decoders in [`crate::metadata`]; images found inside one
//! (ICO frames, EXIF and Photoshop thumbnails) are walked again in a nested
//! window.
//!
//! - [`riff`] - RIFF/WebP chunks, including animation frames
//! - [`png`] - PNG chunks with CRC checks
//! - [`gif`] - GIF blocks, with an LZW decoder for the first frame
//! - [`bmp`] - BMP file header, DIB headers and pixel data
//! - [`ico`] - ICO/CUR directories and their PNG or DIB frames
//! - [`jpeg`] - JPEG segments and entropy-coded data

pub mod bmp;
pub mod gif;
pub mod ico;
pub mod jpeg;
pub mod png;
pub mod riff;
