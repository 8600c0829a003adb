//! Detection, file-backed scanning and worker integration tests.
//!
//! Tests verify:
//! - Every supported format is detected from its leading bytes
//! - Unknown data fails before any region is emitted
//! - Files are scanned through the block cache
//! - Worker scans can be joined and cancelled
//! - Region lists render as a tree and serialize to JSON

use std::io::Write;
use std::sync::mpsc::{self, Receiver};

use bytes::Bytes;
use tempfile::NamedTempFile;

use regionscan::{
    detect_format, scan_auto, spawn_scan, ByteSource, CancellationToken, FileFormat, FileSource,
    IoError, MemorySource, Origin, RegionList, ScanOptions,
};

use super::test_utils::{
    bmp_file, icc_profile, ico_dib_frame, ico_file, jpeg_file, png_file, riff_chunk, scan_detected,
    tiff_le, two_color_gif, vp8x_payload, webp_file, TYPE_LONG,
};

/// Source that blocks its first read until the test releases it.
struct GatedSource {
    inner: MemorySource,
    gate: Option<Receiver<()>>,
}

impl ByteSource for GatedSource {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn read(&mut self, max_len: usize) -> Result<Bytes, IoError> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        self.inner.read(max_len)
    }

    fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64, IoError> {
        self.inner.seek(offset, origin)
    }

    fn identifier(&self) -> &str {
        "gated"
    }
}

// =============================================================================
// Detection
// =============================================================================

#[test]
fn test_detects_every_format() {
    let samples = [
        (webp_file(&[riff_chunk(b"VP8X", &vp8x_payload(0, 1, 1))]), FileFormat::WebP),
        (png_file(2, 2), FileFormat::Png),
        (two_color_gif(0, None).0, FileFormat::Gif),
        (bmp_file(2, 2, [0, 0, 0]), FileFormat::Bmp),
        (ico_file(&[(4, 4, 32, ico_dib_frame(4, 4))]), FileFormat::Ico),
        (jpeg_file(8, 8), FileFormat::Jpeg),
        (tiff_le(&[(0x0100, TYPE_LONG, 1, vec![1, 0, 0, 0])]), FileFormat::Tiff),
        (icc_profile(&[]), FileFormat::Icc),
    ];

    for (data, expected) in samples {
        let mut source = MemorySource::new(data.clone());
        assert_eq!(detect_format(&mut source).unwrap(), expected);
        assert_eq!(source.position(), 0);

        let (result, regions) = scan_detected(&data);
        assert_eq!(result.unwrap(), expected, "{}", expected.name());
        assert!(!regions.is_empty());
        regions.validate(data.len() as u64).unwrap();
    }
}

#[test]
fn test_unknown_data_emits_nothing() {
    let (result, regions) = scan_detected(b"%PDF-1.7 not an image");
    assert!(result.unwrap_err().is_not_this_format());
    assert!(regions.is_empty());

    let (result, regions) = scan_detected(&[]);
    assert!(result.unwrap_err().is_not_this_format());
    assert!(regions.is_empty());
}

// =============================================================================
// File Sources
// =============================================================================

#[test]
fn test_scan_file_through_block_cache() {
    let data = jpeg_file(32, 16);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    // Small blocks so the walk crosses block boundaries
    let mut source = FileSource::with_capacity(file.path(), 64, 4).unwrap();
    assert_eq!(source.size(), data.len() as u64);

    let mut regions = RegionList::new();
    let format = scan_auto(&mut source, &mut regions, &CancellationToken::new()).unwrap();
    assert_eq!(format, FileFormat::Jpeg);
    assert!(source.block_reads() > 0);

    let mut memory = RegionList::new();
    scan_auto(
        &mut MemorySource::new(data),
        &mut memory,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(regions.render_tree(), memory.render_tree());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(FileSource::open(dir.path().join("absent.png")).is_err());
}

// =============================================================================
// Worker
// =============================================================================

#[test]
fn test_worker_scan_detects_and_collects() {
    let data = png_file(4, 4);
    let handle = spawn_scan(
        Box::new(MemorySource::new(data.clone())),
        None,
        ScanOptions::default(),
    )
    .unwrap();

    let outcome = handle.join().unwrap();
    assert_eq!(outcome.result.unwrap(), FileFormat::Png);
    assert_eq!(outcome.regions.child_labels(None)[0], "PNG signature");
    outcome.regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_worker_with_wrong_format_keeps_error() {
    let data = png_file(4, 4);
    let handle = spawn_scan(
        Box::new(MemorySource::new(data)),
        Some(FileFormat::Gif),
        ScanOptions::default(),
    )
    .unwrap();

    let outcome = handle.join().unwrap();
    assert!(outcome.result.unwrap_err().is_not_this_format());
    assert!(outcome.regions.is_empty());
}

#[test]
fn test_worker_cancellation_stops_scan() {
    let (release, gate) = mpsc::channel();
    let source = GatedSource {
        inner: MemorySource::new(png_file(8, 8)),
        gate: Some(gate),
    };
    let handle = spawn_scan(Box::new(source), Some(FileFormat::Png), ScanOptions::default())
        .unwrap();

    handle.cancel();
    assert!(handle.cancel_token().is_cancelled());
    let _ = release.send(());

    let outcome = handle.join().unwrap();
    assert!(outcome.result.unwrap_err().is_cancelled());
    // At most the region for the bytes already read
    assert!(outcome.regions.len() <= 1);
}

#[test]
fn test_cancelled_token_stops_direct_scan() {
    let token = CancellationToken::new();
    token.cancel();

    let mut regions = RegionList::new();
    let err = scan_auto(&mut MemorySource::new(png_file(2, 2)), &mut regions, &token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(regions.is_empty());
}

// =============================================================================
// Output
// =============================================================================

#[test]
fn test_render_tree_indents_children() {
    let data = png_file(2, 2);
    let (_, regions) = scan_detected(&data);
    let tree = regions.render_tree();

    assert!(tree.starts_with("00000000 +8        PNG signature\n"));
    assert!(tree.contains("\n00000008 +25       IHDR chunk"));
    assert!(tree.contains("\n  00000008 +4        Length: 13\n"));
    assert!(tree.contains("[thumbnail 2x2 32-bit]"));
}

#[test]
fn test_regions_serialize_to_json() {
    let data = png_file(2, 2);
    let (_, regions) = scan_detected(&data);

    let json = serde_json::to_value(&regions).unwrap();
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), regions.len());

    let first = &items[0];
    assert_eq!(first["offset"], 0);
    assert_eq!(first["length"], 8);
    assert_eq!(first["label"], "PNG signature");
    assert!(first["parent"].is_null());

    let ihdr_length = &items[2];
    assert_eq!(ihdr_length["label"], "Length: 13");
    assert_eq!(ihdr_length["parent"], 2);

    let (_, idat) = regions.find("IDAT chunk").unwrap();
    assert!(idat.thumbnail.is_some());
    let idat_json = items
        .iter()
        .find(|r| r["label"].as_str().is_some_and(|l| l.starts_with("IDAT chunk")))
        .unwrap();
    assert_eq!(idat_json["thumbnail"]["width"], 2);
    assert!(idat_json["thumbnail"].get("pixels").is_none());
}
