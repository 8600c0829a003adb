//! GIF integration tests.
//!
//! Tests verify:
//! - Block order and offsets for a single-frame GIF with a graphic control extension
//! - The first frame decodes to the original color indices
//! - Transparency is applied for frames disposed to background
//! - Broken LZW data flags the frame without aborting the walk

use regionscan::{FileFormat, ScanOptions, StyleFlags};

use super::test_utils::{lzw_encode, scan_bytes, scan_bytes_with, top_labels, two_color_gif};

// =============================================================================
// Region Layout
// =============================================================================

#[test]
fn test_two_color_gif_region_order() {
    let (data, _) = two_color_gif(2, Some(1));
    let (result, regions) = scan_bytes(FileFormat::Gif, &data);
    result.unwrap();

    let labels = top_labels(&regions);
    assert_eq!(labels.len(), 7);
    assert_eq!(labels[0], "Header: GIF89a");
    assert_eq!(
        labels[1],
        "Logical screen descriptor: 16x16, global color table of 2 colors"
    );
    assert_eq!(labels[2], "Global color table (2 colors)");
    assert_eq!(
        labels[3],
        "Graphic control extension: delay 100 ms, disposal restore to background, transparent index 1"
    );
    assert_eq!(labels[4], "Image descriptor: 16x16 at (0, 0)");
    assert!(labels[5].starts_with("Image frame 1: LZW data, minimum code size 2"));
    assert_eq!(labels[6], "Trailer");

    let offsets: Vec<u64> = regions.children(None).map(|(_, r)| r.offset).collect();
    assert_eq!(&offsets[..5], &[0, 6, 13, 19, 27]);
    assert_eq!(offsets[5], 37);
    assert_eq!(offsets[6], data.len() as u64 - 1);

    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_frame_children() {
    let (data, _) = two_color_gif(0, None);
    let (_, regions) = scan_bytes(FileFormat::Gif, &data);

    let (frame_id, frame) = regions.find("Image frame 1").unwrap();
    let children = regions.child_labels(Some(frame_id));
    assert_eq!(children, ["LZW minimum code size: 2", "Image data sub-blocks"]);
    // Frame covers the code size byte through the block terminator
    assert_eq!(frame.end(), data.len() as u64 - 1);
}

// =============================================================================
// First-Frame Decoding
// =============================================================================

#[test]
fn test_first_frame_decodes_to_indices() {
    let (data, indices) = two_color_gif(2, Some(1));
    let (_, regions) = scan_bytes(FileFormat::Gif, &data);

    let (_, frame) = regions.find("Image frame 1").unwrap();
    let thumbnail = frame.thumbnail.as_ref().expect("frame thumbnail");
    assert_eq!((thumbnail.width, thumbnail.height), (16, 16));
    assert_eq!(thumbnail.bit_depth, 8);
    assert_eq!(thumbnail.pixels.len(), 256);
    assert_eq!(thumbnail.pixels, indices);

    let palette = thumbnail.palette.as_ref().unwrap();
    assert_eq!(palette[0], [0, 0, 0, 255]);
    // Transparent index under restore-to-background disposal
    assert_eq!(palette[1], [255, 255, 255, 0]);
}

#[test]
fn test_transparency_ignored_without_background_disposal() {
    let (data, _) = two_color_gif(1, Some(1));
    let (_, regions) = scan_bytes(FileFormat::Gif, &data);

    let (_, frame) = regions.find("Image frame 1").unwrap();
    let palette = frame.thumbnail.as_ref().unwrap().palette.as_ref().unwrap();
    assert_eq!(palette[1][3], 255);
}

#[test]
fn test_thumbnail_is_shrunk() {
    let (data, _) = two_color_gif(0, None);
    let options = ScanOptions {
        thumbnail_max_dim: 4,
        ..ScanOptions::default()
    };
    let (_, regions) = scan_bytes_with(FileFormat::Gif, &data, &options);

    let (_, frame) = regions.find("Image frame 1").unwrap();
    let thumbnail = frame.thumbnail.as_ref().unwrap();
    assert_eq!((thumbnail.width, thumbnail.height), (4, 4));
    assert_eq!(thumbnail.pixels.len(), 16);
}

#[test]
fn test_thumbnails_disabled() {
    let (data, _) = two_color_gif(0, None);
    let options = ScanOptions {
        thumbnails: false,
        ..ScanOptions::default()
    };
    let (_, regions) = scan_bytes_with(FileFormat::Gif, &data, &options);
    assert_eq!(regions.thumbnails().count(), 0);
}

// =============================================================================
// Error Handling
// =============================================================================

#[test]
fn test_bad_lzw_flags_frame_and_continues() {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&[2, 0, 2, 0, 0x80, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
    data.extend_from_slice(&[0x2C, 0, 0, 0, 0, 2, 0, 2, 0, 0]);
    // clear(4) then code 7 with the next free slot at 6
    data.extend_from_slice(&[2, 1, 0b0011_1100, 0]);
    data.push(0x3B);

    let (result, regions) = scan_bytes(FileFormat::Gif, &data);
    result.unwrap();

    let (_, frame) = regions.find("Image frame 1").unwrap();
    assert!(frame.style.contains(StyleFlags::ERROR));
    assert!(frame.thumbnail.is_none());
    assert_eq!(top_labels(&regions).last().unwrap(), "Trailer");
}

#[test]
fn test_unknown_block_is_malformed() {
    let (mut data, _) = two_color_gif(0, None);
    let last = data.len() - 1;
    data[last] = 0x99;

    let (result, regions) = scan_bytes(FileFormat::Gif, &data);
    assert!(result.unwrap_err().is_malformed());
    // Everything before the bad introducer survives
    assert!(regions.find("Image frame 1").is_some());
}

#[test]
fn test_second_frame_is_not_decoded() {
    let indices = vec![1u8; 4];
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&[2, 0, 2, 0, 0x80, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
    for _ in 0..2 {
        data.extend_from_slice(&[0x2C, 0, 0, 0, 0, 2, 0, 2, 0, 0]);
        data.push(2);
        data.extend_from_slice(&lzw_encode(2, &indices));
    }
    data.push(0x3B);

    let (result, regions) = scan_bytes(FileFormat::Gif, &data);
    result.unwrap();
    let (_, second) = regions.find("Image frame 2").unwrap();
    assert!(second.thumbnail.is_none());
    assert_eq!(regions.thumbnails().count(), 1);
}
