//! Metadata decoder integration tests.
//!
//! Tests verify:
//! - EXIF values of four bytes stay inline while five-byte values get a region
//! - ICC, Photoshop and XMP decoders report regions at the caller's base offset
//! - Every decoder rejects foreign data without emitting regions

use regionscan::{
    parse_exif, parse_icc, parse_photoshop, parse_xmp, RegionId, RegionList, RegionSink,
    StyleFlags,
};

use super::test_utils::{
    ascii, icc_profile, iim_dataset, resource_block, tiff_le, xmp_packet, xyz_tag, TYPE_ASCII,
    TYPE_LONG,
};

// =============================================================================
// EXIF
// =============================================================================

#[test]
fn test_exif_inline_boundary() {
    let data = tiff_le(&[
        (0x010F, TYPE_ASCII, 4, ascii("abc")),
        (0x0110, TYPE_ASCII, 5, ascii("abcd")),
    ]);
    let mut regions = RegionList::new();
    parse_exif(&data, 500, None, &mut regions).unwrap();

    let (make_id, make) = regions.find("Make (ASCII x4): \"abc\"").unwrap();
    assert_eq!(make.offset, 500 + 10);
    assert_eq!(make.length, 12);
    assert!(regions.child_labels(Some(make_id)).is_empty());

    let (model_id, _) = regions.find("Model (ASCII x5): \"abcd\"").unwrap();
    let values: Vec<_> = regions.children(Some(model_id)).collect();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].1.label_str(), "Model value (5 bytes)");
    // Header, then an IFD of two entries
    assert_eq!(values[0].1.offset, 500 + 8 + 2 + 24 + 4);
    assert_eq!(values[0].1.length, 5);

    regions.validate(500 + data.len() as u64).unwrap();
}

#[test]
fn test_exif_parent_is_respected() {
    let data = tiff_le(&[(0x0100, TYPE_LONG, 1, 640u32.to_le_bytes().to_vec())]);
    let mut regions = RegionList::new();
    let root = regions.add_region(
        StyleFlags::NONE,
        0,
        data.len() as u32,
        Some("Container".to_string()),
        None,
    );
    parse_exif(&data, 0, Some(root), &mut regions).unwrap();

    let (_, header) = regions.find("TIFF header").unwrap();
    assert_eq!(header.parent, Some(root));
    assert!(regions.find("ImageWidth (LONG x1): 640").is_some());
}

#[test]
fn test_exif_rejects_foreign_data() {
    let mut regions = RegionList::new();
    let err = parse_exif(b"GIF89a\0\0\0\0", 0, None, &mut regions).unwrap_err();
    assert!(err.is_not_this_format());
    assert!(regions.is_empty());
}

// =============================================================================
// ICC
// =============================================================================

#[test]
fn test_icc_profile_regions() {
    let data = icc_profile(&[
        (*b"wtpt", xyz_tag(0.9642, 1.0, 0.8249)),
        (*b"bkpt", xyz_tag(0.0, 0.0, 0.0)),
    ]);
    let mut regions = RegionList::new();
    parse_icc(&data, 64, None, &mut regions).unwrap();

    let (profile_id, profile) = regions.find("ICC profile v4.3.0").unwrap();
    assert_eq!(profile.offset, 64);
    assert_eq!(profile.length as usize, data.len());
    assert!(!regions.child_labels(Some(profile_id)).is_empty());

    let (wtpt_id, wtpt) = regions.find("Tag 'wtpt'").unwrap();
    assert_eq!(wtpt.offset, 64 + 128 + 4);
    assert_eq!(
        regions.child_labels(Some(wtpt_id)),
        ["Type 'XYZ ': X 0.9642, Y 1.0000, Z 0.8249"]
    );
    assert!(regions.find("Tag 'bkpt'").is_some());
    regions.validate(64 + data.len() as u64).unwrap();
}

#[test]
fn test_icc_rejects_foreign_data() {
    let mut regions = RegionList::new();
    let err = parse_icc(&[0u8; 200], 0, None, &mut regions).unwrap_err();
    assert!(err.is_not_this_format());
    assert!(regions.is_empty());
}

// =============================================================================
// Photoshop
// =============================================================================

#[test]
fn test_photoshop_blocks_and_iptc() {
    let iim = [iim_dataset(2, 80, b"A. Photographer"), iim_dataset(2, 120, b"Dusk")].concat();
    let first = resource_block(0x0404, &iim);
    let data = [first.clone(), resource_block(0x0425, &[0x11; 16])].concat();

    let mut regions = RegionList::new();
    parse_photoshop(&data, 20, None, &mut regions).unwrap();

    let (_, iptc) = regions.find("8BIM 0x0404 IPTC-NAA record").unwrap();
    assert_eq!(iptc.offset, 20);
    assert_eq!(iptc.length as usize, first.len());
    assert!(regions.find("2:080 By-line: \"A. Photographer\"").is_some());
    assert!(regions.find("2:120 Caption/Abstract: \"Dusk\"").is_some());

    let (_, digest) = regions.find("8BIM 0x0425").unwrap();
    assert_eq!(digest.offset, 20 + first.len() as u64);
    assert!(digest.label_str().contains(&"11".repeat(16)));
    regions.validate(20 + data.len() as u64).unwrap();
}

#[test]
fn test_photoshop_overrun_is_flagged() {
    let mut data = resource_block(0x0424, b"<x/>");
    data[8..12].copy_from_slice(&400u32.to_be_bytes());

    let mut regions = RegionList::new();
    parse_photoshop(&data, 0, None, &mut regions).unwrap();
    let block = regions.get(RegionId::from_index(0)).unwrap();
    assert!(block.style.contains(StyleFlags::ERROR));
}

// =============================================================================
// XMP
// =============================================================================

#[test]
fn test_xmp_packet_regions() {
    let data = xmp_packet("Quay &amp; lights");
    let mut regions = RegionList::new();
    parse_xmp(&data, 7, None, &mut regions).unwrap();

    let (packet_id, packet) = regions.find("XMP packet (").unwrap();
    assert_eq!(packet.offset, 7);
    assert_eq!(packet.length as usize, data.len());

    let labels = regions.child_labels(Some(packet_id));
    assert_eq!(labels[0], "Dublin Core: format=image/jpeg, title=Quay & lights");
    assert!(labels[1].starts_with("x:xmpmeta"));
    regions.validate(7 + data.len() as u64).unwrap();
}

#[test]
fn test_xmp_rejects_foreign_data() {
    let mut regions = RegionList::new();
    let err = parse_xmp(b"{\"not\": \"xml\"}", 0, None, &mut regions).unwrap_err();
    assert!(err.is_not_this_format());
    assert!(regions.is_empty());
}
