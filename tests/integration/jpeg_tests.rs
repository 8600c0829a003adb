//! JPEG integration tests.
//!
//! Tests verify:
//! - Segment regions for a JPEG written by a real encoder
//! - Entropy-coded data ends at EOI and carries the thumbnail
//! - APP1 Exif, APP1 XMP, APP2 ICC and APP13 Photoshop payloads are decoded
//! - Progressive scans are delimited by the next real marker
//! - Segments too short for their fields are flagged without stopping the walk

use regionscan::{FileFormat, StyleFlags};

use super::test_utils::{
    ascii, icc_profile, iim_dataset, jpeg_file, jpeg_insert_after_soi, jpeg_segment,
    resource_block, scan_bytes, tiff_le, top_labels, xmp_packet, xyz_tag, TYPE_ASCII,
    TYPE_SHORT,
};

// =============================================================================
// Encoder Output
// =============================================================================

#[test]
fn test_encoded_jpeg_segments() {
    let data = jpeg_file(16, 8);
    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let labels = top_labels(&regions);
    assert_eq!(labels.first().unwrap(), "SOI: Start of image");
    assert_eq!(labels.last().unwrap(), "EOI: End of image");
    assert!(labels.iter().any(|l| l.starts_with("SOF0: ") && l.contains("16x8")));
    assert!(labels.iter().any(|l| l == "DQT: Define quantization tables"));
    assert!(labels.iter().any(|l| l.starts_with("SOS: Start of scan")));

    let (_, eoi) = regions.find("EOI").unwrap();
    assert_eq!(eoi.offset, data.len() as u64 - 2);
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_entropy_data_spans_to_eoi() {
    let data = jpeg_file(16, 8);
    let (_, regions) = scan_bytes(FileFormat::Jpeg, &data);

    let (_, sos) = regions.find("SOS").unwrap();
    let (_, scan) = regions.find("Entropy-coded data").unwrap();
    assert_eq!(scan.offset, sos.end());
    assert_eq!(scan.end(), data.len() as u64 - 2);

    let thumbnail = scan.thumbnail.as_ref().expect("JPEG thumbnail");
    assert_eq!((thumbnail.width, thumbnail.height), (16, 8));
}

// =============================================================================
// Embedded Metadata
// =============================================================================

#[test]
fn test_app1_exif() {
    let tiff = tiff_le(&[
        (0x0112, TYPE_SHORT, 1, 1u16.to_le_bytes().to_vec()),
        (0x010F, TYPE_ASCII, 6, ascii("Canon")),
    ]);
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&tiff);
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xE1, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let (app1_id, app1) = regions.find("APP1: Exif").unwrap();
    assert_eq!(app1.offset, 2);
    let children = regions.child_labels(Some(app1_id));
    assert_eq!(children[0], "Marker FFE1, length 52");
    assert_eq!(children[1], "Exif identifier");
    assert!(children[2].starts_with("TIFF header (II"));
    assert_eq!(children[3], "IFD0 (2 entries)");

    let (_, tiff_header) = regions.find("TIFF header").unwrap();
    assert_eq!(tiff_header.offset, 2 + 4 + 6);

    assert!(regions.find("Orientation (SHORT x1): 1 (top-left)").is_some());
    let (make_id, _) = regions.find("Make (ASCII x6): \"Canon\"").unwrap();
    // Six bytes do not fit inline
    assert_eq!(regions.child_labels(Some(make_id)), ["Make value (6 bytes)"]);
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_app1_xmp() {
    let mut payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    payload.extend_from_slice(&xmp_packet("Harbour"));
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xE1, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let (app1_id, _) = regions.find("APP1: http://ns.adobe.com/xap/1.0/").unwrap();
    let children = regions.child_labels(Some(app1_id));
    assert_eq!(children[1], "XMP namespace");
    assert!(children[2].starts_with("XMP packet ("));

    let (_, dc) = regions.find("Dublin Core: ").unwrap();
    assert!(dc.style.contains(StyleFlags::SUMMARY_LIST));
    assert!(dc.label_str().contains("title=Harbour"));
    assert!(dc.label_str().contains("format=image/jpeg"));
}

#[test]
fn test_app2_icc_single_chunk() {
    let profile = icc_profile(&[(*b"wtpt", xyz_tag(0.9642, 1.0, 0.8249))]);
    let mut payload = b"ICC_PROFILE\0".to_vec();
    payload.extend_from_slice(&[1, 1]);
    payload.extend_from_slice(&profile);
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xE2, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let (_, icc) = regions.find("ICC profile v4.3.0").unwrap();
    assert_eq!(icc.offset, 2 + 4 + 14);
    assert_eq!(icc.length as usize, profile.len());
    assert!(regions
        .find("Type 'XYZ ': X 0.9642, Y 1.0000, Z 0.8249")
        .is_some());
}

#[test]
fn test_app2_icc_multi_chunk_is_labeled() {
    let mut payload = b"ICC_PROFILE\0".to_vec();
    payload.extend_from_slice(&[1, 2]);
    payload.extend_from_slice(&[0u8; 32]);
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xE2, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();
    assert!(regions.find("ICC_PROFILE chunk 1 of 2").is_some());
    assert!(regions.find("ICC profile fragment (32 bytes)").is_some());
    assert!(regions.find("ICC profile v").is_none());
}

#[test]
fn test_app13_photoshop_iptc() {
    let iim = [
        iim_dataset(2, 0, &[0, 4]),
        iim_dataset(2, 5, b"Harbour"),
    ]
    .concat();
    let mut payload = b"Photoshop 3.0\0".to_vec();
    payload.extend_from_slice(&resource_block(0x0404, &iim));
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xED, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let (_, block) = regions.find("8BIM 0x0404 IPTC-NAA record").unwrap();
    assert!(block.label_str().ends_with("(2 datasets)"));
    let (iim_id, _) = regions.find("IPTC-IIM (2 datasets)").unwrap();
    assert_eq!(
        regions.child_labels(Some(iim_id)),
        ["2:000 Record version: 4", "2:005 Object name: \"Harbour\""]
    );
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_bad_exif_does_not_abort() {
    let payload = b"Exif\0\0XX*\0\0\0\0\0".to_vec();
    let data = jpeg_insert_after_soi(&jpeg_file(8, 8), &jpeg_segment(0xE1, &payload));

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();
    assert!(regions.find("APP1: Exif").is_some());
    assert_eq!(top_labels(&regions).last().unwrap(), "EOI: End of image");
}

// =============================================================================
// Short Payloads
// =============================================================================

#[test]
fn test_short_jfif_payload_does_not_abort() {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&jpeg_segment(0xE0, b"JFIF\0"));
    data.extend_from_slice(&jpeg_segment(0xFE, b"hi"));
    data.extend_from_slice(&[0xFF, 0xD9]);

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();
    regions.validate(data.len() as u64).unwrap();

    assert_eq!(
        top_labels(&regions),
        [
            "SOI: Start of image",
            "APP0: JFIF (5 bytes)",
            "COM: Comment \"hi\"",
            "EOI: End of image",
        ]
    );
    let (app0_id, _) = regions.find("APP0").unwrap();
    assert_eq!(
        regions.child_labels(Some(app0_id)),
        ["Marker FFE0, length 7", "Payload (5 bytes, undecodable)"]
    );
    let (_, payload) = regions.find("Payload (5 bytes, undecodable)").unwrap();
    assert!(payload.style.contains(StyleFlags::ERROR));
    assert_eq!((payload.offset, payload.length), (6, 5));
}

#[test]
fn test_short_adobe_and_frame_payloads_do_not_abort() {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&jpeg_segment(0xEE, b"Adobe\0\x64"));
    // SOF0 cut before the component count
    data.extend_from_slice(&jpeg_segment(0xC0, &[8, 0, 8, 0, 8]));
    data.extend_from_slice(&jpeg_segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    let scan_start = data.len();
    data.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34]);
    data.extend_from_slice(&[0xFF, 0xD9]);

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();
    regions.validate(data.len() as u64).unwrap();

    let undecodable: Vec<_> = regions.find_all("undecodable").collect();
    assert_eq!(undecodable.len(), 2);
    assert!(undecodable
        .iter()
        .all(|(_, r)| r.style.contains(StyleFlags::ERROR)));
    assert!(regions.find("Identifier: Adobe").is_none());
    assert!(regions.find("Precision:").is_none());

    // Without a frame header the scan end is found by the forward search
    let (_, scan) = regions.find("Entropy-coded data").unwrap();
    assert_eq!(scan.offset, scan_start as u64);
    assert_eq!(scan.end(), data.len() as u64 - 2);
    assert_eq!(top_labels(&regions).last().unwrap(), "EOI: End of image");
}

// =============================================================================
// Progressive Scans
// =============================================================================

#[test]
fn test_progressive_scan_skips_stuffed_and_restart_markers() {
    let mut data = vec![0xFF, 0xD8];
    // SOF2, 8-bit, 1x1, one component
    data.extend_from_slice(&jpeg_segment(0xC2, &[8, 0, 1, 0, 1, 1, 1, 0x11, 0]));
    data.extend_from_slice(&jpeg_segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    let scan_start = data.len();
    data.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
    let scan_end = data.len();
    data.extend_from_slice(&jpeg_segment(0xDA, &[1, 1, 0, 1, 63, 0]));
    data.extend_from_slice(&[0x78, 0x9A]);
    data.extend_from_slice(&[0xFF, 0xD9]);

    let (result, regions) = scan_bytes(FileFormat::Jpeg, &data);
    result.unwrap();

    let scans: Vec<_> = regions.find_all("Entropy-coded data").collect();
    assert_eq!(scans.len(), 2);
    assert_eq!(scans[0].1.offset, scan_start as u64);
    assert_eq!(scans[0].1.end(), scan_end as u64);
    assert_eq!(scans[1].1.end(), data.len() as u64 - 2);
}

#[test]
fn test_not_jpeg() {
    let (result, regions) = scan_bytes(FileFormat::Jpeg, b"\x89PNG\r\n\x1a\n");
    assert!(result.unwrap_err().is_not_this_format());
    assert!(regions.is_empty());
}
