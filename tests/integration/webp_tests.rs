//! WebP integration tests.
//!
//! Tests verify:
//! - A VP8X header announcing EXIF without an EXIF chunk yields two regions
//! - Metadata chunks are decoded under their chunk region
//! - Chunks are not padded to even lengths
//! - Malformed containers stop with an error and keep earlier regions

use regionscan::{FileFormat, StyleFlags};

use super::test_utils::{
    ascii, icc_profile, riff_chunk, scan_bytes, scan_detected, tiff_le, top_labels,
    vp8x_payload, webp_file, xmp_packet, xyz_tag, TYPE_ASCII,
};

// =============================================================================
// VP8X
// =============================================================================

#[test]
fn test_vp8x_with_exif_flag_and_no_exif_chunk() {
    let data = webp_file(&[riff_chunk(b"VP8X", &vp8x_payload(0x08, 64, 32))]);
    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();

    assert_eq!(regions.len(), 2);
    let labels = top_labels(&regions);
    assert_eq!(labels[0], format!("RIFF header: WEBP, {} bytes", data.len() - 8));
    assert_eq!(
        labels[1],
        "VP8X chunk: extended header, canvas 64x32, features: EXIF (10 bytes)"
    );
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_lossless_bitstream_summary() {
    // 0x2F, then width-1 = 9 and height-1 = 4 packed in 14-bit fields
    let bits: u32 = 9 | (4 << 14);
    let mut vp8l = vec![0x2F];
    vp8l.extend_from_slice(&bits.to_le_bytes());
    let data = webp_file(&[riff_chunk(b"VP8L", &vp8l)]);

    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();
    assert_eq!(
        top_labels(&regions)[1],
        "VP8L chunk: lossless bitstream, 10x5 (5 bytes)"
    );
}

// =============================================================================
// Metadata Chunks
// =============================================================================

#[test]
fn test_metadata_chunks_are_decoded() {
    let tiff = tiff_le(&[(0x0131, TYPE_ASCII, 8, ascii("GIMP 2."))]);
    let profile = icc_profile(&[(*b"wtpt", xyz_tag(0.9642, 1.0, 0.8249))]);
    let data = webp_file(&[
        riff_chunk(b"VP8X", &vp8x_payload(0x2C, 4, 4)),
        riff_chunk(b"ICCP", &profile),
        riff_chunk(b"EXIF", &tiff),
        riff_chunk(b"XMP ", &xmp_packet("Harbour")),
    ]);

    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();

    let labels = top_labels(&regions);
    assert_eq!(labels.len(), 5);
    assert!(labels[1].ends_with("features: ICC, EXIF, XMP (10 bytes)"));
    assert_eq!(labels[2], format!("ICCP chunk ({} bytes)", profile.len()));
    assert_eq!(labels[3], format!("EXIF chunk ({} bytes)", tiff.len()));
    assert!(labels[4].starts_with("XMP chunk ("));

    let (iccp_id, iccp) = regions.find("ICCP chunk").unwrap();
    let (_, icc) = regions.find("ICC profile v4.3.0").unwrap();
    assert_eq!(icc.parent, Some(iccp_id));
    assert_eq!(icc.offset, iccp.offset + 8);

    let (exif_id, _) = regions.find("EXIF chunk").unwrap();
    let (_, tiff_header) = regions.find("TIFF header").unwrap();
    assert_eq!(tiff_header.parent, Some(exif_id));
    assert!(regions.find("Software (ASCII x8): \"GIMP 2.\"").is_some());

    assert!(regions.find("Dublin Core: ").is_some());
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_exif_chunk_with_app1_prefix() {
    let tiff = tiff_le(&[(0x0131, TYPE_ASCII, 4, ascii("abc"))]);
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&tiff);
    let data = webp_file(&[riff_chunk(b"EXIF", &payload)]);

    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();

    let (_, chunk) = regions.find("EXIF chunk").unwrap();
    let (_, header) = regions.find("TIFF header").unwrap();
    assert_eq!(header.offset, chunk.offset + 8 + 6);
}

// =============================================================================
// Chunk Framing
// =============================================================================

#[test]
fn test_odd_chunks_are_not_padded() {
    let data = webp_file(&[riff_chunk(b"ABCD", &[1, 2, 3]), riff_chunk(b"EFGH", &[4])]);
    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();

    let chunks: Vec<_> = regions.children(None).skip(1).map(|(_, r)| r.clone()).collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].label_str(), "'ABCD' chunk (3 bytes)");
    assert_eq!((chunks[0].offset, chunks[0].length), (12, 11));
    assert_eq!(chunks[1].offset, 23);
}

#[test]
fn test_trailing_data_after_riff() {
    let mut data = webp_file(&[riff_chunk(b"VP8X", &vp8x_payload(0, 1, 1))]);
    data.extend_from_slice(b"junk");

    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    result.unwrap();
    let (_, trailing) = regions.find("Data after RIFF container").unwrap();
    assert!(trailing.style.contains(StyleFlags::MUTED_TEXT));
    assert_eq!(trailing.length, 4);
}

#[test]
fn test_chunk_past_end_is_malformed() {
    let mut data = webp_file(&[
        riff_chunk(b"VP8X", &vp8x_payload(0, 1, 1)),
        riff_chunk(b"VP8L", &[0x2F, 0, 0, 0, 0]),
    ]);
    // Declare more VP8L bytes than the container holds
    let len_at = 12 + 18 + 4;
    data[len_at] = 0x40;

    let (result, regions) = scan_bytes(FileFormat::WebP, &data);
    assert!(result.unwrap_err().is_malformed());
    assert_eq!(regions.len(), 2);
}

#[test]
fn test_detected_as_webp() {
    let data = webp_file(&[riff_chunk(b"VP8X", &vp8x_payload(0, 1, 1))]);
    let (result, _) = scan_detected(&data);
    assert_eq!(result.unwrap(), FileFormat::WebP);

    let (result, regions) = scan_bytes(FileFormat::WebP, b"RIFF\x04\0\0\0WAVE");
    assert!(result.unwrap_err().is_not_this_format());
    assert!(regions.is_empty());
}
