//! PNG integration tests.
//!
//! Tests verify:
//! - Chunk regions for a PNG written by a real encoder
//! - The first IDAT carries a decoded thumbnail
//! - CRC mismatches are flagged without stopping the walk
//! - Chunks too short for their fields are flagged without stopping the walk
//! - eXIf and tEXt chunks are decoded into field regions

use regionscan::{FileFormat, StyleFlags};

use super::test_utils::{
    ascii, png_chunk, png_file, png_insert_after_ihdr, scan_bytes, tiff_le, top_labels,
    TYPE_ASCII,
};

// =============================================================================
// Encoder Output
// =============================================================================

#[test]
fn test_encoded_png_chunks() {
    let data = png_file(8, 4);
    let (result, regions) = scan_bytes(FileFormat::Png, &data);
    result.unwrap();

    let labels = top_labels(&regions);
    assert_eq!(labels[0], "PNG signature");
    assert!(labels[1].starts_with("IHDR chunk: Image header (8x4"));
    assert!(labels.iter().any(|l| l.starts_with("IDAT chunk: Image data")));
    assert_eq!(labels.last().unwrap(), "IEND chunk: Image end");

    let (ihdr_id, ihdr) = regions.find("IHDR chunk").unwrap();
    assert_eq!((ihdr.offset, ihdr.length), (8, 25));
    let fields = regions.child_labels(Some(ihdr_id));
    assert_eq!(fields[0], "Length: 13");
    assert_eq!(fields[1], "Type: IHDR");
    assert_eq!(fields[2], "Width: 8");
    assert_eq!(fields[3], "Height: 4");
    assert!(fields.last().unwrap().starts_with("CRC: "));

    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_first_idat_thumbnail() {
    let data = png_file(8, 4);
    let (_, regions) = scan_bytes(FileFormat::Png, &data);

    let (_, idat) = regions.find("IDAT chunk").unwrap();
    let thumbnail = idat.thumbnail.as_ref().expect("IDAT thumbnail");
    assert_eq!((thumbnail.width, thumbnail.height), (8, 4));
    assert_eq!(thumbnail.bit_depth, 32);
    assert_eq!(thumbnail.pixels.len(), 8 * 4 * 4);
    assert_eq!(regions.thumbnails().count(), 1);
}

// =============================================================================
// CRC Handling
// =============================================================================

#[test]
fn test_crc_mismatch_is_flagged() {
    let mut data = png_file(2, 2);
    // Last byte of the IHDR CRC
    data[8 + 12 + 13 - 1] ^= 0xFF;

    let (result, regions) = scan_bytes(FileFormat::Png, &data);
    result.unwrap();

    let (ihdr_id, ihdr) = regions.find("IHDR chunk").unwrap();
    assert!(ihdr.style.contains(StyleFlags::ERROR));
    assert!(ihdr.label_str().ends_with("[CRC mismatch]"));
    let crc_label = *regions.child_labels(Some(ihdr_id)).last().unwrap();
    assert!(crc_label.contains("(computed"));

    // The walk carried on to IEND
    assert!(regions.find("IEND chunk").is_some());
}

#[test]
fn test_chunk_past_end_is_malformed() {
    let data = png_file(2, 2);
    let cut = &data[..data.len() - 20];

    let (result, regions) = scan_bytes(FileFormat::Png, cut);
    let err = result.unwrap_err();
    assert!(err.is_malformed() || matches!(err, regionscan::ScanError::Truncated { .. }));
    assert!(regions.find("IHDR chunk").is_some());
}

#[test]
fn test_short_chunk_data_is_flagged() {
    // cHRM needs 32 bytes; the first three fields fit
    let chrm = png_chunk(b"cHRM", &[0x11; 12]);
    let data = png_insert_after_ihdr(&png_file(2, 2), &chrm);

    let (result, regions) = scan_bytes(FileFormat::Png, &data);
    result.unwrap();
    regions.validate(data.len() as u64).unwrap();

    let (chrm_id, chrm) = regions.find("cHRM chunk").unwrap();
    assert!(!chrm.style.contains(StyleFlags::ERROR));
    let fields = regions.child_labels(Some(chrm_id));
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0], "Length: 12");
    assert_eq!(fields[2], "Data (undecodable)");
    assert!(fields[3].starts_with("CRC: "));
    assert!(regions.find("White point x").is_none());

    let (_, undecodable) = regions.find("Data (undecodable)").unwrap();
    assert!(undecodable.style.contains(StyleFlags::ERROR));
    assert_eq!((undecodable.offset, undecodable.length), (chrm.offset + 8, 12));

    assert_eq!(top_labels(&regions).last().unwrap(), "IEND chunk: Image end");
}

// =============================================================================
// Metadata Chunks
// =============================================================================

#[test]
fn test_text_chunk_fields() {
    let text = png_chunk(b"tEXt", b"Title\0Harbour at dusk");
    let data = png_insert_after_ihdr(&png_file(2, 2), &text);

    let (result, regions) = scan_bytes(FileFormat::Png, &data);
    result.unwrap();

    let (id, chunk) = regions.find("tEXt chunk").unwrap();
    assert_eq!(chunk.label_str(), "tEXt chunk: Text ('Title')");
    let fields = regions.child_labels(Some(id));
    assert!(fields.contains(&"Keyword: Title"));
    assert!(fields.contains(&"Text: Harbour at dusk"));
}

#[test]
fn test_exif_chunk_is_decoded() {
    let tiff = tiff_le(&[(0x010E, TYPE_ASCII, 4, ascii("abc"))]);
    let chunk = png_chunk(b"eXIf", &tiff);
    let data = png_insert_after_ihdr(&png_file(2, 2), &chunk);

    let (result, regions) = scan_bytes(FileFormat::Png, &data);
    result.unwrap();

    let (exif_id, exif) = regions.find("eXIf chunk").unwrap();
    let (header_id, header) = regions.find("TIFF header").unwrap();
    assert_eq!(header.parent, Some(exif_id));
    assert_eq!(header.offset, exif.offset + 8);
    assert!(regions.get(header_id).is_some());

    let (_, entry) = regions
        .find("ImageDescription (ASCII x4): \"abc\"")
        .unwrap();
    assert!(entry.offset > exif.offset);
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_not_png() {
    let (result, regions) = scan_bytes(FileFormat::Png, b"GIF89a not a png at all");
    assert!(result.unwrap_err().is_not_this_format());
    assert!(regions.is_empty());
}
