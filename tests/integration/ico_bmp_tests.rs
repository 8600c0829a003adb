//! BMP and ICO integration tests.
//!
//! Tests verify:
//! - BMP file header, DIB header and pixel data regions
//! - BMP thumbnails decode to the stored color
//! - ICO directories with PNG and DIB frames nest each frame under its entry
//! - Truncated pixel data is flagged but keeps the walk going

use regionscan::{FileFormat, StyleFlags};

use super::test_utils::{
    bmp_file, ico_dib_frame, ico_file, png_file, scan_bytes, scan_detected, top_labels,
};

// =============================================================================
// BMP
// =============================================================================

#[test]
fn test_bmp_regions() {
    let data = bmp_file(3, 2, [0, 0, 255]);
    let (result, regions) = scan_bytes(FileFormat::Bmp, &data);
    result.unwrap();

    // 3 pixels * 3 bytes padded to 12 per row
    let labels = top_labels(&regions);
    assert_eq!(labels[0], format!("Bitmap file header: {} bytes, pixels at 54", data.len()));
    assert_eq!(labels[1], "BITMAPINFOHEADER: 3x2, 24 bpp, BI_RGB");
    assert_eq!(labels[2], "Pixel data (24 bytes)");
    assert_eq!(labels.len(), 3);

    let (header_id, _) = regions.find("Bitmap file header").unwrap();
    assert_eq!(regions.child_labels(Some(header_id))[0], "Signature: BM");
    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_bmp_thumbnail() {
    let data = bmp_file(4, 4, [0, 0, 255]);
    let (_, regions) = scan_bytes(FileFormat::Bmp, &data);

    let (_, pixels) = regions.find("Pixel data").unwrap();
    let thumbnail = pixels.thumbnail.as_ref().expect("BMP thumbnail");
    assert_eq!((thumbnail.width, thumbnail.height), (4, 4));
    assert_eq!(thumbnail.bit_depth, 32);
    // BGR red comes back as RGBA red
    assert_eq!(&thumbnail.pixels[..4], &[255, 0, 0, 255]);
}

#[test]
fn test_bmp_short_pixel_data_is_flagged() {
    let data = bmp_file(4, 4, [10, 20, 30]);
    let cut = &data[..data.len() - 8];

    let (result, regions) = scan_bytes(FileFormat::Bmp, cut);
    result.unwrap();
    let (_, pixels) = regions.find("Pixel data").unwrap();
    assert!(pixels.style.contains(StyleFlags::ERROR));
    assert_eq!(pixels.end(), cut.len() as u64);
}

#[test]
fn test_bmp_trailing_data() {
    let mut data = bmp_file(2, 2, [1, 2, 3]);
    data.extend_from_slice(&[0; 5]);

    let (result, regions) = scan_bytes(FileFormat::Bmp, &data);
    result.unwrap();
    let (_, trailing) = regions.find("Trailing data (5 bytes)").unwrap();
    assert!(trailing.style.contains(StyleFlags::MUTED_TEXT));
}

// =============================================================================
// ICO
// =============================================================================

#[test]
fn test_ico_with_png_and_dib_frames() {
    let png = png_file(16, 16);
    let dib = ico_dib_frame(8, 8);
    let data = ico_file(&[(16, 16, 32, png.clone()), (8, 8, 32, dib.clone())]);

    let (result, regions) = scan_bytes(FileFormat::Ico, &data);
    result.unwrap();

    let labels = top_labels(&regions);
    assert_eq!(labels[0], "Icon directory: 2 images");
    assert_eq!(
        labels[1],
        format!("Image 1: 16x16, 32 bpp, {} bytes at 38", png.len())
    );
    assert_eq!(
        labels[2],
        format!("Image 2: 8x8, 32 bpp, {} bytes at {}", dib.len(), 38 + png.len())
    );

    // PNG frame nested under its entry
    let (png_entry, _) = regions.find("Image 1:").unwrap();
    let png_children = regions.child_labels(Some(png_entry));
    assert_eq!(png_children[0], "PNG signature");
    assert_eq!(png_children.last().copied(), Some("IEND chunk: Image end"));
    let (_, signature) = regions.find("PNG signature").unwrap();
    assert_eq!(signature.offset, 38);

    // DIB frame nested under its entry
    let (dib_entry, _) = regions.find("Image 2:").unwrap();
    let dib_children = regions.child_labels(Some(dib_entry));
    assert_eq!(
        dib_children,
        [
            "BITMAPINFOHEADER: 8x16, 32 bpp, BI_RGB",
            "XOR image (32 bpp, 256 bytes)",
            "AND mask (1 bpp, 32 bytes)",
        ]
    );

    assert_eq!(regions.thumbnails().count(), 2);
    let (_, xor) = regions.find("XOR image").unwrap();
    let thumbnail = xor.thumbnail.as_ref().unwrap();
    assert_eq!((thumbnail.width, thumbnail.height), (8, 8));

    regions.validate(data.len() as u64).unwrap();
}

#[test]
fn test_ico_entry_past_end_is_skipped() {
    let dib = ico_dib_frame(4, 4);
    let mut data = ico_file(&[(4, 4, 32, dib)]);
    data.truncate(data.len() - 10);

    let (result, regions) = scan_bytes(FileFormat::Ico, &data);
    result.unwrap();

    let (entry_id, entry) = regions.find("Image 1:").unwrap();
    assert!(entry.style.contains(StyleFlags::ERROR));
    assert!(entry.label_str().ends_with("[out of range]"));
    assert!(regions.child_labels(Some(entry_id)).is_empty());
}

#[test]
fn test_ico_detected() {
    let data = ico_file(&[(8, 8, 32, ico_dib_frame(8, 8))]);
    let (result, regions) = scan_detected(&data);
    assert_eq!(result.unwrap(), FileFormat::Ico);
    assert!(!regions.is_empty());

    let data = bmp_file(1, 1, [0, 0, 0]);
    let (result, _) = scan_detected(&data);
    assert_eq!(result.unwrap(), FileFormat::Bmp);
}
