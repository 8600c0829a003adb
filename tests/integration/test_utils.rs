//! Test utilities for integration tests.
//!
//! Builders for small but well-formed files of every supported format, a
//! reference GIF LZW encoder, and helpers for running scans over in-memory
//! data.

use std::collections::HashMap;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use regionscan::format::bmp::{BitmapInfoHeader, BI_RGB, INFO_HEADER_SIZE};
use regionscan::format::png::chunk_crc;
use regionscan::{
    scan_auto, scan_format, CancellationToken, FileFormat, MemorySource, RegionList, ScanError,
    ScanOptions,
};

// =============================================================================
// Scan Helpers
// =============================================================================

/// Scan `data` as `format` with default options.
pub fn scan_bytes(format: FileFormat, data: &[u8]) -> (Result<(), ScanError>, RegionList) {
    scan_bytes_with(format, data, &ScanOptions::default())
}

pub fn scan_bytes_with(
    format: FileFormat,
    data: &[u8],
    options: &ScanOptions,
) -> (Result<(), ScanError>, RegionList) {
    let mut source = MemorySource::new(data.to_vec());
    let mut regions = RegionList::new();
    let result = scan_format(
        format,
        &mut source,
        &mut regions,
        &CancellationToken::new(),
        options,
    );
    (result, regions)
}

/// Detect and scan `data`.
pub fn scan_detected(data: &[u8]) -> (Result<FileFormat, ScanError>, RegionList) {
    let mut source = MemorySource::new(data.to_vec());
    let mut regions = RegionList::new();
    let result = scan_auto(&mut source, &mut regions, &CancellationToken::new());
    (result, regions)
}

/// Labels of the top-level regions, in order.
pub fn top_labels(regions: &RegionList) -> Vec<String> {
    regions
        .child_labels(None)
        .into_iter()
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Real Images (encoded with the image crate)
// =============================================================================

/// A gradient RGB image.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    })
}

/// Encode a gradient as a complete PNG file.
pub fn png_file(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 16 % 256) as u8, (y * 16 % 256) as u8, 200, 255])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Encode a gradient as a baseline JPEG file.
pub fn jpeg_file(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(gradient(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

// =============================================================================
// PNG
// =============================================================================

/// One PNG chunk with a correct CRC.
pub fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&chunk_crc(kind, data).to_be_bytes());
    out
}

/// Insert `chunk` into a PNG file right after IHDR.
pub fn png_insert_after_ihdr(png: &[u8], chunk: &[u8]) -> Vec<u8> {
    let ihdr_end = 8 + 12 + 13;
    let mut out = png[..ihdr_end].to_vec();
    out.extend_from_slice(chunk);
    out.extend_from_slice(&png[ihdr_end..]);
    out
}

// =============================================================================
// JPEG
// =============================================================================

/// A length-prefixed JPEG segment.
pub fn jpeg_segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Insert `segment` into a JPEG file right after SOI.
pub fn jpeg_insert_after_soi(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// =============================================================================
// TIFF / EXIF
// =============================================================================

pub const TYPE_ASCII: u16 = 2;
pub const TYPE_SHORT: u16 = 3;
pub const TYPE_LONG: u16 = 4;

/// Little-endian TIFF block with one IFD. Values longer than four bytes are
/// stored after the IFD in entry order.
pub fn tiff_le(entries: &[(u16, u16, u32, Vec<u8>)]) -> Vec<u8> {
    let ifd_len = 2 + entries.len() * 12 + 4;
    let mut out = b"II*\0".to_vec();
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());

    let mut values = Vec::new();
    let values_at = 8 + ifd_len;
    for (tag, field_type, count, value) in entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        if value.len() <= 4 {
            let mut inline = value.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&((values_at + values.len()) as u32).to_le_bytes());
            values.extend_from_slice(value);
            if values.len() % 2 == 1 {
                values.push(0);
            }
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&values);
    out
}

/// ASCII value with its NUL terminator.
pub fn ascii(text: &str) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.push(0);
    out
}

// =============================================================================
// ICC
// =============================================================================

/// Display-class RGB profile, version 4.3, holding `tags` in order.
pub fn icc_profile(tags: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let table_len = 4 + 12 * tags.len();
    let mut data_at = 128 + table_len;
    let mut table = (tags.len() as u32).to_be_bytes().to_vec();
    let mut payload = Vec::new();
    for (sig, data) in tags {
        table.extend_from_slice(sig);
        table.extend_from_slice(&(data_at as u32).to_be_bytes());
        table.extend_from_slice(&(data.len() as u32).to_be_bytes());
        payload.extend_from_slice(data);
        while payload.len() % 4 != 0 {
            payload.push(0);
        }
        data_at = 128 + table_len + payload.len();
    }

    let total = 128 + table_len + payload.len();
    let mut header = vec![0u8; 128];
    header[0..4].copy_from_slice(&(total as u32).to_be_bytes());
    header[4..8].copy_from_slice(b"lcms");
    header[8..12].copy_from_slice(&[4, 0x30, 0, 0]);
    header[12..16].copy_from_slice(b"mntr");
    header[16..20].copy_from_slice(b"RGB ");
    header[20..24].copy_from_slice(b"XYZ ");
    header[36..40].copy_from_slice(b"acsp");
    // D50 illuminant
    header[68..80].copy_from_slice(&[0, 0, 0xF6, 0xD6, 0, 1, 0, 0, 0, 0, 0xD3, 0x2D]);

    let mut out = header;
    out.extend_from_slice(&table);
    out.extend_from_slice(&payload);
    out
}

/// `XYZ ` tag data for a single triple.
pub fn xyz_tag(x: f64, y: f64, z: f64) -> Vec<u8> {
    let mut out = b"XYZ \0\0\0\0".to_vec();
    for v in [x, y, z] {
        out.extend_from_slice(&((v * 65536.0).round() as i32).to_be_bytes());
    }
    out
}

// =============================================================================
// Photoshop / IPTC / XMP
// =============================================================================

/// One 8BIM resource block with an empty name.
pub fn resource_block(id: u16, data: &[u8]) -> Vec<u8> {
    let mut out = b"8BIM".to_vec();
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// One IPTC-IIM dataset with a standard length.
pub fn iim_dataset(record: u8, dataset: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x1C, record, dataset];
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// A small XMP packet with a Dublin Core title and format.
pub fn xmp_packet(title: &str) -> Vec<u8> {
    format!(
        concat!(
            "<?xpacket begin=\"\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>",
            "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">",
            "<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">",
            "<rdf:Description rdf:about=\"\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\" dc:format=\"image/jpeg\">",
            "<dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>",
            "</rdf:Description>",
            "</rdf:RDF>",
            "</x:xmpmeta>",
            "<?xpacket end=\"w\"?>"
        ),
        title
    )
    .into_bytes()
}

// =============================================================================
// RIFF / WebP
// =============================================================================

/// One RIFF chunk, unpadded.
pub fn riff_chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = fourcc.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// A RIFF/WEBP container around `chunks`.
pub fn webp_file(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = chunks.concat();
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&((4 + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(&body);
    out
}

/// VP8X payload with the given feature flags and canvas size.
pub fn vp8x_payload(flags: u8, width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![flags, 0, 0, 0];
    out.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    out.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    out
}

// =============================================================================
// BMP / ICO
// =============================================================================

pub fn info_header(width: i32, height: i32, bit_count: u16) -> BitmapInfoHeader {
    BitmapInfoHeader {
        size: INFO_HEADER_SIZE,
        width,
        height,
        planes: 1,
        bit_count,
        compression: BI_RGB,
        image_size: 0,
        x_pels_per_meter: 2835,
        y_pels_per_meter: 2835,
        colors_used: 0,
        colors_important: 0,
    }
}

/// 24-bpp bottom-up BMP filled with one color.
pub fn bmp_file(width: i32, height: i32, bgr: [u8; 3]) -> Vec<u8> {
    let header = info_header(width, height, 24);
    let stride = header.stride() as usize;
    let mut pixels = Vec::with_capacity(stride * height as usize);
    for _ in 0..height {
        let mut row: Vec<u8> = (0..width).flat_map(|_| bgr).collect();
        row.resize(stride, 0);
        pixels.extend_from_slice(&row);
    }

    let pixels_at = 14 + INFO_HEADER_SIZE as usize;
    let total = pixels_at + pixels.len();
    let mut out = b"BM".to_vec();
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&(pixels_at as u32).to_le_bytes());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&pixels);
    out
}

/// Headerless 32-bpp ICO frame: DIB header with doubled height, XOR image
/// and AND mask.
pub fn ico_dib_frame(width: i32, height: i32) -> Vec<u8> {
    let header = info_header(width, height * 2, 32);
    let mut out = header.to_bytes().to_vec();
    out.extend(std::iter::repeat(0x7F).take((width * height * 4) as usize));
    let and_stride = ((width as usize + 31) / 32) * 4;
    out.extend(std::iter::repeat(0).take(and_stride * height as usize));
    out
}

/// ICO file holding `frames` as (width, height, bpp, bytes).
pub fn ico_file(frames: &[(u8, u8, u16, Vec<u8>)]) -> Vec<u8> {
    let mut out = vec![0, 0, 1, 0];
    out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
    let mut offset = 6 + 16 * frames.len();
    for (w, h, bpp, data) in frames {
        out.extend_from_slice(&[*w, *h, 0, 0, 1, 0]);
        out.extend_from_slice(&bpp.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += data.len();
    }
    for (_, _, _, data) in frames {
        out.extend_from_slice(data);
    }
    out
}

// =============================================================================
// GIF
// =============================================================================

/// Reference LZW encoder producing a sub-block chain (terminator included).
///
/// Emits a clear code first, grows the code width after the slot that needs
/// it is assigned, and clears when the table is full.
pub fn lzw_encode(min_code_size: u8, indices: &[u8]) -> Vec<u8> {
    let clear = 1u16 << min_code_size;
    let stop = clear + 1;
    let mut width = min_code_size + 1;
    let mut next = stop + 1;
    let mut table: HashMap<(u16, u8), u16> = HashMap::new();

    let mut bytes = Vec::new();
    let mut acc = 0u32;
    let mut nbits = 0u8;
    let mut put = |code: u16, width: u8, bytes: &mut Vec<u8>| {
        acc |= (code as u32) << nbits;
        nbits += width;
        while nbits >= 8 {
            bytes.push(acc as u8);
            acc >>= 8;
            nbits -= 8;
        }
    };

    put(clear, width, &mut bytes);
    let mut current: Option<u16> = None;
    for &px in indices {
        let Some(p) = current else {
            current = Some(px as u16);
            continue;
        };
        if let Some(&code) = table.get(&(p, px)) {
            current = Some(code);
            continue;
        }
        put(p, width, &mut bytes);
        if next < 4096 {
            table.insert((p, px), next);
            next += 1;
            if next as usize > 1 << width && width < 12 {
                width += 1;
            }
        } else {
            put(clear, width, &mut bytes);
            table.clear();
            width = min_code_size + 1;
            next = stop + 1;
        }
        current = Some(px as u16);
    }
    if let Some(p) = current {
        put(p, width, &mut bytes);
        next += 1;
        if next as usize > 1 << width && width < 12 {
            width += 1;
        }
    }
    put(stop, width, &mut bytes);
    if nbits > 0 {
        bytes.push(acc as u8);
    }

    let mut out = Vec::new();
    for block in bytes.chunks(255) {
        out.push(block.len() as u8);
        out.extend_from_slice(block);
    }
    out.push(0);
    out
}

/// 16x16 checkerboard of two colors (black and white) with a graphic
/// control extension.
pub fn two_color_gif(disposal: u8, transparent: Option<u8>) -> (Vec<u8>, Vec<u8>) {
    let indices: Vec<u8> = (0..256).map(|i| ((i / 16 + i % 16) % 2) as u8).collect();

    let mut out = b"GIF89a".to_vec();
    // 16x16, global table of 2 colors
    out.extend_from_slice(&[16, 0, 16, 0, 0x80, 0, 0]);
    out.extend_from_slice(&[0, 0, 0, 255, 255, 255]);

    let packed = (disposal << 2) | u8::from(transparent.is_some());
    out.extend_from_slice(&[0x21, 0xF9, 4, packed, 10, 0, transparent.unwrap_or(0), 0]);

    out.extend_from_slice(&[0x2C, 0, 0, 0, 0, 16, 0, 16, 0, 0]);
    out.push(2);
    out.extend_from_slice(&lzw_encode(2, &indices));
    out.push(0x3B);
    (out, indices)
}
