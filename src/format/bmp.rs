//! BMP and DIB walker.
//!
//! # File Layout
//!
//! ```text
//! Bytes 0-13:  BITMAPFILEHEADER ("BM", file size, reserved, pixel offset)
//! Bytes 14-:   DIB header, identified by its stored size
//!              [bitfield masks] [color table]
//! pixel offset: pixel rows, bottom-up unless height is negative
//! ```
//!
//! The DIB part is shared with ICO frames, which store a DIB without the
//! file header and with a doubled height covering the XOR image and the
//! 1-bpp AND mask.

use image::ImageFormat;
use tracing::debug;

use crate::error::ScanError;
use crate::io::{fourcc_str, read_u32_le, FieldReader};
use crate::metadata::icc;
use crate::region::{RegionId, StyleFlags};
use crate::scan::{absorb_nested, thumbnail, ScanContext};

const FORMAT: &str = "BMP";

/// Size of BITMAPFILEHEADER
pub const FILE_HEADER_SIZE: u64 = 14;

pub const CORE_HEADER_SIZE: u32 = 12;
pub const INFO_HEADER_SIZE: u32 = 40;
pub const V4_HEADER_SIZE: u32 = 108;
pub const V5_HEADER_SIZE: u32 = 124;

pub const BI_RGB: u32 = 0;
pub const BI_RLE8: u32 = 1;
pub const BI_RLE4: u32 = 2;
pub const BI_BITFIELDS: u32 = 3;
pub const BI_JPEG: u32 = 4;
pub const BI_PNG: u32 = 5;
pub const BI_ALPHABITFIELDS: u32 = 6;

/// 'MBED': V5 color space stored as an embedded profile
const PROFILE_EMBEDDED: u32 = 0x4D42_4544;
/// 'LINK': V5 color space given as a profile file name
const PROFILE_LINKED: u32 = 0x4C49_4E4B;

/// DIB header sizes this walker understands.
pub fn is_known_header_size(size: u32) -> bool {
    matches!(size, 12 | 40 | 52 | 56 | 108 | 124)
}

fn header_name(size: u32) -> &'static str {
    match size {
        12 => "BITMAPCOREHEADER",
        40 => "BITMAPINFOHEADER",
        52 => "BITMAPV2INFOHEADER",
        56 => "BITMAPV3INFOHEADER",
        108 => "BITMAPV4HEADER",
        124 => "BITMAPV5HEADER",
        _ => "DIB header",
    }
}

pub fn compression_name(compression: u32) -> &'static str {
    match compression {
        BI_RGB => "BI_RGB",
        BI_RLE8 => "BI_RLE8",
        BI_RLE4 => "BI_RLE4",
        BI_BITFIELDS => "BI_BITFIELDS",
        BI_JPEG => "BI_JPEG",
        BI_PNG => "BI_PNG",
        BI_ALPHABITFIELDS => "BI_ALPHABITFIELDS",
        11 => "BI_CMYK",
        12 => "BI_CMYKRLE8",
        13 => "BI_CMYKRLE4",
        _ => "unknown",
    }
}

// =============================================================================
// BITMAPINFOHEADER
// =============================================================================

/// The common 40-byte part of every DIB header (core headers are widened).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    /// Negative for top-down rows
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl BitmapInfoHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::little_endian(bytes);
        let size = r.u32(0)?;
        if size == CORE_HEADER_SIZE {
            return Ok(Self {
                size,
                width: r.u16(4)? as i32,
                height: r.u16(6)? as i32,
                planes: r.u16(8)?,
                bit_count: r.u16(10)?,
                compression: BI_RGB,
                image_size: 0,
                x_pels_per_meter: 0,
                y_pels_per_meter: 0,
                colors_used: 0,
                colors_important: 0,
            });
        }
        Ok(Self {
            size,
            width: r.i32(4)?,
            height: r.i32(8)?,
            planes: r.u16(12)?,
            bit_count: r.u16(14)?,
            compression: r.u32(16)?,
            image_size: r.u32(20)?,
            x_pels_per_meter: r.i32(24)?,
            y_pels_per_meter: r.i32(28)?,
            colors_used: r.u32(32)?,
            colors_important: r.u32(36)?,
        })
    }

    /// Serialize as a 40-byte BITMAPINFOHEADER.
    pub fn to_bytes(&self) -> [u8; INFO_HEADER_SIZE as usize] {
        let mut out = [0u8; INFO_HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..12].copy_from_slice(&self.height.to_le_bytes());
        out[12..14].copy_from_slice(&self.planes.to_le_bytes());
        out[14..16].copy_from_slice(&self.bit_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.compression.to_le_bytes());
        out[20..24].copy_from_slice(&self.image_size.to_le_bytes());
        out[24..28].copy_from_slice(&self.x_pels_per_meter.to_le_bytes());
        out[28..32].copy_from_slice(&self.y_pels_per_meter.to_le_bytes());
        out[32..36].copy_from_slice(&self.colors_used.to_le_bytes());
        out[36..40].copy_from_slice(&self.colors_important.to_le_bytes());
        out
    }

    pub fn is_core(&self) -> bool {
        self.size == CORE_HEADER_SIZE
    }

    pub fn abs_height(&self) -> u32 {
        self.height.unsigned_abs()
    }

    /// Bytes per pixel row, padded to 4 bytes.
    pub fn stride(&self) -> u64 {
        (self.width.unsigned_abs() as u64 * self.bit_count as u64).div_ceil(32) * 4
    }

    /// Number of color table entries following the header and masks.
    pub fn palette_len(&self) -> u64 {
        if self.colors_used > 0 && !self.is_core() {
            self.colors_used as u64
        } else if self.bit_count <= 8 {
            1 << self.bit_count
        } else {
            0
        }
    }

    pub fn palette_entry_size(&self) -> u64 {
        if self.is_core() {
            3
        } else {
            4
        }
    }

    /// Bytes of bitfield masks stored after a 40-byte header.
    pub fn trailing_mask_size(&self) -> u64 {
        if self.size != INFO_HEADER_SIZE {
            return 0;
        }
        match self.compression {
            BI_BITFIELDS => 12,
            BI_ALPHABITFIELDS => 16,
            _ => 0,
        }
    }

    pub fn is_uncompressed(&self) -> bool {
        matches!(self.compression, BI_RGB | BI_BITFIELDS | BI_ALPHABITFIELDS)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}x{}, {} bpp, {}{}",
            self.width,
            self.abs_height(),
            self.bit_count,
            compression_name(self.compression),
            if self.height < 0 { ", top-down" } else { "" }
        )
    }
}

// =============================================================================
// DIB Walker
// =============================================================================

/// Where the parts of a DIB ended up, relative to the walked window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DibLayout {
    pub header: BitmapInfoHeader,
    /// First byte after header, masks and color table
    pub tables_end: u64,
    /// Embedded profile (offset, length), window-relative
    pub profile: Option<(u64, u64)>,
}

/// Emit the DIB header at `at` with its masks and color table.
pub(crate) fn walk_dib(
    ctx: &mut ScanContext<'_>,
    at: u64,
    parent: Option<RegionId>,
) -> Result<DibLayout, ScanError> {
    let header_size = read_u32_le(&ctx.read_exact_at(at, 4)?);
    if !is_known_header_size(header_size) {
        return Err(ScanError::not_this_format(
            FORMAT,
            format!("unknown DIB header size {}", header_size),
        ));
    }
    let bytes = ctx.read_exact_at(at, header_size as usize)?;
    let header = BitmapInfoHeader::parse(&bytes)?;
    let r = FieldReader::little_endian(&bytes);

    let header_id = ctx.emit(
        StyleFlags::HEADER,
        at,
        header_size as u64,
        format!("{}: {}", header_name(header_size), header.summary()),
        parent,
    );
    emit_header_fields(ctx, &header, &r, at, header_id)?;

    let mut pos = at + header_size as u64;
    let mask_size = header.trailing_mask_size();
    if mask_size > 0 {
        let masks = ctx.read_exact_at(pos, mask_size as usize)?;
        let m = FieldReader::little_endian(&masks);
        let mut parts = vec![
            format!("R {:08X}", m.u32(0)?),
            format!("G {:08X}", m.u32(4)?),
            format!("B {:08X}", m.u32(8)?),
        ];
        if mask_size == 16 {
            parts.push(format!("A {:08X}", m.u32(12)?));
        }
        ctx.emit(
            StyleFlags::NONE,
            pos,
            mask_size,
            format!("Bitfield masks: {}", parts.join(", ")),
            parent,
        );
        pos += mask_size;
    }

    let palette_bytes = header.palette_len() * header.palette_entry_size();
    if palette_bytes > 0 {
        if pos + palette_bytes > ctx.size() {
            return Err(ScanError::malformed(FORMAT, "color table runs past end of data"));
        }
        ctx.emit(
            StyleFlags::NONE,
            pos,
            palette_bytes,
            format!("Color table ({} entries)", header.palette_len()),
            parent,
        );
        pos += palette_bytes;
    }

    let mut profile = None;
    if header_size == V5_HEADER_SIZE {
        let cs_type = r.u32(56)?;
        let offset = r.u32(112)? as u64;
        let len = r.u32(116)? as u64;
        if (cs_type == PROFILE_EMBEDDED || cs_type == PROFILE_LINKED) && len > 0 {
            profile = Some((at + offset, len));
        }
    }

    Ok(DibLayout {
        header,
        tables_end: pos,
        profile,
    })
}

fn emit_header_fields(
    ctx: &mut ScanContext<'_>,
    header: &BitmapInfoHeader,
    r: &FieldReader<'_>,
    at: u64,
    id: RegionId,
) -> Result<(), ScanError> {
    let parent = Some(id);
    ctx.emit(StyleFlags::NONE, at, 4, format!("Header size: {}", header.size), parent);
    if header.is_core() {
        ctx.emit(StyleFlags::NONE, at + 4, 2, format!("Width: {}", header.width), parent);
        ctx.emit(StyleFlags::NONE, at + 6, 2, format!("Height: {}", header.height), parent);
        ctx.emit(StyleFlags::NONE, at + 8, 2, format!("Planes: {}", header.planes), parent);
        ctx.emit(
            StyleFlags::NONE,
            at + 10,
            2,
            format!("Bits per pixel: {}", header.bit_count),
            parent,
        );
        return Ok(());
    }

    ctx.emit(StyleFlags::NONE, at + 4, 4, format!("Width: {}", header.width), parent);
    ctx.emit(StyleFlags::NONE, at + 8, 4, format!("Height: {}", header.height), parent);
    ctx.emit(StyleFlags::NONE, at + 12, 2, format!("Planes: {}", header.planes), parent);
    ctx.emit(StyleFlags::NONE, at + 14, 2, format!("Bits per pixel: {}", header.bit_count), parent);
    ctx.emit(
        StyleFlags::NONE,
        at + 16,
        4,
        format!("Compression: {} ({})", header.compression, compression_name(header.compression)),
        parent,
    );
    ctx.emit(StyleFlags::NONE, at + 20, 4, format!("Image size: {}", header.image_size), parent);
    ctx.emit(
        StyleFlags::NONE,
        at + 24,
        8,
        format!(
            "Resolution: {}x{} pixels per meter",
            header.x_pels_per_meter, header.y_pels_per_meter
        ),
        parent,
    );
    ctx.emit(StyleFlags::NONE, at + 32, 4, format!("Colors used: {}", header.colors_used), parent);
    ctx.emit(
        StyleFlags::NONE,
        at + 36,
        4,
        format!("Important colors: {}", header.colors_important),
        parent,
    );

    if header.size >= 52 {
        let alpha = if header.size >= 56 {
            format!(", A {:08X}", r.u32(52)?)
        } else {
            String::new()
        };
        ctx.emit(
            StyleFlags::NONE,
            at + 40,
            if header.size >= 56 { 16 } else { 12 },
            format!(
                "Bitfield masks: R {:08X}, G {:08X}, B {:08X}{}",
                r.u32(40)?,
                r.u32(44)?,
                r.u32(48)?,
                alpha
            ),
            parent,
        );
    }
    if header.size >= V4_HEADER_SIZE {
        let cs_type = r.fourcc(56)?;
        let mut cs = cs_type;
        cs.reverse();
        ctx.emit(
            StyleFlags::NONE,
            at + 56,
            4,
            format!("Color space: '{}'", fourcc_str(&cs)),
            parent,
        );
        ctx.emit(StyleFlags::MUTED_TEXT, at + 60, 36, "CIE endpoints", parent);
        ctx.emit(StyleFlags::MUTED_TEXT, at + 96, 12, "Gamma", parent);
    }
    if header.size >= V5_HEADER_SIZE {
        ctx.emit(StyleFlags::NONE, at + 108, 4, format!("Intent: {}", r.u32(108)?), parent);
        ctx.emit(
            StyleFlags::NONE,
            at + 112,
            8,
            format!("Profile: offset {}, {} bytes", r.u32(112)?, r.u32(116)?),
            parent,
        );
        ctx.emit(StyleFlags::MUTED_TEXT, at + 120, 4, "Reserved", parent);
    }
    Ok(())
}

/// Emit the embedded or linked profile of a V5 header.
pub(crate) fn emit_profile(
    ctx: &mut ScanContext<'_>,
    offset: u64,
    len: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    if offset + len > ctx.size() {
        ctx.emit(
            StyleFlags::ERROR,
            offset.min(ctx.size()),
            0,
            format!("Color profile at {} ({} bytes) is out of range", offset, len),
            parent,
        );
        return Ok(());
    }
    let data = ctx.read_exact_at(offset, len as usize)?;
    let id = ctx.emit(
        StyleFlags::NONE,
        offset,
        len,
        format!("Color profile ({} bytes)", len),
        parent,
    );
    if data.get(36..40) == Some(b"acsp".as_slice()) {
        let base = ctx.absolute(offset);
        let result = icc::decode(ctx.out(), &data, base, Some(id));
        absorb_nested(result, "BMP color profile", base)?;
    } else {
        let name = String::from_utf8_lossy(&data);
        debug!(profile = %name.trim_end_matches('\0'), "Linked BMP color profile");
    }
    Ok(())
}

// =============================================================================
// BMP Walker
// =============================================================================

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let size = ctx.size();
    if size < FILE_HEADER_SIZE + 4 {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than file header"));
    }
    let file_header = ctx.read_exact_at(0, (FILE_HEADER_SIZE + 4) as usize)?;
    if &file_header[0..2] != b"BM" {
        return Err(ScanError::not_this_format(FORMAT, "missing BM signature"));
    }
    let r = FieldReader::little_endian(&file_header);
    let dib_size = r.u32(14)?;
    if !is_known_header_size(dib_size) {
        return Err(ScanError::not_this_format(
            FORMAT,
            format!("unknown DIB header size {}", dib_size),
        ));
    }

    let file_size = r.u32(2)?;
    let pixel_offset = r.u32(10)? as u64;
    let header_id = ctx.emit(
        StyleFlags::HEADER,
        0,
        FILE_HEADER_SIZE,
        format!("Bitmap file header: {} bytes, pixels at {}", file_size, pixel_offset),
        None,
    );
    ctx.emit(StyleFlags::NONE, 0, 2, "Signature: BM", Some(header_id));
    let size_flags = if file_size as u64 == size {
        StyleFlags::NONE
    } else {
        StyleFlags::ERROR
    };
    ctx.emit(size_flags, 2, 4, format!("File size: {}", file_size), Some(header_id));
    ctx.emit(StyleFlags::MUTED_TEXT, 6, 4, "Reserved", Some(header_id));
    ctx.emit(
        StyleFlags::NONE,
        10,
        4,
        format!("Pixel data offset: {}", pixel_offset),
        Some(header_id),
    );

    let layout = walk_dib(ctx, FILE_HEADER_SIZE, None)?;
    let header = layout.header;

    let mut pixel_flags = StyleFlags::NONE;
    let pixel_at = if pixel_offset < layout.tables_end || pixel_offset > size {
        debug!(pixel_offset, tables_end = layout.tables_end, "BMP pixel offset out of place");
        pixel_flags |= StyleFlags::ERROR;
        layout.tables_end
    } else {
        pixel_offset
    };
    if pixel_at > layout.tables_end {
        ctx.emit(
            StyleFlags::MUTED_TEXT,
            layout.tables_end,
            pixel_at - layout.tables_end,
            "Gap",
            None,
        );
    }

    let expected = if header.is_uncompressed() {
        header.stride() * header.abs_height() as u64
    } else if header.image_size > 0 {
        header.image_size as u64
    } else {
        size - pixel_at
    };
    let available = size - pixel_at;
    if expected > available {
        pixel_flags |= StyleFlags::ERROR;
    }
    let pixel_len = expected.min(available);

    let profile = layout.profile.filter(|&(off, _)| off >= layout.tables_end);
    if let Some((off, len)) = profile.filter(|&(off, _)| off < pixel_at) {
        emit_profile(ctx, off, len, None)?;
    }

    let pixels_id = ctx.emit(
        pixel_flags,
        pixel_at,
        pixel_len,
        format!("Pixel data ({} bytes)", pixel_len),
        None,
    );
    let mut end = pixel_at + pixel_len;

    if let Some((off, len)) = profile.filter(|&(off, _)| off >= pixel_at) {
        if off > end && off <= size {
            ctx.emit(StyleFlags::MUTED_TEXT, end, off - end, "Gap", None);
        }
        emit_profile(ctx, off, len, None)?;
        end = end.max((off + len).min(size));
    }
    if end < size {
        ctx.emit(
            StyleFlags::MUTED_TEXT,
            end,
            size - end,
            format!("Trailing data ({} bytes)", size - end),
            None,
        );
    }

    thumbnail::attach_whole_stream(ctx, ImageFormat::Bmp, pixels_id)
}

/// Build a stand-alone BMP file from an ICO frame: a file header, the DIB
/// header with the height halved, and everything up to the end of the XOR
/// image.
pub fn synthesize_file(
    dib: &[u8],
    header: &BitmapInfoHeader,
    tables_end: u64,
    xor_len: u64,
) -> Option<Vec<u8>> {
    let end = usize::try_from(tables_end + xor_len).ok()?;
    if end > dib.len() || header.is_core() {
        return None;
    }
    let total = FILE_HEADER_SIZE as usize + end;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&((FILE_HEADER_SIZE + tables_end) as u32).to_le_bytes());
    out.extend_from_slice(&dib[..end]);

    let halved = header.height / 2;
    let at = FILE_HEADER_SIZE as usize + 8;
    out[at..at + 4].copy_from_slice(&halved.to_le_bytes());
    Some(out)
}
