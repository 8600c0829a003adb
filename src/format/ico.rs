//! ICO/CUR directory walker.
//!
//! ```text
//! ICONDIR       u16 reserved (0), u16 type (1 icon, 2 cursor), u16 count
//! ICONDIRENTRY  count x 16 bytes: w, h, colors, reserved, planes/hotspot x,
//!               bpp/hotspot y, u32 size, u32 absolute offset
//! ```
//!
//! Each image is either a complete PNG stream or a headerless DIB whose
//! height covers both the XOR image and the 1-bpp AND mask. Images are
//! walked in a window over their own bytes, under their directory entry.

use image::ImageFormat;
use tracing::{debug, warn};

use super::bmp::{self, BitmapInfoHeader};
use super::png;
use crate::error::ScanError;
use crate::io::FieldReader;
use crate::region::{RegionId, StyleFlags};
use crate::scan::{absorb_nested, thumbnail, ScanContext};

const FORMAT: &str = "ICO";

pub const DIRECTORY_HEADER_SIZE: u64 = 6;
pub const ENTRY_SIZE: u64 = 16;

pub const TYPE_ICON: u16 = 1;
pub const TYPE_CURSOR: u16 = 2;

/// One 16-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconEntry {
    pub width: u32,
    pub height: u32,
    pub color_count: u8,
    /// Color planes for icons, hotspot x for cursors
    pub planes_or_x: u16,
    /// Bits per pixel for icons, hotspot y for cursors
    pub bpp_or_y: u16,
    pub size: u32,
    pub offset: u32,
}

impl IconEntry {
    pub fn parse(bytes: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::little_endian(bytes);
        let dim = |v: u8| if v == 0 { 256 } else { v as u32 };
        Ok(Self {
            width: dim(r.u8(0)?),
            height: dim(r.u8(1)?),
            color_count: r.u8(2)?,
            planes_or_x: r.u16(4)?,
            bpp_or_y: r.u16(6)?,
            size: r.u32(8)?,
            offset: r.u32(12)?,
        })
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// Heuristic for streams that start with an icon directory.
pub fn looks_like_directory(head: &[u8]) -> bool {
    let r = FieldReader::little_endian(head);
    let (Ok(reserved), Ok(kind), Ok(count)) = (r.u16(0), r.u16(2), r.u16(4)) else {
        return false;
    };
    if reserved != 0 || !(kind == TYPE_ICON || kind == TYPE_CURSOR) || count == 0 {
        return false;
    }
    let directory_end = DIRECTORY_HEADER_SIZE + ENTRY_SIZE * count as u64;
    match IconEntry::parse(&head[DIRECTORY_HEADER_SIZE as usize..]) {
        Ok(entry) => {
            r.u8(9).map_or(false, |b| b == 0)
                && entry.size > 0
                && entry.offset as u64 >= directory_end
        }
        Err(_) => true,
    }
}

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let size = ctx.size();
    if size < DIRECTORY_HEADER_SIZE {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than directory header"));
    }
    let head = ctx.read_exact_at(0, DIRECTORY_HEADER_SIZE as usize)?;
    let r = FieldReader::little_endian(&head);
    let (reserved, kind, count) = (r.u16(0)?, r.u16(2)?, r.u16(4)?);
    if reserved != 0 || !(kind == TYPE_ICON || kind == TYPE_CURSOR) {
        return Err(ScanError::not_this_format(FORMAT, "bad directory header"));
    }
    let is_cursor = kind == TYPE_CURSOR;

    let directory_end = DIRECTORY_HEADER_SIZE + ENTRY_SIZE * count as u64;
    if directory_end > size {
        return Err(ScanError::malformed(
            FORMAT,
            format!("{} directory entries do not fit in {} bytes", count, size),
        ));
    }

    ctx.emit(
        StyleFlags::HEADER,
        0,
        DIRECTORY_HEADER_SIZE,
        format!(
            "{} directory: {} image{}",
            if is_cursor { "Cursor" } else { "Icon" },
            count,
            if count == 1 { "" } else { "s" }
        ),
        None,
    );

    let table = ctx.read_exact_at(DIRECTORY_HEADER_SIZE, (ENTRY_SIZE * count as u64) as usize)?;
    for index in 0..count as usize {
        ctx.out().check_cancelled()?;
        let at = DIRECTORY_HEADER_SIZE + ENTRY_SIZE * index as u64;
        let raw = &table[index * ENTRY_SIZE as usize..(index + 1) * ENTRY_SIZE as usize];
        let entry = IconEntry::parse(raw)?;

        let in_range =
            entry.offset as u64 >= directory_end && entry.end() <= size && entry.size > 0;
        let detail = if is_cursor {
            format!("hotspot ({}, {})", entry.planes_or_x, entry.bpp_or_y)
        } else {
            format!("{} bpp", entry.bpp_or_y)
        };
        let mut label = format!(
            "Image {}: {}x{}, {}, {} bytes at {}",
            index + 1,
            entry.width,
            entry.height,
            detail,
            entry.size,
            entry.offset
        );
        let flags = if in_range {
            StyleFlags::NONE
        } else {
            label.push_str(" [out of range]");
            StyleFlags::ERROR
        };
        let entry_id = ctx.emit(flags, at, ENTRY_SIZE, label, None);

        if !in_range {
            warn!(index, offset = entry.offset, size = entry.size, "Icon entry out of range");
            continue;
        }

        let offset = entry.offset as u64;
        let len = entry.size as u64;
        let magic = ctx.read_exact_at(offset, png::SIGNATURE.len().min(len as usize))?;
        let result = if magic[..] == png::SIGNATURE[..] {
            ctx.nested(offset, len, Some(entry_id), png::walk)
        } else {
            ctx.nested(offset, len, Some(entry_id), walk_frame_dib)
        };
        absorb_nested(result, "icon image", ctx.absolute(offset))?;
    }
    Ok(())
}

/// Walk a headerless DIB frame: header, tables, XOR image, AND mask.
fn walk_frame_dib(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let layout = bmp::walk_dib(ctx, 0, None)?;
    let header = layout.header;
    let size = ctx.size();
    let rows = header.abs_height() as u64 / 2;

    let xor_at = layout.tables_end;
    let xor_len = header.stride() * rows;
    let and_stride = (header.width.unsigned_abs() as u64).div_ceil(32) * 4;
    let and_len = and_stride * rows;

    let xor_flags = if xor_at + xor_len > size {
        StyleFlags::ERROR
    } else {
        StyleFlags::NONE
    };
    let xor_id = ctx.emit(
        xor_flags,
        xor_at,
        xor_len,
        format!("XOR image ({} bpp, {} bytes)", header.bit_count, xor_len),
        None,
    );

    let and_at = xor_at + xor_len;
    if and_at < size {
        let flags = if and_at + and_len > size {
            StyleFlags::ERROR
        } else {
            StyleFlags::NONE
        };
        ctx.emit(
            flags,
            and_at,
            and_len,
            format!("AND mask (1 bpp, {} bytes)", and_len),
            None,
        );
    } else if header.bit_count != 32 {
        debug!("Icon frame has no AND mask");
    }

    attach_frame_thumbnail(ctx, &header, layout.tables_end, xor_len, xor_id)
}

fn attach_frame_thumbnail(
    ctx: &mut ScanContext<'_>,
    header: &BitmapInfoHeader,
    tables_end: u64,
    xor_len: u64,
    region: RegionId,
) -> Result<(), ScanError> {
    let options = *ctx.options();
    if !options.thumbnails || ctx.size() > options.thumbnail_max_bytes {
        return Ok(());
    }
    let dib = ctx.read_all()?;
    match bmp::synthesize_file(&dib, header, tables_end, xor_len) {
        Some(file) => thumbnail::attach_bytes(ctx, &file, ImageFormat::Bmp, region),
        None => debug!("Icon frame too short for a thumbnail"),
    }
    Ok(())
}
