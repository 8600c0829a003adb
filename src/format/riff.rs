//! RIFF/WebP chunk walker.
//!
//! ```text
//! "RIFF" <u32 LE size> "WEBP"
//! <FourCC> <u32 LE size> <payload>   repeated
//! ```
//!
//! Chunk sizes are taken as exact: the walker does not skip an odd-size pad
//! byte. Bitstream headers (`VP8 `, `VP8L`, `VP8X`) are summarized in the
//! chunk label; metadata chunks are decoded into child regions, and `ANMF`
//! frames have their own sub-chunks walked as children.

use tracing::debug;

use crate::error::ScanError;
use crate::io::{fourcc_str, read_u32_le, FieldReader};
use crate::metadata::{exif, icc, xmp};
use crate::region::{RegionId, StyleFlags};
use crate::scan::{absorb_nested, Emitter, ScanContext};

const FORMAT: &str = "WebP";

type MetadataDecoder = fn(&mut Emitter<'_>, &[u8], u64, Option<RegionId>) -> Result<(), ScanError>;

/// "RIFF" + size + "WEBP"
pub const RIFF_HEADER_SIZE: u64 = 12;

/// FourCC + size
pub const CHUNK_HEADER_SIZE: u64 = 8;

/// Size of the frame header in front of an ANMF frame's sub-chunks
pub const ANMF_HEADER_SIZE: u64 = 16;

pub const VP8X_ICC: u8 = 0x20;
pub const VP8X_ALPHA: u8 = 0x10;
pub const VP8X_EXIF: u8 = 0x08;
pub const VP8X_XMP: u8 = 0x04;
pub const VP8X_ANIMATION: u8 = 0x02;

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let size = ctx.size();
    if size < RIFF_HEADER_SIZE {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than RIFF header"));
    }
    let header = ctx.read_exact_at(0, RIFF_HEADER_SIZE as usize)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WEBP" {
        return Err(ScanError::not_this_format(FORMAT, "missing RIFF/WEBP signature"));
    }

    let riff_size = read_u32_le(&header[4..8]) as u64;
    let riff_end = (CHUNK_HEADER_SIZE + riff_size).clamp(RIFF_HEADER_SIZE, size);
    if CHUNK_HEADER_SIZE + riff_size != size {
        debug!(riff_size, size, "RIFF size does not match stream size");
    }
    ctx.emit(
        StyleFlags::HEADER,
        0,
        RIFF_HEADER_SIZE,
        format!("RIFF header: WEBP, {} bytes", riff_size),
        None,
    );

    walk_chunks(ctx, RIFF_HEADER_SIZE, riff_end, None)?;

    if riff_end < size {
        ctx.emit(
            StyleFlags::MUTED_TEXT,
            riff_end,
            size - riff_end,
            format!("Data after RIFF container ({} bytes)", size - riff_end),
            None,
        );
    }
    Ok(())
}

/// Walk the chunks in `[start, end)`, attaching them to `parent`.
fn walk_chunks(
    ctx: &mut ScanContext<'_>,
    start: u64,
    end: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    let mut pos = start;
    while pos < end {
        ctx.out().check_cancelled()?;
        if end - pos < CHUNK_HEADER_SIZE {
            return Err(ScanError::malformed(
                FORMAT,
                format!("truncated chunk header at {}", pos),
            ));
        }
        let head = ctx.read_exact_at(pos, CHUNK_HEADER_SIZE as usize)?;
        let fourcc = [head[0], head[1], head[2], head[3]];
        let len = read_u32_le(&head[4..8]) as u64;
        let payload_at = pos + CHUNK_HEADER_SIZE;
        if payload_at + len > end {
            return Err(ScanError::malformed(
                FORMAT,
                format!(
                    "'{}' chunk at {} declares {} bytes, {} available",
                    fourcc_str(&fourcc),
                    pos,
                    len,
                    end - payload_at
                ),
            ));
        }

        walk_chunk(ctx, &fourcc, pos, len, parent)?;
        pos = payload_at + len;
    }
    Ok(())
}

fn walk_chunk(
    ctx: &mut ScanContext<'_>,
    fourcc: &[u8; 4],
    pos: u64,
    len: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    let payload_at = pos + CHUNK_HEADER_SIZE;
    let total = CHUNK_HEADER_SIZE + len;

    match fourcc {
        b"VP8 " | b"VP8L" | b"VP8X" | b"ANIM" | b"ALPH" => {
            let head = ctx.read_exact_at(payload_at, len.min(32) as usize)?;
            let summary = match fourcc {
                b"VP8 " => describe_vp8(&head),
                b"VP8L" => describe_vp8l(&head),
                b"VP8X" => describe_vp8x(&head),
                b"ANIM" => describe_anim(&head),
                _ => describe_alph(&head),
            };
            ctx.emit(
                StyleFlags::NONE,
                pos,
                total,
                format!("{} chunk: {} ({} bytes)", fourcc_str(fourcc), summary, len),
                parent,
            );
        }
        b"ANMF" => {
            let head = ctx.read_exact_at(payload_at, len.min(ANMF_HEADER_SIZE) as usize)?;
            let id = ctx.emit(
                StyleFlags::NONE,
                pos,
                total,
                format!("ANMF chunk: {} ({} bytes)", describe_anmf(&head), len),
                parent,
            );
            if len > ANMF_HEADER_SIZE {
                ctx.emit(
                    StyleFlags::HEADER,
                    payload_at,
                    ANMF_HEADER_SIZE,
                    "Frame header",
                    Some(id),
                );
                walk_chunks(ctx, payload_at + ANMF_HEADER_SIZE, payload_at + len, Some(id))?;
            }
        }
        b"EXIF" | b"XMP " | b"ICCP" => {
            let id = ctx.emit(
                StyleFlags::NONE,
                pos,
                total,
                format!("{} chunk ({} bytes)", fourcc_str(fourcc).trim_end(), len),
                parent,
            );
            let payload = ctx.read_exact_at(payload_at, len as usize)?;
            let base = ctx.absolute(payload_at);
            let decode: MetadataDecoder = match fourcc {
                b"EXIF" => exif::decode,
                b"XMP " => xmp::decode,
                _ => icc::decode,
            };
            // Some writers keep the JPEG APP1 prefix
            let (data, base) = match payload.strip_prefix(b"Exif\0\0".as_slice()) {
                Some(rest) if fourcc == b"EXIF" => (rest, base + 6),
                _ => (&payload[..], base),
            };
            let result = decode(ctx.out(), data, base, Some(id));
            absorb_nested(result, "WebP metadata chunk", base)?;
        }
        _ => {
            ctx.emit(
                StyleFlags::NONE,
                pos,
                total,
                format!("'{}' chunk ({} bytes)", fourcc_str(fourcc), len),
                parent,
            );
        }
    }
    Ok(())
}

// =============================================================================
// Chunk Summaries
// =============================================================================

/// Lossy bitstream: 3-byte frame tag, then for key frames the start code
/// `9D 01 2A` and 14-bit dimensions.
pub fn describe_vp8(payload: &[u8]) -> String {
    let r = FieldReader::little_endian(payload);
    let Ok(tag) = r.u24(0) else {
        return "lossy bitstream".into();
    };
    let key_frame = tag & 1 == 0;
    if !key_frame {
        return "lossy bitstream, interframe".into();
    }
    match (r.bytes(3, 3), r.u16(6), r.u16(8)) {
        (Ok([0x9D, 0x01, 0x2A]), Ok(w), Ok(h)) => format!(
            "lossy bitstream, {}x{}, version {}",
            w & 0x3FFF,
            h & 0x3FFF,
            (tag >> 1) & 7
        ),
        _ => "lossy bitstream, bad start code".into(),
    }
}

/// Lossless bitstream: signature 0x2F, then 14-bit width-1, 14-bit
/// height-1, alpha hint and a 3-bit version.
pub fn describe_vp8l(payload: &[u8]) -> String {
    let r = FieldReader::little_endian(payload);
    match (r.u8(0), r.u32(1)) {
        (Ok(0x2F), Ok(bits)) => format!(
            "lossless bitstream, {}x{}{}",
            (bits & 0x3FFF) + 1,
            ((bits >> 14) & 0x3FFF) + 1,
            if bits & (1 << 28) != 0 { ", alpha" } else { "" }
        ),
        _ => "lossless bitstream, bad signature".into(),
    }
}

/// Extended header: feature flags and 24-bit canvas dimensions minus one.
pub fn describe_vp8x(payload: &[u8]) -> String {
    let r = FieldReader::little_endian(payload);
    let (Ok(flags), Ok(w), Ok(h)) = (r.u8(0), r.u24(4), r.u24(7)) else {
        return "extended header".into();
    };
    let names: Vec<&str> = [
        (VP8X_ICC, "ICC"),
        (VP8X_ALPHA, "alpha"),
        (VP8X_EXIF, "EXIF"),
        (VP8X_XMP, "XMP"),
        (VP8X_ANIMATION, "animation"),
    ]
    .iter()
    .filter(|(bit, _)| flags & bit != 0)
    .map(|(_, name)| *name)
    .collect();
    let features = if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    };
    format!("extended header, canvas {}x{}, features: {}", w + 1, h + 1, features)
}

pub fn describe_anim(payload: &[u8]) -> String {
    let r = FieldReader::little_endian(payload);
    match (r.bytes(0, 4), r.u16(4)) {
        (Ok(bgra), Ok(loops)) => format!(
            "background #{:02X}{:02X}{:02X}{:02X}, loop count {}",
            bgra[2],
            bgra[1],
            bgra[0],
            bgra[3],
            if loops == 0 { "infinite".to_string() } else { loops.to_string() }
        ),
        _ => "animation parameters".into(),
    }
}

pub fn describe_anmf(payload: &[u8]) -> String {
    let r = FieldReader::little_endian(payload);
    let fields = (r.u24(0), r.u24(3), r.u24(6), r.u24(9), r.u24(12), r.u8(15));
    let (Ok(x), Ok(y), Ok(w), Ok(h), Ok(duration), Ok(flags)) = fields else {
        return "animation frame".into();
    };
    format!(
        "frame {}x{} at ({}, {}), {} ms, {}, {}",
        w + 1,
        h + 1,
        x * 2,
        y * 2,
        duration,
        if flags & 0x02 != 0 { "no blend" } else { "alpha blend" },
        if flags & 0x01 != 0 { "dispose to background" } else { "no dispose" }
    )
}

pub fn describe_alph(payload: &[u8]) -> String {
    let Some(&flags) = payload.first() else {
        return "alpha".into();
    };
    let compression = match flags & 0x03 {
        0 => "uncompressed",
        1 => "lossless compressed",
        _ => "unknown compression",
    };
    let filter = match (flags >> 2) & 0x03 {
        0 => "no filter",
        1 => "horizontal filter",
        2 => "vertical filter",
        _ => "gradient filter",
    };
    format!("alpha, {}, {}", compression, filter)
}
