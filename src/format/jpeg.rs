//! JPEG segment walker.
//!
//! # Stream Layout
//!
//! ```text
//! FF D8                       SOI
//! FF xx <u16 len> <payload>   marker segment (len counts itself)
//! ...
//! FF DA <u16 len> <header>    SOS, followed by entropy-coded data
//! ...
//! FF D9                       EOI
//! ```
//!
//! `SOI`, `EOI`, `RST0`..`RST7` and `TEM` stand alone. Inside entropy-coded
//! data a literal `FF` is stuffed as `FF 00` and restart markers may appear;
//! neither ends the scan.
//!
//! For baseline frames the entropy-coded data of the single scan runs up to
//! the EOI, so the walker jumps to the end of the stream and searches
//! backward for it. Progressive and other frames interleave several scans
//! with table segments and are scanned forward.

use bytes::Bytes;
use image::ImageFormat;
use tracing::debug;

use crate::error::ScanError;
use crate::io::{Direction, FieldReader};
use crate::metadata::{exif, icc, photoshop, xmp};
use crate::region::{RegionId, StyleFlags};
use crate::scan::thumbnail;
use crate::scan::{absorb_nested, Emitter, ScanContext};

const FORMAT: &str = "JPEG";

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: u8 = 0xD8;

/// End Of Image marker
pub const EOI: u8 = 0xD9;

/// Start Of Frame (baseline DCT) marker
pub const SOF0: u8 = 0xC0;

/// Start Of Frame (extended sequential DCT) marker
pub const SOF1: u8 = 0xC1;

/// Start Of Frame (progressive DCT) marker
pub const SOF2: u8 = 0xC2;

/// Define Huffman Table marker
pub const DHT: u8 = 0xC4;

/// Define Arithmetic Coding conditioning marker
pub const DAC: u8 = 0xCC;

/// Define Quantization Table marker
pub const DQT: u8 = 0xDB;

/// Define Restart Interval marker
pub const DRI: u8 = 0xDD;

/// Start Of Scan marker
pub const SOS: u8 = 0xDA;

/// Comment marker
pub const COM: u8 = 0xFE;

/// Temporary arithmetic coding marker
pub const TEM: u8 = 0x01;

/// First and last restart markers
pub const RST0: u8 = 0xD0;
pub const RST7: u8 = 0xD7;

/// Application segments
pub const APP0: u8 = 0xE0;
pub const APP1: u8 = 0xE1;
pub const APP2: u8 = 0xE2;
pub const APP13: u8 = 0xED;
pub const APP14: u8 = 0xEE;
pub const APP15: u8 = 0xEF;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const XMP_EXTENSION_SIGNATURE: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";
const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";

const SCAN_PIECE: usize = 64 * 1024;

/// True for SOFn markers (C0-CF except DHT, JPG and DAC).
pub fn is_sof(marker: u8) -> bool {
    (0xC0..=0xCF).contains(&marker) && marker != DHT && marker != 0xC8 && marker != DAC
}

/// True for markers that are not followed by a length field.
pub fn is_standalone(marker: u8) -> bool {
    matches!(marker, SOI | EOI | TEM) || (RST0..=RST7).contains(&marker)
}

/// Short name of a marker, e.g. `SOF2` or `APP13`.
pub fn marker_name(marker: u8) -> String {
    match marker {
        SOI => "SOI".into(),
        EOI => "EOI".into(),
        SOS => "SOS".into(),
        DHT => "DHT".into(),
        DQT => "DQT".into(),
        DRI => "DRI".into(),
        DAC => "DAC".into(),
        COM => "COM".into(),
        TEM => "TEM".into(),
        0xDC => "DNL".into(),
        0xDE => "DHP".into(),
        0xDF => "EXP".into(),
        RST0..=RST7 => format!("RST{}", marker - RST0),
        APP0..=APP15 => format!("APP{}", marker - APP0),
        m if is_sof(m) => format!("SOF{}", m - SOF0),
        m => format!("Marker {:02X}", m),
    }
}

fn frame_description(marker: u8) -> &'static str {
    match marker {
        0xC0 => "Baseline DCT",
        0xC1 => "Extended sequential DCT",
        0xC2 => "Progressive DCT",
        0xC3 => "Lossless",
        0xC5 => "Differential sequential DCT",
        0xC6 => "Differential progressive DCT",
        0xC7 => "Differential lossless",
        0xC9 => "Extended sequential DCT, arithmetic",
        0xCA => "Progressive DCT, arithmetic",
        0xCB => "Lossless, arithmetic",
        0xCD => "Differential sequential DCT, arithmetic",
        0xCE => "Differential progressive DCT, arithmetic",
        0xCF => "Differential lossless, arithmetic",
        _ => "Frame",
    }
}

// =============================================================================
// Frame Header
// =============================================================================

/// Decoded SOFn payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub marker: u8,
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    /// (id, horizontal sampling, vertical sampling, quantization table)
    pub components: Vec<(u8, u8, u8, u8)>,
}

impl FrameHeader {
    pub fn parse(marker: u8, payload: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::big_endian(payload);
        let count = r.u8(5)? as usize;
        let components = (0..count)
            .map(|i| {
                let at = 6 + i * 3;
                let sampling = r.u8(at + 1)?;
                Ok((r.u8(at)?, sampling >> 4, sampling & 0x0F, r.u8(at + 2)?))
            })
            .collect::<Result<Vec<_>, ScanError>>()?;
        Ok(Self {
            marker,
            precision: r.u8(0)?,
            height: r.u16(1)?,
            width: r.u16(3)?,
            components,
        })
    }

    /// Baseline and extended sequential frames have a single scan that
    /// runs up to EOI.
    pub fn is_sequential(&self) -> bool {
        self.marker == SOF0 || self.marker == SOF1
    }
}

// =============================================================================
// Walker
// =============================================================================

struct JpegWalk {
    frame: Option<FrameHeader>,
    thumbnail_done: bool,
}

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let size = ctx.size();
    if size < 3 {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than SOI"));
    }
    let head = ctx.read_exact_at(0, 3)?;
    if head[..] != [0xFF, SOI, 0xFF] {
        return Err(ScanError::not_this_format(FORMAT, "missing SOI marker"));
    }
    ctx.seek_to(0)?;

    let mut state = JpegWalk {
        frame: None,
        thumbnail_done: false,
    };

    while ctx.position() < size {
        let pos = ctx.position();
        let byte = ctx.read_u8()?;
        if byte != 0xFF {
            let found = ctx.search(&[0xFF], Direction::Forward)?;
            let end = if found { ctx.position() } else { size };
            ctx.emit(
                StyleFlags::ERROR,
                pos,
                end - pos,
                format!("Unexpected data between segments ({} bytes)", end - pos),
                None,
            );
            if !found {
                break;
            }
            ctx.seek_to(end)?;
            continue;
        }

        let mut marker = ctx.read_u8()?;
        while marker == 0xFF {
            marker = ctx.read_u8()?;
        }
        let start = ctx.position() - 2;
        if start > pos {
            ctx.emit(StyleFlags::MUTED_TEXT, pos, start - pos, "Fill bytes", None);
        }

        if is_standalone(marker) {
            let label = match marker {
                SOI => "SOI: Start of image".to_string(),
                EOI => "EOI: End of image".to_string(),
                m => marker_name(m),
            };
            let flags = if marker == SOI { StyleFlags::HEADER } else { StyleFlags::NONE };
            ctx.emit(flags, start, 2, label, None);
            if marker == EOI {
                break;
            }
            continue;
        }

        let length = u16::from_be_bytes([ctx.read_u8()?, ctx.read_u8()?]) as u64;
        if length < 2 {
            return Err(ScanError::malformed(FORMAT, format!(
                "{} segment at {} has length {}",
                marker_name(marker),
                start,
                length
            )));
        }
        if start + 2 + length > size {
            return Err(ScanError::malformed(FORMAT, format!(
                "{} segment at {} runs past end of data",
                marker_name(marker),
                start
            )));
        }
        let payload = ctx.read_exact((length - 2) as usize)?;

        walk_segment(ctx, &mut state, marker, start, payload)?;

        if marker == SOS {
            walk_entropy_data(ctx, &mut state, start + 2 + length)?;
        }
    }

    if state.frame.is_none() {
        debug!(id = ctx.identifier(), "JPEG stream without a frame header");
    }
    Ok(())
}

/// Emit the region for one length-prefixed segment and decode its payload.
///
/// A payload too short for its layout is flagged and the walk goes on; the
/// next segment starts where the length field says.
fn walk_segment(
    ctx: &mut ScanContext<'_>,
    state: &mut JpegWalk,
    marker: u8,
    start: u64,
    payload: Bytes,
) -> Result<(), ScanError> {
    let total = 4 + payload.len() as u64;
    let summary = segment_summary(marker, &payload);
    let seg_id = ctx.emit(
        StyleFlags::NONE,
        start,
        total,
        format!("{}: {}", marker_name(marker), summary),
        None,
    );
    ctx.emit(
        StyleFlags::HEADER,
        start,
        4,
        format!("Marker FF{:02X}, length {}", marker, payload.len() + 2),
        Some(seg_id),
    );

    let at = start + 4;
    let decoded = match marker {
        m if is_sof(m) => FrameHeader::parse(m, &payload).map(|frame| {
            emit_fields(ctx, frame_fields(&frame), at, seg_id);
            state.frame = Some(frame);
            true
        }),
        APP0 if payload.starts_with(b"JFIF\0") => {
            jfif_fields(&payload).map(|fields| emit_fields(ctx, fields, at, seg_id))
        }
        APP1 if payload.starts_with(EXIF_SIGNATURE) => emit_embedded(
            ctx,
            &payload,
            EXIF_SIGNATURE.len(),
            at,
            seg_id,
            "Exif identifier",
            exif::decode,
        )
        .map(|()| true),
        APP1 if payload.starts_with(XMP_SIGNATURE) => emit_embedded(
            ctx,
            &payload,
            XMP_SIGNATURE.len(),
            at,
            seg_id,
            "XMP namespace",
            xmp::decode,
        )
        .map(|()| true),
        APP1 if payload.starts_with(XMP_EXTENSION_SIGNATURE) => {
            Ok(emit_xmp_extension(ctx, &payload, at, seg_id))
        }
        APP2 if payload.starts_with(ICC_SIGNATURE) && payload.len() >= 14 => {
            emit_icc_chunk(ctx, &payload, at, seg_id).map(|()| true)
        }
        APP13 if payload.starts_with(PHOTOSHOP_SIGNATURE) => emit_embedded(
            ctx,
            &payload,
            PHOTOSHOP_SIGNATURE.len(),
            at,
            seg_id,
            "Photoshop 3.0",
            photoshop::decode,
        )
        .map(|()| true),
        APP14 if payload.starts_with(b"Adobe") => {
            adobe_fields(&payload).map(|fields| emit_fields(ctx, fields, at, seg_id))
        }
        DQT => Ok(emit_dqt_tables(ctx, &payload, at, seg_id)),
        DHT => Ok(emit_dht_tables(ctx, &payload, at, seg_id)),
        SOS => sos_fields(&payload).map(|fields| emit_fields(ctx, fields, at, seg_id)),
        _ => Ok(false),
    };

    let decoded = match decoded {
        Ok(decoded) => decoded,
        Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
        Err(err) => {
            debug!(
                marker = %marker_name(marker),
                offset = start,
                error = %err,
                "Undecodable JPEG segment payload"
            );
            ctx.emit(
                StyleFlags::ERROR,
                at,
                payload.len() as u64,
                format!("Payload ({} bytes, undecodable)", payload.len()),
                Some(seg_id),
            );
            return Ok(());
        }
    };

    if !decoded && !payload.is_empty() {
        ctx.emit(
            StyleFlags::NONE,
            at,
            payload.len() as u64,
            format!("Payload ({} bytes)", payload.len()),
            Some(seg_id),
        );
    }
    Ok(())
}

/// Label text for a segment, built from its payload where possible.
fn segment_summary(marker: u8, payload: &[u8]) -> String {
    let r = FieldReader::big_endian(payload);
    match marker {
        m if is_sof(m) => match (r.u16(3), r.u16(1), r.u8(5), r.u8(0)) {
            (Ok(w), Ok(h), Ok(n), Ok(p)) => format!(
                "{}, {}x{}, {} components, {}-bit",
                frame_description(m),
                w,
                h,
                n,
                p
            ),
            _ => frame_description(m).to_string(),
        },
        APP0..=APP15 => {
            let id_end = payload.iter().position(|&b| b == 0).unwrap_or(0).min(40);
            let id = &payload[..id_end];
            if !id.is_empty() && id.iter().all(|&b| (0x20..0x7F).contains(&b)) {
                format!("{} ({} bytes)", String::from_utf8_lossy(id), payload.len())
            } else {
                format!("Application data ({} bytes)", payload.len())
            }
        }
        DQT => "Define quantization tables".into(),
        DHT => "Define Huffman tables".into(),
        DRI => match r.u16(0) {
            Ok(interval) => format!("Restart interval {}", interval),
            Err(_) => "Define restart interval".into(),
        },
        SOS => match r.u8(0) {
            Ok(n) => format!("Start of scan, {} components", n),
            Err(_) => "Start of scan".into(),
        },
        COM => {
            let text = String::from_utf8_lossy(payload);
            let cut: String = text.chars().take(60).collect();
            format!("Comment \"{}\"", cut.trim_end_matches('\0'))
        }
        _ => format!("{} bytes", payload.len()),
    }
}

/// Emit the signature prefix of an APPn payload and decode the rest.
fn emit_embedded(
    ctx: &mut ScanContext<'_>,
    payload: &[u8],
    prefix: usize,
    at: u64,
    seg_id: RegionId,
    prefix_label: &str,
    decode: impl FnOnce(&mut Emitter<'_>, &[u8], u64, Option<RegionId>) -> Result<(), ScanError>,
) -> Result<(), ScanError> {
    ctx.emit(StyleFlags::NONE, at, prefix as u64, prefix_label, Some(seg_id));
    let body = &payload[prefix..];
    let base = ctx.absolute(at + prefix as u64);
    let result = decode(ctx.out(), body, base, Some(seg_id));
    absorb_nested(result, prefix_label, base)
}

/// Extended XMP carries one chunk of a packet too large for a single
/// segment; chunks are labeled but not reassembled.
fn emit_xmp_extension(
    ctx: &mut ScanContext<'_>,
    payload: &[u8],
    at: u64,
    seg_id: RegionId,
) -> bool {
    let sig = XMP_EXTENSION_SIGNATURE.len();
    let header = sig + 40;
    let r = FieldReader::big_endian(payload);
    let (Ok(guid), Ok(full_len), Ok(offset)) =
        (r.bytes(sig, 32), r.u32(sig + 32), r.u32(sig + 36))
    else {
        return false;
    };
    ctx.emit(StyleFlags::NONE, at, sig as u64, "Extended XMP namespace", Some(seg_id));
    ctx.emit(
        StyleFlags::NONE,
        at + sig as u64,
        40,
        format!(
            "GUID {}, chunk at {} of {} bytes",
            String::from_utf8_lossy(guid),
            offset,
            full_len
        ),
        Some(seg_id),
    );
    if payload.len() > header {
        ctx.emit(
            StyleFlags::NONE,
            at + header as u64,
            (payload.len() - header) as u64,
            format!("Extended XMP chunk ({} bytes)", payload.len() - header),
            Some(seg_id),
        );
    }
    true
}

/// An APP2 ICC_PROFILE segment carries one chunk of the profile.
///
/// A single-chunk profile is decoded in place. Chunks of a larger profile
/// are labeled but not reassembled: decoded regions must map to contiguous
/// bytes, and the pieces sit in separate segments.
fn emit_icc_chunk(
    ctx: &mut ScanContext<'_>,
    payload: &[u8],
    at: u64,
    seg_id: RegionId,
) -> Result<(), ScanError> {
    let (seq, count) = (payload[12], payload[13]);
    if count == 1 {
        return emit_embedded(
            ctx,
            payload,
            14,
            at,
            seg_id,
            "ICC_PROFILE chunk 1 of 1",
            icc::decode,
        );
    }
    ctx.emit(
        StyleFlags::NONE,
        at,
        14,
        format!("ICC_PROFILE chunk {} of {}", seq, count),
        Some(seg_id),
    );
    ctx.emit(
        StyleFlags::NONE,
        at + 14,
        payload.len() as u64 - 14,
        format!("ICC profile fragment ({} bytes)", payload.len() - 14),
        Some(seg_id),
    );
    Ok(())
}

/// A decoded segment field, positioned relative to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentField {
    offset: u64,
    len: u64,
    label: String,
}

impl SegmentField {
    fn new(offset: u64, len: u64, label: impl Into<String>) -> Self {
        Self {
            offset,
            len,
            label: label.into(),
        }
    }
}

/// Emit fields decoded in full; always reports the payload as decoded.
fn emit_fields(
    ctx: &mut ScanContext<'_>,
    fields: Vec<SegmentField>,
    at: u64,
    seg_id: RegionId,
) -> bool {
    for field in fields {
        ctx.emit(StyleFlags::NONE, at + field.offset, field.len, field.label, Some(seg_id));
    }
    true
}

fn frame_fields(frame: &FrameHeader) -> Vec<SegmentField> {
    let mut fields = vec![
        SegmentField::new(0, 1, format!("Precision: {} bits", frame.precision)),
        SegmentField::new(1, 2, format!("Height: {}", frame.height)),
        SegmentField::new(3, 2, format!("Width: {}", frame.width)),
        SegmentField::new(5, 1, format!("Components: {}", frame.components.len())),
    ];
    for (i, (id, h, v, tq)) in frame.components.iter().enumerate() {
        fields.push(SegmentField::new(
            6 + 3 * i as u64,
            3,
            format!("Component {}: sampling {}x{}, quantization table {}", id, h, v, tq),
        ));
    }
    fields
}

fn jfif_fields(payload: &[u8]) -> Result<Vec<SegmentField>, ScanError> {
    let r = FieldReader::big_endian(payload);
    let units = match r.u8(7)? {
        0 => "aspect ratio",
        1 => "dpi",
        2 => "dpcm",
        _ => "unknown units",
    };
    let (tw, th) = (r.u8(12)?, r.u8(13)?);
    let mut fields = vec![
        SegmentField::new(0, 5, "Identifier: JFIF"),
        SegmentField::new(5, 2, format!("Version: {}.{:02}", r.u8(5)?, r.u8(6)?)),
        SegmentField::new(
            7,
            5,
            format!("Density: {}x{} {}", r.u16(8)?, r.u16(10)?, units),
        ),
        SegmentField::new(12, 2, format!("Thumbnail: {}x{}", tw, th)),
    ];
    if payload.len() > 14 {
        fields.push(SegmentField::new(
            14,
            (payload.len() - 14) as u64,
            format!("Thumbnail pixels ({} bytes)", payload.len() - 14),
        ));
    }
    Ok(fields)
}

fn adobe_fields(payload: &[u8]) -> Result<Vec<SegmentField>, ScanError> {
    let r = FieldReader::big_endian(payload);
    let transform = match r.u8(11)? {
        0 => "none / CMYK",
        1 => "YCbCr",
        2 => "YCCK",
        _ => "unknown",
    };
    Ok(vec![
        SegmentField::new(0, 5, "Identifier: Adobe"),
        SegmentField::new(5, 2, format!("DCT encode version: {}", r.u16(5)?)),
        SegmentField::new(
            7,
            4,
            format!("Flags: 0x{:04X} 0x{:04X}", r.u16(7)?, r.u16(9)?),
        ),
        SegmentField::new(11, 1, format!("Color transform: {}", transform)),
    ])
}

/// Returns false when the tables could not be split, so the payload is
/// shown whole instead.
fn emit_dqt_tables(ctx: &mut ScanContext<'_>, payload: &[u8], at: u64, seg_id: RegionId) -> bool {
    let mut tables = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        let pq = payload[pos] >> 4;
        let tq = payload[pos] & 0x0F;
        let len = 1 + 64 * if pq == 0 { 1 } else { 2 };
        if pos + len > payload.len() {
            return false;
        }
        tables.push((pos, len, pq, tq));
        pos += len;
    }
    for (pos, len, pq, tq) in tables {
        ctx.emit(
            StyleFlags::NONE,
            at + pos as u64,
            len as u64,
            format!("Quantization table {}, {}-bit", tq, if pq == 0 { 8 } else { 16 }),
            Some(seg_id),
        );
    }
    true
}

fn emit_dht_tables(ctx: &mut ScanContext<'_>, payload: &[u8], at: u64, seg_id: RegionId) -> bool {
    let mut tables = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        if pos + 17 > payload.len() {
            return false;
        }
        let class = payload[pos] >> 4;
        let id = payload[pos] & 0x0F;
        let codes: usize = payload[pos + 1..pos + 17].iter().map(|&c| c as usize).sum();
        let len = 17 + codes;
        if pos + len > payload.len() {
            return false;
        }
        tables.push((pos, len, class, id, codes));
        pos += len;
    }
    for (pos, len, class, id, codes) in tables {
        ctx.emit(
            StyleFlags::NONE,
            at + pos as u64,
            len as u64,
            format!(
                "Huffman table: {} {}, {} codes",
                if class == 0 { "DC" } else { "AC" },
                id,
                codes
            ),
            Some(seg_id),
        );
    }
    true
}

fn sos_fields(payload: &[u8]) -> Result<Vec<SegmentField>, ScanError> {
    let r = FieldReader::big_endian(payload);
    let count = r.u8(0)? as usize;
    let mut fields = vec![SegmentField::new(0, 1, format!("Components: {}", count))];
    for i in 0..count {
        let off = 1 + 2 * i;
        let tables = r.u8(off + 1)?;
        fields.push(SegmentField::new(
            off as u64,
            2,
            format!(
                "Component {}: DC table {}, AC table {}",
                r.u8(off)?,
                tables >> 4,
                tables & 0x0F
            ),
        ));
    }
    let tail = 1 + 2 * count;
    let approx = r.u8(tail + 2)?;
    fields.push(SegmentField::new(
        tail as u64,
        3,
        format!(
            "Spectral selection {}..{}, approximation {}/{}",
            r.u8(tail)?,
            r.u8(tail + 1)?,
            approx >> 4,
            approx & 0x0F
        ),
    ));
    Ok(fields)
}

// =============================================================================
// Entropy-Coded Data
// =============================================================================

/// Emit the entropy-coded data that follows an SOS segment and leave the
/// cursor on the marker that ends it.
fn walk_entropy_data(
    ctx: &mut ScanContext<'_>,
    state: &mut JpegWalk,
    data_start: u64,
) -> Result<(), ScanError> {
    let size = ctx.size();
    let sequential = state.frame.as_ref().map_or(false, FrameHeader::is_sequential);

    let mut data_end = None;
    if sequential {
        ctx.seek_end()?;
        if ctx.search(&[0xFF, EOI], Direction::Backward)? && ctx.position() >= data_start {
            data_end = Some(ctx.position());
        } else {
            debug!(data_start, "No EOI found backward, scanning forward");
        }
    }
    let data_end = match data_end {
        Some(end) => end,
        None => find_next_marker(ctx, data_start)?,
    };

    if data_end > data_start {
        let region = ctx.emit(
            StyleFlags::NONE,
            data_start,
            data_end - data_start,
            format!("Entropy-coded data ({} bytes)", data_end - data_start),
            None,
        );
        if !state.thumbnail_done {
            state.thumbnail_done = true;
            thumbnail::attach_whole_stream(ctx, ImageFormat::Jpeg, region)?;
        }
    }
    ctx.seek_to(data_end.min(size))?;
    Ok(())
}

/// Offset of the first `FF` at or after `from` that starts a real marker:
/// not a stuffed `FF 00`, a fill byte or a restart marker.
pub(crate) fn find_next_marker(ctx: &mut ScanContext<'_>, from: u64) -> Result<u64, ScanError> {
    let size = ctx.size();
    let mut base = from;
    while base < size {
        ctx.seek_to(base)?;
        let piece = ctx.read_up_to(SCAN_PIECE)?;
        if piece.is_empty() {
            break;
        }
        for i in 0..piece.len() {
            if piece[i] != 0xFF {
                continue;
            }
            let next = match piece.get(i + 1) {
                Some(&b) => b,
                None if base + (i as u64) + 1 < size => {
                    ctx.read_exact_at(base + i as u64 + 1, 1)?[0]
                }
                None => return Ok(size),
            };
            if next == 0x00 || next == 0xFF || (RST0..=RST7).contains(&next) {
                continue;
            }
            return Ok(base + i as u64);
        }
        base += piece.len() as u64;
    }
    Ok(size)
}
