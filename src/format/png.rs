//! PNG chunk walker.
//!
//! # Structure
//!
//! ```text
//! 8-byte signature
//! repeat:
//!   u32 BE length | 4-byte type | length bytes of data | u32 BE CRC32(type + data)
//! until IEND
//! ```
//!
//! Every chunk becomes one region with children for its length, type, decoded
//! data fields and CRC. A CRC mismatch is flagged on the chunk and the walk
//! goes on; a chunk whose length runs past the end of data stops it.

use image::ImageFormat;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::io::{fourcc_str, read_u32_be, FieldReader};
use crate::metadata::exif;
use crate::region::{RegionId, StyleFlags};
use crate::scan::{thumbnail, ScanContext};

const FORMAT: &str = "PNG";

/// PNG file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Size of the IHDR payload.
pub const IHDR_LEN: usize = 13;

/// Chunks larger than this are checksummed but not kept for field decoding.
const MAX_DECODED_CHUNK: u32 = 16 * 1024 * 1024;

// =============================================================================
// CRC32
// =============================================================================

const CRC_TABLE: [u32; 256] = make_crc_table();

const fn make_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Incremental CRC-32 (ISO 3309) as used by PNG chunks.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut c = self.state;
        for &byte in data {
            c = CRC_TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
        }
        self.state = c;
    }

    pub fn finish(self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC of a chunk's type and data.
pub fn chunk_crc(chunk_type: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(chunk_type);
    crc.update(data);
    crc.finish()
}

// =============================================================================
// IHDR
// =============================================================================

/// Decoded image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ihdr {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub compression: u8,
    pub filter: u8,
    pub interlace: u8,
}

impl Ihdr {
    pub fn parse(data: &[u8]) -> Result<Self, ScanError> {
        if data.len() != IHDR_LEN {
            return Err(ScanError::malformed(
                FORMAT,
                format!("IHDR is {} bytes, expected {}", data.len(), IHDR_LEN),
            ));
        }
        let r = FieldReader::big_endian(data);
        Ok(Self {
            width: r.u32(0)?,
            height: r.u32(4)?,
            bit_depth: r.u8(8)?,
            color_type: r.u8(9)?,
            compression: r.u8(10)?,
            filter: r.u8(11)?,
            interlace: r.u8(12)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; IHDR_LEN] {
        let mut out = [0u8; IHDR_LEN];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type;
        out[10] = self.compression;
        out[11] = self.filter;
        out[12] = self.interlace;
        out
    }

    pub fn color_type_name(&self) -> &'static str {
        match self.color_type {
            0 => "Greyscale",
            2 => "RGB",
            3 => "Indexed",
            4 => "Greyscale+Alpha",
            6 => "RGBA",
            _ => "Unknown",
        }
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlace == 1
    }

    /// One-line summary used in chunk labels.
    pub fn summary(&self) -> String {
        format!(
            "{}x{} {}-bit {}{}",
            self.width,
            self.height,
            self.bit_depth,
            self.color_type_name(),
            if self.is_interlaced() { ", Adam7" } else { "" }
        )
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Fixed part of a chunk read before its data.
struct ChunkHeader {
    start: u64,
    length: u32,
    kind: [u8; 4],
}

impl ChunkHeader {
    fn type_str(&self) -> String {
        fourcc_str(&self.kind)
    }

    fn data_start(&self) -> u64 {
        self.start + 8
    }

    fn total_len(&self) -> u64 {
        12 + self.length as u64
    }
}

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    if ctx.size() < SIGNATURE.len() as u64 {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than signature"));
    }
    let signature = ctx.read_exact(SIGNATURE.len())?;
    if signature[..] != SIGNATURE {
        return Err(ScanError::not_this_format(FORMAT, "signature mismatch"));
    }
    ctx.emit(StyleFlags::HEADER, 0, 8, "PNG signature", None);

    let mut ihdr: Option<Ihdr> = None;
    let mut seen_idat = false;
    let mut chunks = 0usize;

    loop {
        let start = ctx.position();
        if start == ctx.size() {
            warn!(source = ctx.identifier(), "PNG ended without IEND");
            break;
        }

        let head = ctx.read_exact(8)?;
        let chunk = ChunkHeader {
            start,
            length: read_u32_be(&head[0..4]),
            kind: [head[4], head[5], head[6], head[7]],
        };
        if chunk.total_len() > ctx.size() - start {
            return Err(ScanError::malformed(
                FORMAT,
                format!(
                    "chunk '{}' at offset {} declares {} bytes, past end of data",
                    chunk.type_str(),
                    ctx.absolute(start),
                    chunk.length
                ),
            ));
        }

        let keep = chunk.length <= MAX_DECODED_CHUNK && !is_image_data(&chunk.kind);
        let mut crc = Crc32::new();
        crc.update(&chunk.kind);
        let data = ctx.read_streamed(chunk.length as u64, keep, |piece| crc.update(piece))?;
        let stored_crc = read_u32_be(&ctx.read_exact(4)?);
        let computed_crc = crc.finish();
        let crc_ok = stored_crc == computed_crc;

        if &chunk.kind == b"IHDR" {
            if let Some(data) = &data {
                ihdr = Ihdr::parse(data).ok();
            }
        }

        let mut label = describe_chunk(&chunk, data.as_deref(), ihdr.as_ref(), !seen_idat);
        let mut flags = StyleFlags::NONE;
        if !crc_ok {
            flags |= StyleFlags::ERROR;
            label.push_str(" [CRC mismatch]");
            warn!(
                chunk = %chunk.type_str(),
                offset = ctx.absolute(start),
                stored = %format!("{:08X}", stored_crc),
                computed = %format!("{:08X}", computed_crc),
                "PNG chunk CRC mismatch"
            );
        }
        let id = ctx.emit(flags, start, chunk.total_len(), label, None);

        ctx.emit(
            StyleFlags::HEADER,
            start,
            4,
            format!("Length: {}", chunk.length),
            Some(id),
        );
        ctx.emit(
            StyleFlags::HEADER,
            start + 4,
            4,
            format!("Type: {}", chunk.type_str()),
            Some(id),
        );
        if chunk.length > 0 {
            emit_chunk_fields(ctx, &chunk, data.as_deref(), ihdr.as_ref(), id)?;
        }
        let crc_label = if crc_ok {
            format!("CRC: {:08X}", stored_crc)
        } else {
            format!("CRC: {:08X} (computed {:08X})", stored_crc, computed_crc)
        };
        let crc_flags = if crc_ok {
            StyleFlags::NONE
        } else {
            StyleFlags::ERROR
        };
        ctx.emit(crc_flags, start + 8 + chunk.length as u64, 4, crc_label, Some(id));
        chunks += 1;

        match &chunk.kind {
            b"IDAT" if !seen_idat => {
                seen_idat = true;
                thumbnail::attach_whole_stream(ctx, ImageFormat::Png, id)?;
            }
            b"IEND" => break,
            _ => {}
        }
    }

    debug!(chunks, "PNG walk finished");
    Ok(())
}

fn is_image_data(kind: &[u8; 4]) -> bool {
    kind == b"IDAT" || kind == b"fdAT"
}

/// Chunk type names that say what the chunk holds.
fn chunk_title(kind: &[u8; 4]) -> Option<&'static str> {
    Some(match kind {
        b"IHDR" => "Image header",
        b"PLTE" => "Palette",
        b"IDAT" => "Image data",
        b"IEND" => "Image end",
        b"tRNS" => "Transparency",
        b"gAMA" => "Gamma",
        b"cHRM" => "Chromaticities",
        b"sRGB" => "sRGB intent",
        b"iCCP" => "Embedded ICC profile",
        b"sBIT" => "Significant bits",
        b"bKGD" => "Background color",
        b"pHYs" => "Physical dimensions",
        b"tIME" => "Modification time",
        b"tEXt" => "Text",
        b"zTXt" => "Compressed text",
        b"iTXt" => "International text",
        b"eXIf" => "Exif metadata",
        b"hIST" => "Palette histogram",
        b"sPLT" => "Suggested palette",
        b"acTL" => "Animation control",
        b"fcTL" => "Frame control",
        b"fdAT" => "Frame data",
        _ => return None,
    })
}

fn describe_chunk(
    chunk: &ChunkHeader,
    data: Option<&[u8]>,
    ihdr: Option<&Ihdr>,
    first_idat: bool,
) -> String {
    let name = chunk.type_str();
    let mut label = match chunk_title(&chunk.kind) {
        Some(title) => format!("{} chunk: {}", name, title),
        None => format!("{} chunk", name),
    };

    let detail = match (&chunk.kind, data) {
        (b"IHDR", _) => ihdr.map(Ihdr::summary),
        (b"IDAT", _) => ihdr.map(|h| {
            if first_idat {
                format!("{}, first", h.summary())
            } else {
                h.summary()
            }
        }),
        (b"PLTE", _) => Some(format!("{} entries", chunk.length / 3)),
        (b"tEXt", Some(d)) | (b"zTXt", Some(d)) | (b"iTXt", Some(d)) => {
            Some(format!("'{}'", latin1(keyword(d))))
        }
        _ => None,
    };
    if let Some(detail) = detail {
        label.push_str(&format!(" ({})", detail));
    }
    label
}

fn keyword(data: &[u8]) -> &[u8] {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    &data[..end]
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn emit_chunk_fields(
    ctx: &mut ScanContext<'_>,
    chunk: &ChunkHeader,
    data: Option<&[u8]>,
    ihdr: Option<&Ihdr>,
    id: RegionId,
) -> Result<(), ScanError> {
    let base = chunk.data_start();
    let len = chunk.length as u64;

    let data = match data {
        Some(data) => data,
        None => {
            ctx.emit(StyleFlags::NONE, base, len, "Data", Some(id));
            return Ok(());
        }
    };

    if &chunk.kind == b"eXIf" {
        let abs = ctx.absolute(base);
        let result = exif::decode(ctx.out(), data, abs, Some(id));
        return crate::scan::absorb_nested(result, "eXIf", abs);
    }

    // Field decoding is best effort; a short chunk leaves only the plain data region.
    match decode_fields(&chunk.kind, data, ihdr) {
        Ok(Some(fields)) => {
            for field in fields {
                ctx.emit(
                    StyleFlags::NONE,
                    base + field.offset as u64,
                    field.len as u64,
                    field.label,
                    Some(id),
                );
            }
        }
        Ok(None) => {
            ctx.emit(StyleFlags::NONE, base, len, "Data", Some(id));
        }
        Err(err) => {
            debug!(chunk = %chunk.type_str(), error = %err, "Undecodable PNG chunk data");
            ctx.emit(StyleFlags::ERROR, base, len, "Data (undecodable)", Some(id));
        }
    }
    Ok(())
}

/// A decoded field, positioned relative to the chunk data.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    offset: usize,
    len: usize,
    label: String,
}

/// Fields of one chunk, in offset order.
#[derive(Debug, Default)]
struct Fields(Vec<Field>);

impl Fields {
    fn add(&mut self, offset: usize, len: usize, label: impl Into<String>) {
        self.0.push(Field {
            offset,
            len,
            label: label.into(),
        });
    }
}

impl IntoIterator for Fields {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Decode the fields of chunk types with a known layout.
///
/// Returns `Ok(None)` when the type has no field decoder. Nothing is emitted
/// here, so a chunk too short for its layout yields no partial fields.
fn decode_fields(
    kind: &[u8; 4],
    data: &[u8],
    ihdr: Option<&Ihdr>,
) -> Result<Option<Fields>, ScanError> {
    let r = FieldReader::big_endian(data);
    let mut fields = Fields::default();

    match kind {
        b"IHDR" => {
            let h = Ihdr::parse(data)?;
            fields.add(0, 4, format!("Width: {}", h.width));
            fields.add(4, 4, format!("Height: {}", h.height));
            fields.add(8, 1, format!("Bit depth: {}", h.bit_depth));
            fields.add(
                9,
                1,
                format!("Color type: {} ({})", h.color_type, h.color_type_name()),
            );
            fields.add(10, 1, format!("Compression: {}", h.compression));
            fields.add(11, 1, format!("Filter: {}", h.filter));
            let interlace = if h.is_interlaced() { "Adam7" } else { "none" };
            fields.add(12, 1, format!("Interlace: {}", interlace));
        }
        b"PLTE" => {
            fields.add(0, data.len(), format!("{} RGB entries", data.len() / 3));
        }
        b"tRNS" => {
            let label = match ihdr.map(|h| h.color_type) {
                Some(3) => format!("Alpha for {} palette entries", data.len()),
                Some(0) => format!("Transparent grey: {}", r.u16(0)?),
                Some(2) => format!(
                    "Transparent RGB: {}, {}, {}",
                    r.u16(0)?,
                    r.u16(2)?,
                    r.u16(4)?
                ),
                _ => "Transparency data".to_string(),
            };
            fields.add(0, data.len(), label);
        }
        b"gAMA" => {
            let gamma = r.u32(0)?;
            fields.add(0, 4, format!("Gamma: {:.5}", gamma as f64 / 100_000.0));
        }
        b"cHRM" => {
            let names = [
                "White point x",
                "White point y",
                "Red x",
                "Red y",
                "Green x",
                "Green y",
                "Blue x",
                "Blue y",
            ];
            for (i, name) in names.iter().enumerate() {
                let value = r.u32(i * 4)?;
                fields.add(i * 4, 4, format!("{}: {:.5}", name, value as f64 / 100_000.0));
            }
        }
        b"sRGB" => {
            let intent = r.u8(0)?;
            let name = match intent {
                0 => "Perceptual",
                1 => "Relative colorimetric",
                2 => "Saturation",
                3 => "Absolute colorimetric",
                _ => "Unknown",
            };
            fields.add(0, 1, format!("Rendering intent: {} ({})", intent, name));
        }
        b"sBIT" => {
            let bits: Vec<String> = data.iter().map(|b| b.to_string()).collect();
            fields.add(0, data.len(), format!("Significant bits: {}", bits.join(", ")));
        }
        b"bKGD" => {
            let label = match data.len() {
                1 => format!("Background palette index: {}", r.u8(0)?),
                2 => format!("Background grey: {}", r.u16(0)?),
                6 => format!(
                    "Background RGB: {}, {}, {}",
                    r.u16(0)?,
                    r.u16(2)?,
                    r.u16(4)?
                ),
                _ => "Background data".to_string(),
            };
            fields.add(0, data.len(), label);
        }
        b"pHYs" => {
            let unit = r.u8(8)?;
            fields.add(0, 4, format!("Pixels per unit, X: {}", r.u32(0)?));
            fields.add(4, 4, format!("Pixels per unit, Y: {}", r.u32(4)?));
            let unit_name = if unit == 1 { "metre" } else { "unknown" };
            fields.add(8, 1, format!("Unit: {} ({})", unit, unit_name));
        }
        b"tIME" => {
            fields.add(
                0,
                7,
                format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    r.u16(0)?,
                    r.u8(2)?,
                    r.u8(3)?,
                    r.u8(4)?,
                    r.u8(5)?,
                    r.u8(6)?
                ),
            );
        }
        b"tEXt" => {
            let key = keyword(data);
            fields.add(0, key.len(), format!("Keyword: {}", latin1(key)));
            if key.len() < data.len() {
                let text = &data[key.len() + 1..];
                fields.add(key.len() + 1, text.len(), format!("Text: {}", latin1(text)));
            }
        }
        b"zTXt" | b"iCCP" => {
            let key = keyword(data);
            let name = if kind == b"iCCP" { "Profile name" } else { "Keyword" };
            fields.add(0, key.len(), format!("{}: {}", name, latin1(key)));
            let method_at = key.len() + 1;
            let method = r.u8(method_at)?;
            fields.add(method_at, 1, format!("Compression method: {}", method));
            let rest = data.len().saturating_sub(method_at + 1);
            let what = if kind == b"iCCP" {
                "Compressed profile"
            } else {
                "Compressed text"
            };
            fields.add(method_at + 1, rest, format!("{}: {} bytes", what, rest));
        }
        b"iTXt" => decode_itxt(data, &mut fields)?,
        b"acTL" => {
            fields.add(0, 4, format!("Frames: {}", r.u32(0)?));
            let plays = r.u32(4)?;
            let plays = if plays == 0 {
                "infinite".to_string()
            } else {
                plays.to_string()
            };
            fields.add(4, 4, format!("Plays: {}", plays));
        }
        b"fcTL" => {
            let dispose = r.u8(24)?;
            let blend = r.u8(25)?;
            fields.add(0, 4, format!("Sequence number: {}", r.u32(0)?));
            fields.add(4, 8, format!("Size: {}x{}", r.u32(4)?, r.u32(8)?));
            fields.add(12, 8, format!("Offset: {}, {}", r.u32(12)?, r.u32(16)?));
            fields.add(20, 4, format!("Delay: {}/{} s", r.u16(20)?, r.u16(22)?));
            let dispose_name = match dispose {
                0 => "none",
                1 => "background",
                2 => "previous",
                _ => "unknown",
            };
            fields.add(24, 1, format!("Dispose: {} ({})", dispose, dispose_name));
            let blend_name = if blend == 1 { "over" } else { "source" };
            fields.add(25, 1, format!("Blend: {} ({})", blend, blend_name));
        }
        b"IEND" => {}
        _ => return Ok(None),
    }
    Ok(Some(fields))
}

fn decode_itxt(data: &[u8], fields: &mut Fields) -> Result<(), ScanError> {
    let mut pos = 0usize;
    let key = keyword(data);
    fields.add(0, key.len(), format!("Keyword: {}", latin1(key)));
    pos += key.len() + 1;

    let r = FieldReader::big_endian(data);
    let compressed = r.u8(pos)? != 0;
    let method = r.u8(pos + 1)?;
    fields.add(
        pos,
        2,
        format!(
            "Compression: {} (method {})",
            if compressed { "yes" } else { "no" },
            method
        ),
    );
    pos += 2;

    for name in ["Language", "Translated keyword"] {
        let rest = r.bytes(pos, data.len() - pos.min(data.len()))?;
        let value = keyword(rest);
        fields.add(
            pos,
            value.len(),
            format!("{}: {}", name, String::from_utf8_lossy(value)),
        );
        pos += value.len() + 1;
    }

    let text = data.get(pos..).unwrap_or(&[]);
    let label = if compressed {
        format!("Compressed text: {} bytes", text.len())
    } else {
        format!("Text: {}", String::from_utf8_lossy(text))
    };
    fields.add(pos, text.len(), label);
    Ok(())
}
