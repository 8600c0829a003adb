//! ICC color profile decoder.
//!
//! # Profile Structure
//!
//! ```text
//! Bytes 0-127:  Header (big-endian; 'acsp' magic at byte 36)
//! Bytes 128-131: Tag count N
//! Bytes 132-:   N x (signature, offset, size), offsets from profile start
//! ```
//!
//! Tag data regions are children of the table entries that point at them;
//! several entries may share the same data.

use crate::error::ScanError;
use crate::io::{fourcc_str, FieldReader};
use crate::region::{RegionId, RegionSink, StyleFlags};
use crate::scan::{CancellationToken, Emitter, ScanContext, ScanOptions};

const FORMAT: &str = "ICC";

/// Size of the fixed profile header
pub const HEADER_SIZE: usize = 128;

/// Size of one tag table entry
pub const TAG_ENTRY_SIZE: usize = 12;

const MAGIC: &[u8; 4] = b"acsp";

// =============================================================================
// Header
// =============================================================================

/// The fields of the 128-byte header that labels are built from.
#[derive(Debug, Clone, PartialEq)]
pub struct IccHeader {
    pub size: u32,
    pub cmm: [u8; 4],
    pub version: (u8, u8, u8),
    pub class: [u8; 4],
    pub color_space: [u8; 4],
    pub pcs: [u8; 4],
    pub intent: u32,
}

impl IccHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ScanError> {
        if data.len() < HEADER_SIZE + 4 {
            return Err(ScanError::not_this_format(FORMAT, "block shorter than profile header"));
        }
        if &data[36..40] != MAGIC {
            return Err(ScanError::not_this_format(FORMAT, "missing 'acsp' signature"));
        }

        let r = FieldReader::big_endian(data);
        let bugfix = r.u8(9)?;
        Ok(Self {
            size: r.u32(0)?,
            cmm: r.fourcc(4)?,
            version: (r.u8(8)?, bugfix >> 4, bugfix & 0x0F),
            class: r.fourcc(12)?,
            color_space: r.fourcc(16)?,
            pcs: r.fourcc(20)?,
            intent: r.u32(64)?,
        })
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.version.0, self.version.1, self.version.2)
    }
}

fn class_name(class: &[u8; 4]) -> &'static str {
    match class {
        b"scnr" => "input device",
        b"mntr" => "display device",
        b"prtr" => "output device",
        b"link" => "device link",
        b"spac" => "color space",
        b"abst" => "abstract",
        b"nmcl" => "named color",
        _ => "unknown class",
    }
}

fn intent_name(intent: u32) -> &'static str {
    match intent {
        0 => "perceptual",
        1 => "media-relative colorimetric",
        2 => "saturation",
        3 => "ICC-absolute colorimetric",
        _ => "unknown",
    }
}

fn tag_description(sig: &[u8; 4]) -> Option<&'static str> {
    Some(match sig {
        b"desc" => "Profile description",
        b"cprt" => "Copyright",
        b"wtpt" => "Media white point",
        b"bkpt" => "Media black point",
        b"rXYZ" => "Red colorant",
        b"gXYZ" => "Green colorant",
        b"bXYZ" => "Blue colorant",
        b"rTRC" => "Red tone curve",
        b"gTRC" => "Green tone curve",
        b"bTRC" => "Blue tone curve",
        b"kTRC" => "Grey tone curve",
        b"chad" => "Chromatic adaptation",
        b"chrm" => "Chromaticity",
        b"dmnd" => "Device manufacturer",
        b"dmdd" => "Device model",
        b"lumi" => "Luminance",
        b"meas" => "Measurement",
        b"tech" => "Technology",
        b"view" => "Viewing conditions",
        b"vued" => "Viewing conditions description",
        b"gamt" => "Gamut",
        b"targ" => "Characterization target",
        b"cicp" => "Coding-independent code points",
        b"A2B0" => "Device to PCS, perceptual",
        b"A2B1" => "Device to PCS, colorimetric",
        b"A2B2" => "Device to PCS, saturation",
        b"B2A0" => "PCS to device, perceptual",
        b"B2A1" => "PCS to device, colorimetric",
        b"B2A2" => "PCS to device, saturation",
        b"mmod" => "Make and model",
        _ => return None,
    })
}

// =============================================================================
// Entry Points
// =============================================================================

/// Decode an ICC profile placed at absolute offset `base_offset`.
pub fn parse_icc(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
) -> Result<(), ScanError> {
    parse_icc_with(data, base_offset, parent, sink, &ScanOptions::default())
}

/// [`parse_icc`] with explicit options.
pub fn parse_icc_with(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
    options: &ScanOptions,
) -> Result<(), ScanError> {
    let mut out = Emitter::new(sink, *options, CancellationToken::new());
    decode(&mut out, data, base_offset, parent)
}

/// Walk a standalone `.icc`/`.icm` stream.
pub(crate) fn walk_stream(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    if ctx.size() < (HEADER_SIZE + 4) as u64 {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than profile header"));
    }
    let head = ctx.read_exact_at(0, HEADER_SIZE + 4)?;
    IccHeader::parse(&head)?;

    let data = ctx.read_all()?;
    let base = ctx.absolute(0);
    let root = ctx.root();
    decode(ctx.out(), &data, base, root)
}

pub(crate) fn decode(
    out: &mut Emitter<'_>,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    let header = IccHeader::parse(data)?;
    let r = FieldReader::big_endian(data);

    let declared = header.size as usize;
    let mut profile_flags = StyleFlags::NONE;
    let profile_len = if declared > data.len() || declared < HEADER_SIZE {
        profile_flags |= StyleFlags::ERROR;
        data.len()
    } else {
        declared
    };
    let profile_id = out.add(
        profile_flags,
        base,
        profile_len as u64,
        format!(
            "ICC profile v{}, {} ({}) to {}, {}",
            header.version_string(),
            fourcc_str(&header.color_space).trim_end(),
            class_name(&header.class),
            fourcc_str(&header.pcs).trim_end(),
            intent_name(header.intent)
        ),
        parent,
    );

    emit_header(out, &r, &header, base, profile_id)?;
    emit_tag_table(out, &r, base, profile_len, profile_id)
}

fn emit_header(
    out: &mut Emitter<'_>,
    r: &FieldReader<'_>,
    header: &IccHeader,
    base: u64,
    profile_id: RegionId,
) -> Result<(), ScanError> {
    let id = out.add(
        StyleFlags::HEADER,
        base,
        HEADER_SIZE as u64,
        "Profile header",
        Some(profile_id),
    );
    let mut field = |off: u64, len: u64, label: String| {
        out.add(StyleFlags::NONE, base + off, len, label, Some(id));
    };

    field(0, 4, format!("Profile size: {}", header.size));
    field(4, 4, format!("Preferred CMM: '{}'", fourcc_str(&header.cmm)));
    field(8, 4, format!("Version: {}", header.version_string()));
    field(
        12,
        4,
        format!(
            "Device class: '{}' ({})",
            fourcc_str(&header.class),
            class_name(&header.class)
        ),
    );
    field(16, 4, format!("Color space: '{}'", fourcc_str(&header.color_space)));
    field(20, 4, format!("PCS: '{}'", fourcc_str(&header.pcs)));
    field(
        24,
        12,
        format!(
            "Created: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            r.u16(24)?,
            r.u16(26)?,
            r.u16(28)?,
            r.u16(30)?,
            r.u16(32)?,
            r.u16(34)?
        ),
    );
    field(36, 4, "Signature: 'acsp'".to_string());
    field(40, 4, format!("Platform: '{}'", fourcc_str(&r.fourcc(40)?)));
    field(44, 4, format!("Flags: 0x{:08X}", r.u32(44)?));
    field(48, 4, format!("Manufacturer: '{}'", fourcc_str(&r.fourcc(48)?)));
    field(52, 4, format!("Model: '{}'", fourcc_str(&r.fourcc(52)?)));
    field(56, 8, format!("Attributes: 0x{:016X}", r.u64(56)?));
    field(
        64,
        4,
        format!("Rendering intent: {} ({})", header.intent, intent_name(header.intent)),
    );
    field(
        68,
        12,
        format!(
            "Illuminant: X {:.4}, Y {:.4}, Z {:.4}",
            r.s15_fixed16(68)?,
            r.s15_fixed16(72)?,
            r.s15_fixed16(76)?
        ),
    );
    field(80, 4, format!("Creator: '{}'", fourcc_str(&r.fourcc(80)?)));

    let profile_digest = r.bytes(84, 16)?;
    let digest = if profile_digest.iter().all(|&b| b == 0) {
        "not computed".to_string()
    } else {
        hex::encode(profile_digest)
    };
    field(84, 16, format!("Profile ID: {}", digest));
    field(100, 28, "Reserved".to_string());
    Ok(())
}

fn emit_tag_table(
    out: &mut Emitter<'_>,
    r: &FieldReader<'_>,
    base: u64,
    profile_len: usize,
    profile_id: RegionId,
) -> Result<(), ScanError> {
    let count = r.u32(HEADER_SIZE)? as usize;
    let room = (profile_len.saturating_sub(HEADER_SIZE + 4)) / TAG_ENTRY_SIZE;
    let usable = count.min(room);
    let mut flags = StyleFlags::NONE;
    if usable < count {
        flags |= StyleFlags::ERROR;
    }

    let table_id = out.add(
        flags,
        base + HEADER_SIZE as u64,
        (4 + usable * TAG_ENTRY_SIZE) as u64,
        format!("Tag table ({} tags)", count),
        Some(profile_id),
    );
    out.add(
        flags,
        base + HEADER_SIZE as u64,
        4,
        format!("Tag count: {}", count),
        Some(table_id),
    );

    for i in 0..usable {
        out.check_cancelled()?;
        let entry = HEADER_SIZE + 4 + i * TAG_ENTRY_SIZE;
        let sig = r.fourcc(entry)?;
        let offset = r.u32(entry + 4)? as usize;
        let size = r.u32(entry + 8)? as usize;

        let in_range = offset
            .checked_add(size)
            .map_or(false, |end| end <= profile_len);
        let name = tag_description(&sig)
            .map(|d| format!("'{}' {}", fourcc_str(&sig), d))
            .unwrap_or_else(|| format!("'{}'", fourcc_str(&sig)));
        let entry_flags = if in_range {
            StyleFlags::NONE
        } else {
            StyleFlags::ERROR
        };
        let entry_id = out.add(
            entry_flags,
            base + entry as u64,
            TAG_ENTRY_SIZE as u64,
            format!("Tag {} @ {}, {} bytes", name, offset, size),
            Some(table_id),
        );

        if in_range && size > 0 {
            let tag_data = r.bytes(offset, size)?;
            out.add(
                StyleFlags::NONE,
                base + offset as u64,
                size as u64,
                describe_tag_data(tag_data),
                Some(entry_id),
            );
        }
    }
    Ok(())
}

// =============================================================================
// Tag Data
// =============================================================================

/// Label for a tag's data: its type signature and a short summary.
pub fn describe_tag_data(data: &[u8]) -> String {
    let r = FieldReader::big_endian(data);
    let type_sig = match r.fourcc(0) {
        Ok(sig) => sig,
        Err(_) => return format!("Tag data ({} bytes)", data.len()),
    };
    let summary = summarize(&type_sig, &r).unwrap_or_else(|_| format!("{} bytes", data.len()));
    format!("Type '{}': {}", fourcc_str(&type_sig), summary)
}

fn summarize(type_sig: &[u8; 4], r: &FieldReader<'_>) -> Result<String, ScanError> {
    Ok(match type_sig {
        b"desc" => {
            let len = r.u32(8)? as usize;
            let text = r.bytes(12, len.min(r.len().saturating_sub(12)))?;
            quote_ascii(text)
        }
        b"text" => quote_ascii(r.bytes(8, r.len().saturating_sub(8))?),
        b"mluc" => {
            let records = r.u32(8)?;
            if records == 0 {
                "no records".to_string()
            } else {
                let lang = r.bytes(16, 2)?;
                let country = r.bytes(18, 2)?;
                let len = r.u32(20)? as usize;
                let offset = r.u32(24)? as usize;
                let units: Vec<u16> = r
                    .bytes(offset, len)?
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                format!(
                    "{}-{}: \"{}\"{}",
                    String::from_utf8_lossy(lang),
                    String::from_utf8_lossy(country),
                    String::from_utf16_lossy(&units).trim_end_matches('\0'),
                    if records > 1 {
                        format!(" (+{} more)", records - 1)
                    } else {
                        String::new()
                    }
                )
            }
        }
        b"XYZ " => {
            let triples = (r.len().saturating_sub(8)) / 12;
            let mut parts = Vec::new();
            for i in 0..triples.min(2) {
                let at = 8 + i * 12;
                parts.push(format!(
                    "X {:.4}, Y {:.4}, Z {:.4}",
                    r.s15_fixed16(at)?,
                    r.s15_fixed16(at + 4)?,
                    r.s15_fixed16(at + 8)?
                ));
            }
            if triples > 2 {
                parts.push(format!("+{} more", triples - 2));
            }
            parts.join("; ")
        }
        b"curv" => match r.u32(8)? {
            0 => "identity".to_string(),
            1 => format!("gamma {:.3}", r.u16(12)? as f64 / 256.0),
            n => format!("{}-entry curve", n),
        },
        b"para" => {
            let function = r.u16(8)?;
            format!("function type {}, gamma {:.3}", function, r.s15_fixed16(12)?)
        }
        b"sig " => format!("'{}'", fourcc_str(&r.fourcc(8)?)),
        b"sf32" => {
            let values = (r.len().saturating_sub(8)) / 4;
            format!("{} fixed-point values", values)
        }
        _ => format!("{} bytes", r.len()),
    })
}

fn quote_ascii(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    format!("\"{}\"", String::from_utf8_lossy(&bytes[..end]))
}
