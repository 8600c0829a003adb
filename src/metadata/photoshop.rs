//! Photoshop image resources (`8BIM` blocks) and IPTC-IIM datasets.
//!
//! # Image Resource Block
//!
//! ```text
//! "8BIM" | u16 id | Pascal name, padded to even | u32 size | data, padded to even
//! ```
//!
//! All integers are big-endian. Resources that carry other metadata blocks
//! (IPTC, EXIF, XMP, ICC, JPEG thumbnails) are handed to their decoders as
//! children of the resource data region.

use tracing::debug;

use crate::error::ScanError;
use crate::format::jpeg;
use crate::io::FieldReader;
use crate::metadata::{exif, icc, xmp};
use crate::region::{RegionId, RegionSink, StyleFlags};
use crate::scan::{absorb_nested, CancellationToken, Emitter, ScanOptions};

const FORMAT: &str = "Photoshop";
const IIM_FORMAT: &str = "IPTC-IIM";

/// Signatures accepted at the start of a resource block
const SIGNATURES: [&[u8; 4]; 4] = [b"8BIM", b"MeSa", b"PHUT", b"DCSR"];

/// Marker byte that starts every IIM dataset
pub const IIM_TAG_MARKER: u8 = 0x1C;

/// Header in front of the JFIF data of a thumbnail resource
pub const THUMBNAIL_HEADER_SIZE: usize = 28;

const MAX_SHOWN_CHARS: usize = 64;

pub const RES_RESOLUTION_INFO: u16 = 0x03ED;
pub const RES_IPTC_NAA: u16 = 0x0404;
pub const RES_THUMBNAIL_BGR: u16 = 0x0409;
pub const RES_THUMBNAIL: u16 = 0x040C;
pub const RES_ICC_PROFILE: u16 = 0x040F;
pub const RES_EXIF_DATA_1: u16 = 0x0422;
pub const RES_EXIF_DATA_3: u16 = 0x0423;
pub const RES_XMP: u16 = 0x0424;
pub const RES_CAPTION_DIGEST: u16 = 0x0425;

fn resource_name(id: u16) -> &'static str {
    match id {
        0x03E8 => "Channels, rows, columns, depth, mode",
        0x03E9 => "Print info",
        0x03ED => "Resolution info",
        0x03EE => "Alpha channel names",
        0x03F0 => "Caption",
        0x03F3 => "Print flags",
        0x03F5 => "Color halftoning info",
        0x03F8 => "Color transfer functions",
        0x0400 => "Layer state",
        0x0402 => "Layer groups",
        0x0404 => "IPTC-NAA record",
        0x0406 => "JPEG quality",
        0x0408 => "Grid and guides",
        0x0409 => "Thumbnail (BGR)",
        0x040A => "Copyright flag",
        0x040B => "URL",
        0x040C => "Thumbnail",
        0x040D => "Global angle",
        0x040F => "ICC profile",
        0x0410 => "Watermark",
        0x0411 => "ICC untagged profile",
        0x0412 => "Effects visible",
        0x0414 => "Document ID seed",
        0x0415 => "Unicode alpha names",
        0x0419 => "Global altitude",
        0x041A => "Slices",
        0x041D => "Alpha identifiers",
        0x041E => "URL list",
        0x0421 => "Version info",
        0x0422 => "EXIF data 1",
        0x0423 => "EXIF data 3",
        0x0424 => "XMP metadata",
        0x0425 => "Caption digest",
        0x0426 => "Print scale",
        0x0428 => "Pixel aspect ratio",
        0x043A | 0x043B => "Print information",
        0x07D0..=0x0BB6 => "Path information",
        0x0BB7 => "Clipping path name",
        0x2710 => "Print flags information",
        _ => "Unknown resource",
    }
}

// =============================================================================
// IIM Datasets
// =============================================================================

/// One `{0x1C, record, dataset, length, data}` record of an IPTC-IIM stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IimDataset {
    /// Offset of the 0x1C marker within the IIM block
    pub offset: usize,
    /// Marker, numbers and length field, including extended length bytes
    pub header_len: usize,
    pub record: u8,
    pub dataset: u8,
    pub data: Vec<u8>,
}

impl IimDataset {
    pub fn total_len(&self) -> usize {
        self.header_len + self.data.len()
    }

    pub fn name(&self) -> &'static str {
        iim_dataset_name(self.record, self.dataset)
    }

    pub fn value_summary(&self) -> String {
        match (self.record, self.dataset) {
            (1, 90) => {
                if self.data == b"\x1B%G" {
                    "UTF-8".to_string()
                } else {
                    hex::encode(&self.data)
                }
            }
            (_, 0) if self.data.len() == 2 => {
                u16::from_be_bytes([self.data[0], self.data[1]]).to_string()
            }
            _ => preview_text(&self.data),
        }
    }
}

/// Datasets of one IIM block.
#[derive(Debug, Clone, PartialEq)]
pub struct IimBlock {
    pub datasets: Vec<IimDataset>,
    /// Offset of the first byte that is not part of a dataset
    pub end: usize,
}

/// Split an IIM block into datasets.
///
/// Parsing stops at the first byte that is not a dataset marker.
pub fn parse_iim_datasets(data: &[u8]) -> Result<IimBlock, ScanError> {
    if data.first() != Some(&IIM_TAG_MARKER) {
        return Err(ScanError::not_this_format(IIM_FORMAT, "missing 0x1C dataset marker"));
    }

    let r = FieldReader::big_endian(data);
    let mut datasets = Vec::new();
    let mut pos = 0;
    while pos + 5 <= data.len() && data[pos] == IIM_TAG_MARKER {
        let record = r.u8(pos + 1)?;
        let dataset = r.u8(pos + 2)?;
        let raw_len = r.u16(pos + 3)?;

        let (header_len, len) = if raw_len & 0x8000 != 0 {
            // Extended dataset: the low bits count the bytes of the real length
            let count = (raw_len & 0x7FFF) as usize;
            if count == 0 || count > 8 {
                return Err(ScanError::malformed(IIM_FORMAT, "bad extended length size"));
            }
            let mut len = 0usize;
            for &b in r.bytes(pos + 5, count)? {
                len = (len << 8) | b as usize;
            }
            (5 + count, len)
        } else {
            (5, raw_len as usize)
        };

        let value = r.bytes(pos + header_len, len)?;
        datasets.push(IimDataset {
            offset: pos,
            header_len,
            record,
            dataset,
            data: value.to_vec(),
        });
        pos += header_len + len;
    }
    Ok(IimBlock {
        datasets,
        end: pos,
    })
}

fn iim_dataset_name(record: u8, dataset: u8) -> &'static str {
    match (record, dataset) {
        (1, 0) => "Model version",
        (1, 5) => "Destination",
        (1, 20) => "File format",
        (1, 22) => "File format version",
        (1, 30) => "Service identifier",
        (1, 40) => "Envelope number",
        (1, 50) => "Product ID",
        (1, 70) => "Date sent",
        (1, 80) => "Time sent",
        (1, 90) => "Coded character set",
        (1, 100) => "Unique name of object",
        (2, 0) => "Record version",
        (2, 5) => "Object name",
        (2, 7) => "Edit status",
        (2, 10) => "Urgency",
        (2, 12) => "Subject reference",
        (2, 15) => "Category",
        (2, 20) => "Supplemental category",
        (2, 25) => "Keywords",
        (2, 26) => "Content location code",
        (2, 27) => "Content location name",
        (2, 40) => "Special instructions",
        (2, 55) => "Date created",
        (2, 60) => "Time created",
        (2, 62) => "Digital creation date",
        (2, 63) => "Digital creation time",
        (2, 65) => "Originating program",
        (2, 70) => "Program version",
        (2, 80) => "By-line",
        (2, 85) => "By-line title",
        (2, 90) => "City",
        (2, 92) => "Sub-location",
        (2, 95) => "Province/State",
        (2, 100) => "Country code",
        (2, 101) => "Country",
        (2, 103) => "Original transmission reference",
        (2, 105) => "Headline",
        (2, 110) => "Credit",
        (2, 115) => "Source",
        (2, 116) => "Copyright notice",
        (2, 118) => "Contact",
        (2, 120) => "Caption/Abstract",
        (2, 122) => "Writer/Editor",
        (2, 135) => "Language identifier",
        _ => "Unknown dataset",
    }
}

// =============================================================================
// Resource Datasets
// =============================================================================

/// Fixed-point resolution record of resource 0x03ED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionInfo {
    pub h_res: f64,
    pub h_res_unit: u16,
    pub v_res: f64,
    pub v_res_unit: u16,
}

/// Header of a thumbnail resource (0x0409 / 0x040C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailHeader {
    /// 1 = JFIF, 0 = raw RGB
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub compressed_size: u32,
    pub bits_per_pixel: u16,
}

/// Decoded contents of a resource, by resource id.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageResourceDataset {
    Default,
    Iptc(IimBlock),
    CaptionDigest([u8; 16]),
    ResolutionInfo(ResolutionInfo),
    Thumbnail(ThumbnailHeader),
    Exif,
    Xmp,
    IccProfile,
}

impl ImageResourceDataset {
    pub fn parse(id: u16, data: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::big_endian(data);
        Ok(match id {
            RES_IPTC_NAA => Self::Iptc(parse_iim_datasets(data)?),
            RES_CAPTION_DIGEST => {
                let mut digest = [0u8; 16];
                digest.copy_from_slice(r.bytes(0, 16)?);
                Self::CaptionDigest(digest)
            }
            RES_RESOLUTION_INFO => Self::ResolutionInfo(ResolutionInfo {
                h_res: r.u16_fixed16(0)?,
                h_res_unit: r.u16(4)?,
                v_res: r.u16_fixed16(8)?,
                v_res_unit: r.u16(12)?,
            }),
            RES_THUMBNAIL | RES_THUMBNAIL_BGR => Self::Thumbnail(ThumbnailHeader {
                format: r.u32(0)?,
                width: r.u32(4)?,
                height: r.u32(8)?,
                compressed_size: r.u32(20)?,
                bits_per_pixel: r.u16(24)?,
            }),
            RES_EXIF_DATA_1 | RES_EXIF_DATA_3 => Self::Exif,
            RES_XMP => Self::Xmp,
            RES_ICC_PROFILE => Self::IccProfile,
            _ => Self::Default,
        })
    }

    /// Short text appended to the resource label.
    pub fn summary(&self) -> Option<String> {
        match self {
            Self::Iptc(block) => Some(format!("{} datasets", block.datasets.len())),
            Self::CaptionDigest(digest) => Some(format!("MD5 {}", hex::encode(digest))),
            Self::ResolutionInfo(info) => Some(format!(
                "{} x {} {}",
                info.h_res,
                info.v_res,
                if info.h_res_unit == 2 { "dpcm" } else { "dpi" }
            )),
            Self::Thumbnail(header) => Some(format!(
                "{}x{} {}",
                header.width,
                header.height,
                if header.format == 1 { "JFIF" } else { "raw" }
            )),
            _ => None,
        }
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Decode a sequence of Photoshop image resource blocks.
pub fn parse_photoshop(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
) -> Result<(), ScanError> {
    parse_photoshop_with(data, base_offset, parent, sink, &ScanOptions::default())
}

/// [`parse_photoshop`] with explicit options.
pub fn parse_photoshop_with(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
    options: &ScanOptions,
) -> Result<(), ScanError> {
    let mut out = Emitter::new(sink, *options, CancellationToken::new());
    decode(&mut out, data, base_offset, parent)
}

pub(crate) fn decode(
    out: &mut Emitter<'_>,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    if data.len() < 4 || !SIGNATURES.iter().any(|s| &data[..4] == s.as_slice()) {
        return Err(ScanError::not_this_format(FORMAT, "missing 8BIM signature"));
    }

    let r = FieldReader::big_endian(data);
    let mut pos = 0usize;
    while pos + 4 <= data.len() {
        out.check_cancelled()?;
        if !SIGNATURES.iter().any(|s| &data[pos..pos + 4] == s.as_slice()) {
            break;
        }

        let id = r.u16(pos + 4)?;
        let name_len = r.u8(pos + 6)? as usize;
        // Length byte plus name, padded to an even total
        let name_field = (1 + name_len + 1) & !1;
        let name = String::from_utf8_lossy(r.bytes(pos + 7, name_len)?).into_owned();
        let size_at = pos + 6 + name_field;
        let size = r.u32(size_at)? as usize;
        let data_at = size_at + 4;

        if data_at + size > data.len() {
            out.add(
                StyleFlags::ERROR,
                base + pos as u64,
                (data.len() - pos) as u64,
                format!(
                    "8BIM 0x{:04X} {}: size {} runs past end of block",
                    id,
                    resource_name(id),
                    size
                ),
                parent,
            );
            debug!(id, size, "Photoshop resource overruns its block");
            return Ok(());
        }
        let padded = (size + 1) & !1;
        let block_len = (data_at - pos + padded).min(data.len() - pos);
        let body = r.bytes(data_at, size)?;

        let dataset = match ImageResourceDataset::parse(id, body) {
            Ok(dataset) => dataset,
            Err(err) => {
                debug!(id, error = %err, "Undecodable Photoshop resource");
                ImageResourceDataset::Default
            }
        };

        let mut label = format!("8BIM 0x{:04X} {}", id, resource_name(id));
        if !name.is_empty() {
            label.push_str(&format!(" \"{}\"", name));
        }
        match dataset.summary() {
            Some(summary) => label.push_str(&format!(" ({})", summary)),
            None => label.push_str(&format!(" ({} bytes)", size)),
        }
        let block_id = out.add(
            StyleFlags::NONE,
            base + pos as u64,
            block_len as u64,
            label,
            parent,
        );

        out.add(
            StyleFlags::HEADER,
            base + pos as u64,
            (data_at - pos) as u64,
            format!("Resource header: id 0x{:04X}, size {}", id, size),
            Some(block_id),
        );
        let data_id = out.add(
            StyleFlags::NONE,
            base + data_at as u64,
            size as u64,
            format!("Resource data ({} bytes)", size),
            Some(block_id),
        );
        emit_dataset(out, &dataset, body, base + data_at as u64, data_id)?;

        if padded > size && data_at + padded <= data.len() {
            out.add(
                StyleFlags::MUTED_TEXT,
                base + (data_at + size) as u64,
                1,
                "Padding",
                Some(block_id),
            );
        }
        pos = data_at + padded;
    }

    if pos < data.len() {
        out.add(
            StyleFlags::ERROR,
            base + pos as u64,
            (data.len() - pos) as u64,
            "Unrecognized trailing bytes",
            parent,
        );
    }
    Ok(())
}

fn emit_dataset(
    out: &mut Emitter<'_>,
    dataset: &ImageResourceDataset,
    body: &[u8],
    base: u64,
    data_id: RegionId,
) -> Result<(), ScanError> {
    let parent = Some(data_id);
    match dataset {
        ImageResourceDataset::Iptc(block) => {
            emit_iim(out, block, body, base, parent);
            Ok(())
        }
        ImageResourceDataset::Exif => {
            absorb_nested(exif::decode(out, body, base, parent), "Photoshop EXIF", base)
        }
        ImageResourceDataset::Xmp => {
            absorb_nested(xmp::decode(out, body, base, parent), "Photoshop XMP", base)
        }
        ImageResourceDataset::IccProfile => {
            absorb_nested(icc::decode(out, body, base, parent), "Photoshop ICC", base)
        }
        ImageResourceDataset::Thumbnail(header) => {
            out.add(
                StyleFlags::HEADER,
                base,
                THUMBNAIL_HEADER_SIZE as u64,
                format!(
                    "Thumbnail header: {}x{}, {} bpp, {} bytes compressed",
                    header.width, header.height, header.bits_per_pixel, header.compressed_size
                ),
                parent,
            );
            if header.format == 1 && body.len() > THUMBNAIL_HEADER_SIZE {
                let jfif = &body[THUMBNAIL_HEADER_SIZE..];
                let offset = base + THUMBNAIL_HEADER_SIZE as u64;
                let thumb_id = out.add(
                    StyleFlags::NONE,
                    offset,
                    jfif.len() as u64,
                    format!("JPEG thumbnail ({} bytes)", jfif.len()),
                    parent,
                );
                out.scan_embedded(jfif, offset, Some(thumb_id), "Photoshop thumbnail", jpeg::walk)?;
            }
            Ok(())
        }
        ImageResourceDataset::ResolutionInfo(info) => {
            let mut field = |off: u64, len: u64, label: String| {
                out.add(StyleFlags::NONE, base + off, len, label, parent);
            };
            field(0, 4, format!("Horizontal resolution: {}", info.h_res));
            field(4, 4, format!("Horizontal unit: {}", info.h_res_unit));
            field(8, 4, format!("Vertical resolution: {}", info.v_res));
            field(12, 4, format!("Vertical unit: {}", info.v_res_unit));
            Ok(())
        }
        ImageResourceDataset::CaptionDigest(_) | ImageResourceDataset::Default => Ok(()),
    }
}

/// Decode a bare IPTC-IIM block (TIFF tag 0x83BB or resource 0x0404).
pub(crate) fn decode_iim(
    out: &mut Emitter<'_>,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    let block = parse_iim_datasets(data)?;
    emit_iim(out, &block, data, base, parent);
    Ok(())
}

fn emit_iim(
    out: &mut Emitter<'_>,
    block: &IimBlock,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) {
    let end = block.end;
    let block_id = out.add(
        StyleFlags::SUMMARY_LIST,
        base,
        data.len() as u64,
        format!("IPTC-IIM ({} datasets)", block.datasets.len()),
        parent,
    );
    for dataset in &block.datasets {
        out.add(
            StyleFlags::NONE,
            base + dataset.offset as u64,
            dataset.total_len() as u64,
            format!(
                "{}:{:03} {}: {}",
                dataset.record,
                dataset.dataset,
                dataset.name(),
                dataset.value_summary()
            ),
            Some(block_id),
        );
    }

    if end < data.len() {
        let rest = &data[end..];
        let (flags, label) = if rest.iter().all(|&b| b == 0) {
            (StyleFlags::MUTED_TEXT, "Padding")
        } else {
            (StyleFlags::ERROR, "Unparsed IIM bytes")
        };
        out.add(flags, base + end as u64, rest.len() as u64, label, Some(block_id));
    }
}

fn preview_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() > MAX_SHOWN_CHARS {
        let cut: String = text.chars().take(MAX_SHOWN_CHARS).collect();
        format!("\"{}...\"", cut)
    } else {
        format!("\"{}\"", text)
    }
}
