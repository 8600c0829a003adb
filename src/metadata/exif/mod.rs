//! EXIF / TIFF IFD decoder.
//!
//! # Block Structure
//!
//! ```text
//! Bytes 0-1: Byte order ("II" little-endian, "MM" big-endian)
//! Bytes 2-3: Magic (42)
//! Bytes 4-7: Offset of IFD0
//!
//! IFD: u16 count | count x 12-byte entries | u32 offset of next IFD
//! Entry: u16 tag | u16 type | u32 count | 4-byte value or offset
//! ```
//!
//! All offsets are relative to the start of the TIFF header. Values whose
//! total size is at most 4 bytes are stored in the entry itself.
//!
//! # Region Layout
//!
//! The header and IFD0 are emitted under the caller's parent. Each IFD gets
//! one region with a child per entry; out-of-line values and the sub-IFDs
//! opened by pointer tags are children of the entry that references them.
//! The next IFD in the chain (IFD1, the thumbnail directory) hangs off the
//! "next IFD" field of the previous one. A JPEG thumbnail is re-scanned with
//! the JPEG walker under the `JPEGInterchangeFormat` entry.

pub mod tags;

use std::collections::HashSet;
use std::fmt::Display;

use tracing::debug;

use crate::error::ScanError;
use crate::format::jpeg;
use crate::io::{ByteOrder, FieldReader};
use crate::metadata::{icc, photoshop, xmp};
use crate::region::{RegionId, RegionSink, StyleFlags};
use crate::scan::{absorb_nested, CancellationToken, Emitter, ScanContext, ScanOptions};

pub use tags::{FieldType, IfdKind};
use tags::*;

const FORMAT: &str = "EXIF";

/// Size of the TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of one IFD entry in bytes
pub const IFD_ENTRY_SIZE: usize = 12;

/// Longest IFD chain followed from IFD0
const MAX_CHAIN: u16 = 16;

/// Values shown in an entry label before eliding the rest
const MAX_SHOWN_VALUES: usize = 8;

/// Longest string shown in an entry label
const MAX_SHOWN_CHARS: usize = 80;

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed 8-byte TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub first_ifd_offset: u32,
}

impl TiffHeader {
    /// Parse the header at the start of `data`.
    ///
    /// A wrong byte-order mark or magic is [`ScanError::NotThisFormat`]. The
    /// IFD0 offset is not checked here.
    pub fn parse(data: &[u8]) -> Result<Self, ScanError> {
        if data.len() < TIFF_HEADER_SIZE {
            return Err(ScanError::not_this_format(FORMAT, "block shorter than TIFF header"));
        }

        let byte_order = ByteOrder::from_marker(data).ok_or_else(|| {
            ScanError::not_this_format(
                FORMAT,
                format!("invalid byte order mark {:02X}{:02X}", data[0], data[1]),
            )
        })?;

        let version = byte_order.read_u16(&data[2..4]);
        if version != 42 {
            let reason = if version == 43 {
                "BigTIFF is not supported".to_string()
            } else {
                format!("invalid TIFF magic {}", version)
            };
            return Err(ScanError::not_this_format(FORMAT, reason));
        }

        Ok(Self {
            byte_order,
            first_ifd_offset: byte_order.read_u32(&data[4..8]),
        })
    }

    fn mark(&self) -> &'static str {
        match self.byte_order {
            ByteOrder::LittleEndian => "II",
            ByteOrder::BigEndian => "MM",
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    /// `None` for type codes outside the TIFF 6.0 set
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u32,
    /// Raw value/offset field
    pub value_field: [u8; 4],
    /// Position of the entry inside the TIFF block
    pub entry_offset: usize,
}

impl IfdEntry {
    fn parse(r: &FieldReader<'_>, entry_offset: usize) -> Result<Self, ScanError> {
        let field_type_raw = r.u16(entry_offset + 2)?;
        Ok(Self {
            tag: r.u16(entry_offset)?,
            field_type: FieldType::from_u16(field_type_raw),
            field_type_raw,
            count: r.u32(entry_offset + 4)?,
            value_field: r.fourcc(entry_offset + 8)?,
            entry_offset,
        })
    }

    /// Total size of the value in bytes, if the type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type?.total_size(self.count)
    }

    /// Whether the value lives in the entry's own value/offset field.
    pub fn is_inline(&self) -> bool {
        self.field_type
            .map_or(true, |field_type| field_type.fits_inline(self.count))
    }

    /// The value/offset field read as an offset.
    pub fn value_offset(&self, order: ByteOrder) -> u32 {
        order.read_u32(&self.value_field)
    }

    /// `(offset, len)` of the value inside the TIFF block.
    pub fn value_range(&self, order: ByteOrder) -> Option<(usize, usize)> {
        let size = usize::try_from(self.value_byte_size()?).ok()?;
        if self.is_inline() {
            Some((self.entry_offset + 8, size))
        } else {
            Some((self.value_offset(order) as usize, size))
        }
    }

    /// Borrow the value bytes from the TIFF block.
    pub fn value_bytes<'d>(&self, data: &'d [u8], order: ByteOrder) -> Result<&'d [u8], ScanError> {
        let (offset, len) = self.value_range(order).ok_or_else(|| {
            ScanError::malformed(
                FORMAT,
                format!("tag 0x{:04X} has unknown type {}", self.tag, self.field_type_raw),
            )
        })?;
        FieldReader::new(data, order).bytes(offset, len)
    }

    /// First value as an unsigned integer (BYTE, SHORT or LONG).
    pub fn first_u32(&self, data: &[u8], order: ByteOrder) -> Option<u32> {
        let bytes = self.value_bytes(data, order).ok()?;
        let r = FieldReader::new(bytes, order);
        match self.field_type? {
            FieldType::Byte | FieldType::Undefined => r.u8(0).ok().map(u32::from),
            FieldType::Short => r.u16(0).ok().map(u32::from),
            FieldType::Long => r.u32(0).ok(),
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub offset: usize,
    pub entries: Vec<IfdEntry>,
    pub next_offset: u32,
}

impl Ifd {
    /// Parse the IFD at `offset`. Fails if any part lies outside `r`.
    pub fn parse(r: &FieldReader<'_>, offset: usize) -> Result<Self, ScanError> {
        let count = r.u16(offset)? as usize;
        let entries = (0..count)
            .map(|i| IfdEntry::parse(r, offset + 2 + i * IFD_ENTRY_SIZE))
            .collect::<Result<Vec<_>, _>>()?;
        let next_offset = r.u32(offset + 2 + count * IFD_ENTRY_SIZE)?;
        Ok(Self {
            offset,
            entries,
            next_offset,
        })
    }

    /// Bytes covered: count, entries and next pointer.
    pub fn byte_len(&self) -> usize {
        2 + self.entries.len() * IFD_ENTRY_SIZE + 4
    }

    fn next_field_offset(&self) -> usize {
        self.offset + 2 + self.entries.len() * IFD_ENTRY_SIZE
    }

    pub fn find(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Decode a TIFF/EXIF block placed at absolute offset `base_offset`.
pub fn parse_exif(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
) -> Result<(), ScanError> {
    parse_exif_with(data, base_offset, parent, sink, &ScanOptions::default())
}

/// [`parse_exif`] with explicit options.
pub fn parse_exif_with(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
    options: &ScanOptions,
) -> Result<(), ScanError> {
    let mut out = Emitter::new(sink, *options, CancellationToken::new());
    decode(&mut out, data, base_offset, parent)
}

/// Walk a standalone TIFF stream.
pub(crate) fn walk_stream(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    if ctx.size() < TIFF_HEADER_SIZE as u64 {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than TIFF header"));
    }
    let head = ctx.read_exact_at(0, TIFF_HEADER_SIZE)?;
    TiffHeader::parse(&head)?;

    let data = ctx.read_all()?;
    let base = ctx.absolute(0);
    let root = ctx.root();
    decode(ctx.out(), &data, base, root)
}

/// Decode a TIFF block through an existing emitter.
pub(crate) fn decode(
    out: &mut Emitter<'_>,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    let header = TiffHeader::parse(data)?;
    let order = header.byte_order;
    if header.first_ifd_offset as u64 + 2 > data.len() as u64 {
        return Err(ScanError::malformed(
            FORMAT,
            format!(
                "IFD0 offset {} outside block of {} bytes",
                header.first_ifd_offset,
                data.len()
            ),
        ));
    }

    let header_id = out.add(
        StyleFlags::HEADER,
        base,
        TIFF_HEADER_SIZE as u64,
        format!("TIFF header ({}, {})", header.mark(), order.name()),
        parent,
    );
    out.add(
        StyleFlags::NONE,
        base,
        2,
        format!("Byte order: {}", header.mark()),
        Some(header_id),
    );
    out.add(StyleFlags::NONE, base + 2, 2, "Magic: 42", Some(header_id));
    out.add(
        StyleFlags::NONE,
        base + 4,
        4,
        format!("First IFD offset: {}", header.first_ifd_offset),
        Some(header_id),
    );

    let mut walker = IfdWalker {
        out,
        data,
        base,
        order,
        visited: HashSet::new(),
    };
    walker.walk_chain(header.first_ifd_offset, parent)
}

// =============================================================================
// IfdWalker
// =============================================================================

struct IfdWalker<'o, 'a, 'd> {
    out: &'o mut Emitter<'a>,
    data: &'d [u8],
    base: u64,
    order: ByteOrder,
    visited: HashSet<u32>,
}

impl<'d> IfdWalker<'_, '_, 'd> {
    fn reader(&self) -> FieldReader<'d> {
        FieldReader::new(self.data, self.order)
    }

    fn walk_chain(&mut self, first: u32, parent: Option<RegionId>) -> Result<(), ScanError> {
        let ifd = Ifd::parse(&self.reader(), first as usize)?;
        self.visited.insert(first);

        let mut current = ifd;
        let mut parent = parent;
        let mut index = 0u16;
        loop {
            let next_id = self.emit_ifd(&current, IfdKind::in_chain(index), parent)?;
            let next = current.next_offset;
            index += 1;
            if next == 0 || index >= MAX_CHAIN || !self.visited.insert(next) {
                break;
            }
            match Ifd::parse(&self.reader(), next as usize) {
                Ok(ifd) => {
                    current = ifd;
                    parent = Some(next_id);
                }
                Err(err) => {
                    debug!(offset = next, error = %err, "Unreadable chained IFD");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Emit an IFD and its entries. Returns the id of its next-IFD field.
    fn emit_ifd(
        &mut self,
        ifd: &Ifd,
        kind: IfdKind,
        parent: Option<RegionId>,
    ) -> Result<RegionId, ScanError> {
        self.out.check_cancelled()?;

        let offset = self.base + ifd.offset as u64;
        let ifd_id = self.out.add(
            StyleFlags::NONE,
            offset,
            ifd.byte_len() as u64,
            format!("{} ({} entries)", kind.label(), ifd.entries.len()),
            parent,
        );
        self.out.add(
            StyleFlags::HEADER,
            offset,
            2,
            format!("Entry count: {}", ifd.entries.len()),
            Some(ifd_id),
        );

        for entry in &ifd.entries {
            self.emit_entry(entry, ifd, kind, ifd_id)?;
        }

        let next = ifd.next_offset;
        let (flags, label) = if next == 0 {
            (StyleFlags::NONE, "Next IFD: none".to_string())
        } else if next as u64 + 2 > self.data.len() as u64 {
            (
                StyleFlags::ERROR,
                format!("Next IFD offset: {} (out of range)", next),
            )
        } else {
            (StyleFlags::NONE, format!("Next IFD offset: {}", next))
        };
        Ok(self.out.add(
            flags,
            self.base + ifd.next_field_offset() as u64,
            4,
            label,
            Some(ifd_id),
        ))
    }

    fn emit_entry(
        &mut self,
        entry: &IfdEntry,
        ifd: &Ifd,
        kind: IfdKind,
        ifd_id: RegionId,
    ) -> Result<(), ScanError> {
        let name = tag_name(kind, entry.tag)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Tag 0x{:04X}", entry.tag));
        let type_name = entry
            .field_type
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| format!("type {}", entry.field_type_raw));

        let value = entry.value_bytes(self.data, self.order);
        let mut flags = StyleFlags::NONE;
        let summary = match &value {
            Ok(bytes) => format_value(entry, bytes, self.order),
            Err(_) if entry.field_type.is_none() => "unknown type".to_string(),
            Err(_) => {
                flags |= StyleFlags::ERROR;
                format!("value at offset {} out of range", entry.value_offset(self.order))
            }
        };

        // Sub-IFDs are parsed before the entry is emitted so it can be flagged.
        let mut sub_ifd = None;
        let mut note = String::new();
        if let Some(sub_kind) = sub_ifd_kind(kind, entry.tag) {
            match entry.first_u32(self.data, self.order) {
                Some(target) if self.visited.contains(&target) => {
                    flags |= StyleFlags::ERROR;
                    note = " (IFD already visited)".to_string();
                }
                Some(target) => match Ifd::parse(&self.reader(), target as usize) {
                    Ok(ifd) => {
                        self.visited.insert(target);
                        sub_ifd = Some((ifd, sub_kind));
                    }
                    Err(_) => {
                        flags |= StyleFlags::ERROR;
                        note = " (IFD out of range)".to_string();
                    }
                },
                None => {
                    flags |= StyleFlags::ERROR;
                    note = " (bad pointer)".to_string();
                }
            }
        }

        let entry_id = self.out.add(
            flags,
            self.base + entry.entry_offset as u64,
            IFD_ENTRY_SIZE as u64,
            format!("{} ({} x{}): {}{}", name, type_name, entry.count, summary, note),
            Some(ifd_id),
        );

        if let (Ok(bytes), false) = (&value, entry.is_inline()) {
            let value_offset = self.base + entry.value_offset(self.order) as u64;
            let value_id = self.out.add(
                StyleFlags::NONE,
                value_offset,
                bytes.len() as u64,
                format!("{} value ({} bytes)", name, bytes.len()),
                Some(entry_id),
            );
            self.decode_embedded(entry.tag, bytes, value_offset, value_id)?;
        }

        if let Some((sub, sub_kind)) = sub_ifd {
            self.emit_ifd(&sub, sub_kind, Some(entry_id))?;
        }

        if entry.tag == TAG_JPEG_INTERCHANGE_FORMAT {
            self.emit_thumbnail(entry, ifd, entry_id)?;
        }
        Ok(())
    }

    /// Hand tags that carry whole metadata blocks to their decoders.
    fn decode_embedded(
        &mut self,
        tag: u16,
        bytes: &[u8],
        offset: u64,
        value_id: RegionId,
    ) -> Result<(), ScanError> {
        let result = match tag {
            TAG_ICC_PROFILE => icc::decode(self.out, bytes, offset, Some(value_id)),
            TAG_IPTC_NAA => photoshop::decode_iim(self.out, bytes, offset, Some(value_id)),
            TAG_PHOTOSHOP => photoshop::decode(self.out, bytes, offset, Some(value_id)),
            TAG_XML_PACKET => xmp::decode(self.out, bytes, offset, Some(value_id)),
            _ => return Ok(()),
        };
        absorb_nested(result, "TIFF embedded block", offset)
    }

    fn emit_thumbnail(
        &mut self,
        entry: &IfdEntry,
        ifd: &Ifd,
        entry_id: RegionId,
    ) -> Result<(), ScanError> {
        let start = match entry.first_u32(self.data, self.order) {
            Some(start) => start as usize,
            None => return Ok(()),
        };
        let len = match ifd
            .find(TAG_JPEG_INTERCHANGE_FORMAT_LENGTH)
            .and_then(|e| e.first_u32(self.data, self.order))
        {
            Some(len) => len as usize,
            None => {
                debug!("JPEG thumbnail offset without a length");
                return Ok(());
            }
        };
        let compression = ifd
            .find(TAG_COMPRESSION)
            .and_then(|e| e.first_u32(self.data, self.order));

        let bytes = match self.reader().bytes(start, len) {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!(start, len, "JPEG thumbnail outside EXIF block");
                return Ok(());
            }
        };

        let offset = self.base + start as u64;
        let thumb_id = self.out.add(
            StyleFlags::NONE,
            offset,
            len as u64,
            format!("JPEG thumbnail ({} bytes)", len),
            Some(entry_id),
        );
        if matches!(compression, Some(1)) {
            debug!("Thumbnail is marked uncompressed; not scanning as JPEG");
            return Ok(());
        }
        self.out
            .scan_embedded(bytes, offset, Some(thumb_id), "EXIF thumbnail", jpeg::walk)
    }
}

// =============================================================================
// Value Formatting
// =============================================================================

fn format_value(entry: &IfdEntry, bytes: &[u8], order: ByteOrder) -> String {
    let field_type = match entry.field_type {
        Some(field_type) => field_type,
        None => return format!("{} bytes", bytes.len()),
    };
    let r = FieldReader::new(bytes, order);
    let count = entry.count as usize;
    let shown = count.min(MAX_SHOWN_VALUES);

    let text = match field_type {
        FieldType::Ascii => return quote(bytes),
        FieldType::Byte | FieldType::Undefined => {
            if is_printable(bytes) {
                return quote(bytes);
            }
            if count > MAX_SHOWN_VALUES {
                return format!("{} bytes", count);
            }
            return bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ");
        }
        FieldType::SByte => join((0..shown).filter_map(|i| r.i8(i).ok())),
        FieldType::Short => join((0..shown).filter_map(|i| r.u16(i * 2).ok())),
        FieldType::SShort => join((0..shown).filter_map(|i| r.i16(i * 2).ok())),
        FieldType::Long => join((0..shown).filter_map(|i| r.u32(i * 4).ok())),
        FieldType::SLong => join((0..shown).filter_map(|i| r.i32(i * 4).ok())),
        FieldType::Rational => join((0..shown).filter_map(|i| r.rational(i * 8).ok())),
        FieldType::SRational => join((0..shown).filter_map(|i| r.srational(i * 8).ok())),
        FieldType::Float => join((0..shown).filter_map(|i| r.f32(i * 4).ok())),
        FieldType::Double => join((0..shown).filter_map(|i| r.f64(i * 8).ok())),
    };

    let mut text = text;
    if count == 1 {
        let first = match field_type {
            FieldType::Short => r.u16(0).ok().map(u32::from),
            FieldType::Long => r.u32(0).ok(),
            _ => None,
        };
        if let Some(meaning) = first.and_then(|v| describe_enum(entry.tag, v)) {
            text = format!("{} ({})", text, meaning);
        }
    }
    if count > MAX_SHOWN_VALUES {
        text.push_str(&format!(", ... ({} values)", count));
    }
    text
}

fn join<T: Display>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_printable(bytes: &[u8]) -> bool {
    let trimmed = trim_nul(bytes);
    !trimmed.is_empty()
        && trimmed.len() <= 64
        && trimmed.iter().all(|&b| (0x20..0x7F).contains(&b))
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn quote(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(trim_nul(bytes));
    if text.chars().count() > MAX_SHOWN_CHARS {
        let cut: String = text.chars().take(MAX_SHOWN_CHARS).collect();
        format!("\"{}...\"", cut)
    } else {
        format!("\"{}\"", text)
    }
}
