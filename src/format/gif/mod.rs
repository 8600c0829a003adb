//! GIF block walker.
//!
//! # Stream Layout
//!
//! ```text
//! "GIF87a" | "GIF89a"
//! Logical screen descriptor (7 bytes), optional global color table
//! { 0x21 label sub-blocks...      extension
//! | 0x2C descriptor [LCT] LZW     image }
//! 0x3B                            trailer
//! ```
//!
//! Every element becomes a top-level region. The first image is decoded into
//! a palette thumbnail; later frames are only delimited.

pub mod lzw;

use tracing::debug;

use crate::error::ScanError;
use crate::io::FieldReader;
use crate::region::{RegionId, StyleFlags, ThumbnailImage};
use crate::scan::thumbnail::shrink_indexed;
use crate::scan::ScanContext;

const FORMAT: &str = "GIF";

pub const SIGNATURE_SIZE: u64 = 6;
pub const SCREEN_DESCRIPTOR_SIZE: usize = 7;
pub const IMAGE_DESCRIPTOR_SIZE: usize = 10;

pub const EXTENSION_INTRODUCER: u8 = 0x21;
pub const IMAGE_SEPARATOR: u8 = 0x2C;
pub const TRAILER: u8 = 0x3B;

pub const LABEL_PLAIN_TEXT: u8 = 0x01;
pub const LABEL_GRAPHIC_CONTROL: u8 = 0xF9;
pub const LABEL_COMMENT: u8 = 0xFE;
pub const LABEL_APPLICATION: u8 = 0xFF;

/// Disposal method that clears the frame area to the background
pub const DISPOSE_TO_BACKGROUND: u8 = 2;

// =============================================================================
// Descriptors
// =============================================================================

/// The 7-byte logical screen descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalScreenDescriptor {
    pub width: u16,
    pub height: u16,
    pub packed: u8,
    pub background_index: u8,
    pub aspect_ratio: u8,
}

impl LogicalScreenDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::little_endian(bytes);
        Ok(Self {
            width: r.u16(0)?,
            height: r.u16(2)?,
            packed: r.u8(4)?,
            background_index: r.u8(5)?,
            aspect_ratio: r.u8(6)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; SCREEN_DESCRIPTOR_SIZE] {
        let w = self.width.to_le_bytes();
        let h = self.height.to_le_bytes();
        [w[0], w[1], h[0], h[1], self.packed, self.background_index, self.aspect_ratio]
    }

    pub fn has_global_table(&self) -> bool {
        self.packed & 0x80 != 0
    }

    pub fn color_resolution(&self) -> u8 {
        ((self.packed >> 4) & 0x07) + 1
    }

    /// Number of entries in the global color table.
    pub fn global_table_len(&self) -> usize {
        if self.has_global_table() {
            2 << (self.packed & 0x07)
        } else {
            0
        }
    }
}

/// The 10-byte image descriptor, separator included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    pub packed: u8,
}

impl ImageDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::little_endian(bytes);
        Ok(Self {
            left: r.u16(1)?,
            top: r.u16(3)?,
            width: r.u16(5)?,
            height: r.u16(7)?,
            packed: r.u8(9)?,
        })
    }

    pub fn has_local_table(&self) -> bool {
        self.packed & 0x80 != 0
    }

    pub fn is_interlaced(&self) -> bool {
        self.packed & 0x40 != 0
    }

    pub fn local_table_len(&self) -> usize {
        if self.has_local_table() {
            2 << (self.packed & 0x07)
        } else {
            0
        }
    }
}

/// Graphic control extension fields that affect the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicControl {
    pub disposal: u8,
    /// Hundredths of a second
    pub delay: u16,
    pub transparent_index: Option<u8>,
}

impl GraphicControl {
    /// Parse the 4-byte data block of a graphic control extension.
    pub fn parse(block: &[u8]) -> Result<Self, ScanError> {
        let r = FieldReader::little_endian(block);
        let packed = r.u8(0)?;
        let index = r.u8(3)?;
        Ok(Self {
            disposal: (packed >> 2) & 0x07,
            delay: r.u16(1)?,
            transparent_index: (packed & 0x01 != 0).then_some(index),
        })
    }
}

fn disposal_name(disposal: u8) -> &'static str {
    match disposal {
        0 => "unspecified",
        1 => "keep",
        2 => "restore to background",
        3 => "restore to previous",
        _ => "reserved",
    }
}

fn read_palette(bytes: &[u8]) -> Vec<[u8; 4]> {
    bytes
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2], 0xFF])
        .collect()
}

fn grayscale_palette() -> Vec<[u8; 4]> {
    (0..=255u8).map(|v| [v, v, v, 0xFF]).collect()
}

// =============================================================================
// Walker
// =============================================================================

struct GifWalk {
    global_palette: Option<Vec<[u8; 4]>>,
    pending_control: Option<GraphicControl>,
    frames: u32,
}

pub(crate) fn walk(ctx: &mut ScanContext<'_>) -> Result<(), ScanError> {
    let size = ctx.size();
    if size < SIGNATURE_SIZE {
        return Err(ScanError::not_this_format(FORMAT, "stream shorter than signature"));
    }
    let signature = ctx.read_exact_at(0, SIGNATURE_SIZE as usize)?;
    if &signature[..] != b"GIF87a" && &signature[..] != b"GIF89a" {
        return Err(ScanError::not_this_format(FORMAT, "missing GIF87a/GIF89a signature"));
    }
    ctx.emit(
        StyleFlags::HEADER,
        0,
        SIGNATURE_SIZE,
        format!("Header: {}", String::from_utf8_lossy(&signature)),
        None,
    );

    let lsd_bytes = ctx.read_exact(SCREEN_DESCRIPTOR_SIZE)?;
    let lsd = LogicalScreenDescriptor::parse(&lsd_bytes)?;
    emit_screen_descriptor(ctx, &lsd);

    let mut state = GifWalk {
        global_palette: None,
        pending_control: None,
        frames: 0,
    };
    if lsd.has_global_table() {
        let at = ctx.position();
        let table = ctx.read_exact(lsd.global_table_len() * 3)?;
        ctx.emit(
            StyleFlags::NONE,
            at,
            table.len() as u64,
            format!("Global color table ({} colors)", lsd.global_table_len()),
            None,
        );
        state.global_palette = Some(read_palette(&table));
    }

    loop {
        ctx.out().check_cancelled()?;
        let at = ctx.position();
        if at >= size {
            debug!(id = ctx.identifier(), "GIF ended without trailer");
            break;
        }
        match ctx.read_u8()? {
            EXTENSION_INTRODUCER => walk_extension(ctx, &mut state, at)?,
            IMAGE_SEPARATOR => walk_image(ctx, &mut state, at)?,
            TRAILER => {
                ctx.emit(StyleFlags::NONE, at, 1, "Trailer", None);
                break;
            }
            other => {
                return Err(ScanError::malformed(
                    FORMAT,
                    format!("unknown block introducer 0x{:02X} at {}", other, at),
                ));
            }
        }
    }
    Ok(())
}

fn emit_screen_descriptor(ctx: &mut ScanContext<'_>, lsd: &LogicalScreenDescriptor) {
    let at = SIGNATURE_SIZE;
    let table = if lsd.has_global_table() {
        format!("global color table of {} colors", lsd.global_table_len())
    } else {
        "no global color table".to_string()
    };
    let id = ctx.emit(
        StyleFlags::HEADER,
        at,
        SCREEN_DESCRIPTOR_SIZE as u64,
        format!("Logical screen descriptor: {}x{}, {}", lsd.width, lsd.height, table),
        None,
    );
    ctx.emit(StyleFlags::NONE, at, 2, format!("Width: {}", lsd.width), Some(id));
    ctx.emit(StyleFlags::NONE, at + 2, 2, format!("Height: {}", lsd.height), Some(id));
    ctx.emit(
        StyleFlags::NONE,
        at + 4,
        1,
        format!(
            "Flags: 0x{:02X}, color resolution {} bits{}",
            lsd.packed,
            lsd.color_resolution(),
            if lsd.packed & 0x08 != 0 { ", sorted" } else { "" }
        ),
        Some(id),
    );
    ctx.emit(
        StyleFlags::NONE,
        at + 5,
        1,
        format!("Background color index: {}", lsd.background_index),
        Some(id),
    );
    ctx.emit(
        StyleFlags::NONE,
        at + 6,
        1,
        format!("Pixel aspect ratio: {}", lsd.aspect_ratio),
        Some(id),
    );
}

/// Skip a sub-block chain starting at the cursor; returns its data bytes
/// when `keep` is set. The cursor ends past the terminator.
fn read_sub_blocks(ctx: &mut ScanContext<'_>, keep: bool) -> Result<Vec<u8>, ScanError> {
    let size = ctx.size();
    let mut data = Vec::new();
    loop {
        let len = ctx.read_u8()? as u64;
        if len == 0 {
            return Ok(data);
        }
        let at = ctx.position();
        if at + len > size {
            return Err(ScanError::Truncated {
                offset: ctx.absolute(at),
                requested: len,
                size: ctx.absolute(size),
            });
        }
        if keep {
            data.extend_from_slice(&ctx.read_exact(len as usize)?);
        } else {
            ctx.skip(len)?;
        }
    }
}

fn walk_extension(
    ctx: &mut ScanContext<'_>,
    state: &mut GifWalk,
    at: u64,
) -> Result<(), ScanError> {
    let label = ctx.read_u8()?;
    let keep = matches!(
        label,
        LABEL_GRAPHIC_CONTROL | LABEL_COMMENT | LABEL_APPLICATION | LABEL_PLAIN_TEXT
    );
    let data = read_sub_blocks(ctx, keep)?;
    let len = ctx.position() - at;

    let text = match label {
        LABEL_GRAPHIC_CONTROL => match GraphicControl::parse(&data) {
            Ok(control) => {
                state.pending_control = Some(control);
                format!(
                    "Graphic control extension: delay {} ms, disposal {}{}",
                    control.delay as u32 * 10,
                    disposal_name(control.disposal),
                    control
                        .transparent_index
                        .map(|i| format!(", transparent index {}", i))
                        .unwrap_or_default()
                )
            }
            Err(_) => "Graphic control extension (short)".to_string(),
        },
        LABEL_COMMENT => {
            let text = String::from_utf8_lossy(&data);
            let cut: String = text.chars().take(60).collect();
            format!("Comment extension: \"{}\"", cut)
        }
        LABEL_APPLICATION => {
            let id = String::from_utf8_lossy(&data[..data.len().min(11)]).into_owned();
            let is_loop = (id == "NETSCAPE2.0" || id == "ANIMEXTS1.0")
                && data.len() >= 14
                && data[11] == 1;
            if is_loop {
                let loops = u16::from_le_bytes([data[12], data[13]]);
                format!(
                    "Application extension: {}, loop count {}",
                    id,
                    if loops == 0 { "infinite".to_string() } else { loops.to_string() }
                )
            } else {
                format!("Application extension: {} ({} bytes)", id, data.len())
            }
        }
        LABEL_PLAIN_TEXT => format!("Plain text extension ({} bytes)", data.len()),
        other => format!("Extension 0x{:02X} ({} bytes)", other, len),
    };
    ctx.emit(StyleFlags::NONE, at, len, text, None);
    Ok(())
}

fn walk_image(ctx: &mut ScanContext<'_>, state: &mut GifWalk, at: u64) -> Result<(), ScanError> {
    let descriptor_bytes = ctx.read_exact_at(at, IMAGE_DESCRIPTOR_SIZE)?;
    let descriptor = ImageDescriptor::parse(&descriptor_bytes)?;
    ctx.emit(
        StyleFlags::NONE,
        at,
        IMAGE_DESCRIPTOR_SIZE as u64,
        format!(
            "Image descriptor: {}x{} at ({}, {}){}{}",
            descriptor.width,
            descriptor.height,
            descriptor.left,
            descriptor.top,
            if descriptor.is_interlaced() { ", interlaced" } else { "" },
            if descriptor.has_local_table() { ", local color table" } else { "" }
        ),
        None,
    );

    let mut local_palette = None;
    if descriptor.has_local_table() {
        let table_at = ctx.position();
        let table = ctx.read_exact(descriptor.local_table_len() * 3)?;
        ctx.emit(
            StyleFlags::NONE,
            table_at,
            table.len() as u64,
            format!("Local color table ({} colors)", descriptor.local_table_len()),
            None,
        );
        local_palette = Some(read_palette(&table));
    }

    let data_at = ctx.position();
    let min_code_size = ctx.read_u8()?;
    let first_frame = state.frames == 0;
    let decode = first_frame && ctx.options().thumbnails;
    let blocks_at = ctx.position();
    read_sub_blocks(ctx, false)?;
    let data_end = ctx.position();
    state.frames += 1;
    let control = state.pending_control.take();

    let mut flags = StyleFlags::NONE;
    let mut thumbnail = None;
    if decode {
        let chain = ctx.read_exact_at(blocks_at, (data_end - blocks_at) as usize)?;
        ctx.seek_to(data_end)?;
        let palette = match local_palette.as_mut() {
            Some(palette) => Some(palette),
            None => state.global_palette.as_mut(),
        };
        match decode_frame(
            &descriptor,
            min_code_size,
            &chain,
            palette,
            control,
            ctx.options().thumbnail_max_bytes,
        ) {
            Ok(Some(image)) => {
                thumbnail = Some(shrink_indexed(image, ctx.options().thumbnail_max_dim));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "GIF frame did not decode");
                flags |= StyleFlags::ERROR;
            }
        }
    }

    let frame_id = ctx.emit(
        flags,
        data_at,
        data_end - data_at,
        format!(
            "Image frame {}: LZW data, minimum code size {} ({} bytes)",
            state.frames,
            min_code_size,
            data_end - data_at
        ),
        None,
    );
    emit_frame_fields(ctx, frame_id, data_at, data_end, min_code_size);
    if let Some(image) = thumbnail {
        ctx.attach_thumbnail(frame_id, image);
    }
    Ok(())
}

fn emit_frame_fields(
    ctx: &mut ScanContext<'_>,
    frame_id: RegionId,
    data_at: u64,
    data_end: u64,
    min_code_size: u8,
) {
    ctx.emit(
        StyleFlags::NONE,
        data_at,
        1,
        format!("LZW minimum code size: {}", min_code_size),
        Some(frame_id),
    );
    ctx.emit(
        StyleFlags::NONE,
        data_at + 1,
        data_end - data_at - 1,
        "Image data sub-blocks",
        Some(frame_id),
    );
}

/// Decode one frame into an indexed image. Returns `None` when the frame is
/// too large to decode under the thumbnail byte limit.
fn decode_frame(
    descriptor: &ImageDescriptor,
    min_code_size: u8,
    chain: &[u8],
    palette: Option<&mut Vec<[u8; 4]>>,
    control: Option<GraphicControl>,
    max_bytes: u64,
) -> Result<Option<ThumbnailImage>, ScanError> {
    let width = descriptor.width as usize;
    let height = descriptor.height as usize;
    let pixels = width * height;
    if pixels == 0 || pixels as u64 > max_bytes {
        debug!(width, height, "Skipping GIF frame thumbnail");
        return Ok(None);
    }

    let out = lzw::decode_sub_blocks(min_code_size, chain, pixels)?;
    if out.overflowed {
        debug!("GIF frame has more data than pixels");
    }
    let mut indices = out.indices;
    indices.resize(pixels, 0);
    if descriptor.is_interlaced() {
        indices = lzw::deinterlace(&indices, width, height);
    }

    let mut fallback = grayscale_palette();
    let palette = palette.unwrap_or(&mut fallback);
    let transparent = control
        .filter(|c| c.disposal == DISPOSE_TO_BACKGROUND)
        .and_then(|c| c.transparent_index)
        .map(usize::from)
        .filter(|&i| i < palette.len());

    let saved = transparent.map(|i| palette[i][3]);
    if let Some(i) = transparent {
        palette[i][3] = 0;
    }
    let image = ThumbnailImage::indexed(width as u32, height as u32, indices, palette.clone());
    if let (Some(i), Some(alpha)) = (transparent, saved) {
        palette[i][3] = alpha;
    }
    Ok(Some(image))
}
