//! Endian-aware field access.
//!
//! TIFF/EXIF declares its byte order in its header, PNG/JPEG/ICC/Photoshop are
//! big-endian, and GIF/BMP/ICO/RIFF are little-endian. Every walker reads its
//! fixed headers through these accessors instead of overlaying structs on raw
//! memory, so nothing here mutates the source buffer or assumes the host's
//! byte order.

use std::fmt;

use crate::error::ScanError;

// =============================================================================
// Raw Helpers
// =============================================================================
//
// These panic on short input and are meant for slices whose length was
// already checked. Untrusted offsets go through FieldReader instead.

/// First `N` bytes of `bytes` as an array.
#[inline]
fn head<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

macro_rules! raw_readers {
    ($($le:ident, $be:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Little-endian `", stringify!($ty), "` at the start of `bytes`.")]
            #[inline]
            pub fn $le(bytes: &[u8]) -> $ty {
                <$ty>::from_le_bytes(head(bytes))
            }

            #[doc = concat!("Big-endian `", stringify!($ty), "` at the start of `bytes`.")]
            #[inline]
            pub fn $be(bytes: &[u8]) -> $ty {
                <$ty>::from_be_bytes(head(bytes))
            }
        )*
    };
}

raw_readers! {
    read_u16_le, read_u16_be => u16;
    read_u32_le, read_u32_be => u32;
    read_u64_le, read_u64_be => u64;
}

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order of a multi-byte field, as declared by `II` or `MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Order named by a TIFF header's first two bytes.
    pub fn from_marker(marker: &[u8]) -> Option<Self> {
        match marker.get(..2)? {
            b"II" => Some(ByteOrder::LittleEndian),
            b"MM" => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = head(bytes);
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = head(bytes);
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let raw = head(bytes);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }

    /// Short name used in labels.
    pub const fn name(self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "little-endian",
            ByteOrder::BigEndian => "big-endian",
        }
    }
}

// =============================================================================
// Rationals
// =============================================================================

/// Unsigned TIFF RATIONAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    pub fn to_f64(self) -> Option<f64> {
        (self.denominator != 0).then(|| self.numerator as f64 / self.denominator as f64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Signed TIFF SRATIONAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SRational {
    pub numerator: i32,
    pub denominator: i32,
}

impl fmt::Display for SRational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

// =============================================================================
// FieldReader
// =============================================================================

/// Bounds-checked field accessor over an immutable block of bytes.
///
/// All offsets are relative to the start of `data`. Reads past the end fail
/// with [`ScanError::FieldOutOfBounds`].
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, order }
    }

    pub fn big_endian(data: &'a [u8]) -> Self {
        Self::new(data, ByteOrder::BigEndian)
    }

    pub fn little_endian(data: &'a [u8]) -> Self {
        Self::new(data, ByteOrder::LittleEndian)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Borrow `len` bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], ScanError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .map(|end| &self.data[offset..end])
            .ok_or(ScanError::FieldOutOfBounds {
                offset,
                width: len,
                len: self.data.len(),
            })
    }

    pub fn u8(&self, offset: usize) -> Result<u8, ScanError> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub fn i8(&self, offset: usize) -> Result<i8, ScanError> {
        Ok(self.u8(offset)? as i8)
    }

    pub fn u16(&self, offset: usize) -> Result<u16, ScanError> {
        Ok(self.order.read_u16(self.bytes(offset, 2)?))
    }

    pub fn i16(&self, offset: usize) -> Result<i16, ScanError> {
        Ok(self.u16(offset)? as i16)
    }

    /// 24-bit unsigned integer (RIFF/WebP canvas sizes).
    pub fn u24(&self, offset: usize) -> Result<u32, ScanError> {
        let b = self.bytes(offset, 3)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes([b[0], b[1], b[2], 0]),
            ByteOrder::BigEndian => u32::from_be_bytes([0, b[0], b[1], b[2]]),
        })
    }

    pub fn u32(&self, offset: usize) -> Result<u32, ScanError> {
        Ok(self.order.read_u32(self.bytes(offset, 4)?))
    }

    pub fn i32(&self, offset: usize) -> Result<i32, ScanError> {
        Ok(self.u32(offset)? as i32)
    }

    pub fn u64(&self, offset: usize) -> Result<u64, ScanError> {
        Ok(self.order.read_u64(self.bytes(offset, 8)?))
    }

    pub fn f32(&self, offset: usize) -> Result<f32, ScanError> {
        Ok(f32::from_bits(self.u32(offset)?))
    }

    pub fn f64(&self, offset: usize) -> Result<f64, ScanError> {
        Ok(f64::from_bits(self.u64(offset)?))
    }

    pub fn rational(&self, offset: usize) -> Result<Rational, ScanError> {
        Ok(Rational {
            numerator: self.u32(offset)?,
            denominator: self.u32(offset + 4)?,
        })
    }

    pub fn srational(&self, offset: usize) -> Result<SRational, ScanError> {
        Ok(SRational {
            numerator: self.i32(offset)?,
            denominator: self.i32(offset + 4)?,
        })
    }

    /// ICC `s15Fixed16Number`.
    pub fn s15_fixed16(&self, offset: usize) -> Result<f64, ScanError> {
        Ok(self.i32(offset)? as f64 / 65536.0)
    }

    /// Photoshop / ICC `u16Fixed16Number`.
    pub fn u16_fixed16(&self, offset: usize) -> Result<f64, ScanError> {
        Ok(self.u32(offset)? as f64 / 65536.0)
    }

    /// Four raw bytes, e.g. a FourCC or ICC signature.
    pub fn fourcc(&self, offset: usize) -> Result<[u8; 4], ScanError> {
        let b = self.bytes(offset, 4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }
}

/// Render a FourCC for labels, escaping non-printable bytes.
pub fn fourcc_str(code: &[u8]) -> String {
    code.iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                (b as char).to_string()
            } else {
                format!("\\x{:02X}", b)
            }
        })
        .collect()
}
