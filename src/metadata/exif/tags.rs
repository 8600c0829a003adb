//! TIFF field types and EXIF tag vocabulary.
//!
//! Tag numbers live in separate namespaces: GPS and Interoperability IFDs
//! reuse small numbers that mean something else in IFD0, so every lookup is
//! qualified by the [`IfdKind`] the entry was found in.

// =============================================================================
// Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// The unit size decides whether a value is stored in the 4-byte
/// value/offset field of its entry or elsewhere in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,
    /// NUL-terminated 7-bit ASCII
    Ascii = 2,
    /// Unsigned 16-bit integer
    Short = 3,
    /// Unsigned 32-bit integer
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    /// Signed 8-bit integer
    SByte = 6,
    /// Opaque bytes
    Undefined = 7,
    /// Signed 16-bit integer
    SShort = 8,
    /// Signed 32-bit integer
    SLong = 9,
    /// Two SLONGs
    SRational = 10,
    /// IEEE single precision
    Float = 11,
    /// IEEE double precision
    Double = 12,
}

impl FieldType {
    /// Bytes available inline in a classic TIFF entry.
    pub const INLINE_THRESHOLD: usize = 4;

    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float => 4,
            FieldType::Rational | FieldType::SRational | FieldType::Double => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Byte => "BYTE",
            FieldType::Ascii => "ASCII",
            FieldType::Short => "SHORT",
            FieldType::Long => "LONG",
            FieldType::Rational => "RATIONAL",
            FieldType::SByte => "SBYTE",
            FieldType::Undefined => "UNDEFINED",
            FieldType::SShort => "SSHORT",
            FieldType::SLong => "SLONG",
            FieldType::SRational => "SRATIONAL",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
        }
    }

    /// Total byte size of `count` values, or `None` on overflow.
    #[inline]
    pub fn total_size(self, count: u32) -> Option<u64> {
        (self.size_in_bytes() as u64).checked_mul(count as u64)
    }

    /// Whether `count` values fit in the entry's value/offset field.
    #[inline]
    pub fn fits_inline(self, count: u32) -> bool {
        self.total_size(count)
            .map_or(false, |size| size <= Self::INLINE_THRESHOLD as u64)
    }
}

// =============================================================================
// IFD kinds
// =============================================================================

/// Which directory an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfdKind {
    /// First IFD: main image
    Ifd0,
    /// Second IFD: thumbnail
    Ifd1,
    /// Later IFDs in the main chain
    Chained(u16),
    Exif,
    Gps,
    Interop,
}

impl IfdKind {
    pub fn label(self) -> String {
        match self {
            IfdKind::Ifd0 => "IFD0".to_string(),
            IfdKind::Ifd1 => "IFD1 (thumbnail)".to_string(),
            IfdKind::Chained(n) => format!("IFD{}", n),
            IfdKind::Exif => "Exif IFD".to_string(),
            IfdKind::Gps => "GPS IFD".to_string(),
            IfdKind::Interop => "Interoperability IFD".to_string(),
        }
    }

    /// Kind of the IFD at position `index` of the main chain.
    pub fn in_chain(index: u16) -> Self {
        match index {
            0 => IfdKind::Ifd0,
            1 => IfdKind::Ifd1,
            n => IfdKind::Chained(n),
        }
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Pointer to the Exif sub-IFD
pub const TAG_EXIF_IFD: u16 = 0x8769;
/// Pointer to the GPS sub-IFD
pub const TAG_GPS_IFD: u16 = 0x8825;
/// Pointer to the Interoperability sub-IFD
pub const TAG_INTEROP_IFD: u16 = 0xA005;
/// Thumbnail compression (6 = JPEG)
pub const TAG_COMPRESSION: u16 = 0x0103;
/// Offset of the JPEG thumbnail
pub const TAG_JPEG_INTERCHANGE_FORMAT: u16 = 0x0201;
/// Length of the JPEG thumbnail
pub const TAG_JPEG_INTERCHANGE_FORMAT_LENGTH: u16 = 0x0202;
/// Embedded XMP packet
pub const TAG_XML_PACKET: u16 = 0x02BC;
/// Embedded IPTC-IIM datasets
pub const TAG_IPTC_NAA: u16 = 0x83BB;
/// Embedded Photoshop image resources
pub const TAG_PHOTOSHOP: u16 = 0x8649;
/// Embedded ICC profile
pub const TAG_ICC_PROFILE: u16 = 0x8773;

/// Sub-IFD opened by a pointer tag in an IFD of kind `kind`.
pub fn sub_ifd_kind(kind: IfdKind, tag: u16) -> Option<IfdKind> {
    match (kind, tag) {
        (IfdKind::Gps | IfdKind::Interop, _) => None,
        (_, TAG_EXIF_IFD) => Some(IfdKind::Exif),
        (_, TAG_GPS_IFD) => Some(IfdKind::Gps),
        (IfdKind::Exif, TAG_INTEROP_IFD) => Some(IfdKind::Interop),
        _ => None,
    }
}

/// Human-readable name of `tag` in an IFD of kind `kind`.
pub fn tag_name(kind: IfdKind, tag: u16) -> Option<&'static str> {
    match kind {
        IfdKind::Gps => gps_tag_name(tag),
        IfdKind::Interop => match tag {
            0x0001 => Some("InteroperabilityIndex"),
            0x0002 => Some("InteroperabilityVersion"),
            0x1000 => Some("RelatedImageFileFormat"),
            0x1001 => Some("RelatedImageWidth"),
            0x1002 => Some("RelatedImageLength"),
            _ => None,
        },
        _ => image_tag_name(tag),
    }
}

fn image_tag_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        // Image structure
        0x00FE => "NewSubfileType",
        0x0100 => "ImageWidth",
        0x0101 => "ImageLength",
        0x0102 => "BitsPerSample",
        0x0103 => "Compression",
        0x0106 => "PhotometricInterpretation",
        0x010E => "ImageDescription",
        0x010F => "Make",
        0x0110 => "Model",
        0x0111 => "StripOffsets",
        0x0112 => "Orientation",
        0x0115 => "SamplesPerPixel",
        0x0116 => "RowsPerStrip",
        0x0117 => "StripByteCounts",
        0x011A => "XResolution",
        0x011B => "YResolution",
        0x011C => "PlanarConfiguration",
        0x0128 => "ResolutionUnit",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x013B => "Artist",
        0x013E => "WhitePoint",
        0x013F => "PrimaryChromaticities",
        0x0142 => "TileWidth",
        0x0143 => "TileLength",
        0x0144 => "TileOffsets",
        0x0145 => "TileByteCounts",
        0x014A => "SubIFDs",
        0x015B => "JPEGTables",
        0x0201 => "JPEGInterchangeFormat",
        0x0202 => "JPEGInterchangeFormatLength",
        0x0211 => "YCbCrCoefficients",
        0x0212 => "YCbCrSubSampling",
        0x0213 => "YCbCrPositioning",
        0x0214 => "ReferenceBlackWhite",
        0x02BC => "XMLPacket",
        0x4746 => "Rating",
        0x8298 => "Copyright",
        0x83BB => "IPTC-NAA",
        0x8649 => "PhotoshopImageResources",
        0x8769 => "ExifIFDPointer",
        0x8773 => "ICCProfile",
        0x8825 => "GPSInfoIFDPointer",
        // Exif IFD
        0x829A => "ExposureTime",
        0x829D => "FNumber",
        0x8822 => "ExposureProgram",
        0x8824 => "SpectralSensitivity",
        0x8827 => "PhotographicSensitivity",
        0x8830 => "SensitivityType",
        0x9000 => "ExifVersion",
        0x9003 => "DateTimeOriginal",
        0x9004 => "DateTimeDigitized",
        0x9010 => "OffsetTime",
        0x9011 => "OffsetTimeOriginal",
        0x9012 => "OffsetTimeDigitized",
        0x9101 => "ComponentsConfiguration",
        0x9102 => "CompressedBitsPerPixel",
        0x9201 => "ShutterSpeedValue",
        0x9202 => "ApertureValue",
        0x9203 => "BrightnessValue",
        0x9204 => "ExposureBiasValue",
        0x9205 => "MaxApertureValue",
        0x9206 => "SubjectDistance",
        0x9207 => "MeteringMode",
        0x9208 => "LightSource",
        0x9209 => "Flash",
        0x920A => "FocalLength",
        0x9214 => "SubjectArea",
        0x927C => "MakerNote",
        0x9286 => "UserComment",
        0x9290 => "SubSecTime",
        0x9291 => "SubSecTimeOriginal",
        0x9292 => "SubSecTimeDigitized",
        0xA000 => "FlashpixVersion",
        0xA001 => "ColorSpace",
        0xA002 => "PixelXDimension",
        0xA003 => "PixelYDimension",
        0xA004 => "RelatedSoundFile",
        0xA005 => "InteroperabilityIFDPointer",
        0xA20E => "FocalPlaneXResolution",
        0xA20F => "FocalPlaneYResolution",
        0xA210 => "FocalPlaneResolutionUnit",
        0xA215 => "ExposureIndex",
        0xA217 => "SensingMethod",
        0xA300 => "FileSource",
        0xA301 => "SceneType",
        0xA302 => "CFAPattern",
        0xA401 => "CustomRendered",
        0xA402 => "ExposureMode",
        0xA403 => "WhiteBalance",
        0xA404 => "DigitalZoomRatio",
        0xA405 => "FocalLengthIn35mmFilm",
        0xA406 => "SceneCaptureType",
        0xA407 => "GainControl",
        0xA408 => "Contrast",
        0xA409 => "Saturation",
        0xA40A => "Sharpness",
        0xA40C => "SubjectDistanceRange",
        0xA420 => "ImageUniqueID",
        0xA430 => "CameraOwnerName",
        0xA431 => "BodySerialNumber",
        0xA432 => "LensSpecification",
        0xA433 => "LensMake",
        0xA434 => "LensModel",
        0xA435 => "LensSerialNumber",
        0xEA1C => "Padding",
        _ => return None,
    })
}

fn gps_tag_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        0x0000 => "GPSVersionID",
        0x0001 => "GPSLatitudeRef",
        0x0002 => "GPSLatitude",
        0x0003 => "GPSLongitudeRef",
        0x0004 => "GPSLongitude",
        0x0005 => "GPSAltitudeRef",
        0x0006 => "GPSAltitude",
        0x0007 => "GPSTimeStamp",
        0x0008 => "GPSSatellites",
        0x0009 => "GPSStatus",
        0x000A => "GPSMeasureMode",
        0x000B => "GPSDOP",
        0x000C => "GPSSpeedRef",
        0x000D => "GPSSpeed",
        0x000E => "GPSTrackRef",
        0x000F => "GPSTrack",
        0x0010 => "GPSImgDirectionRef",
        0x0011 => "GPSImgDirection",
        0x0012 => "GPSMapDatum",
        0x0013 => "GPSDestLatitudeRef",
        0x0014 => "GPSDestLatitude",
        0x0015 => "GPSDestLongitudeRef",
        0x0016 => "GPSDestLongitude",
        0x0017 => "GPSDestBearingRef",
        0x0018 => "GPSDestBearing",
        0x0019 => "GPSDestDistanceRef",
        0x001A => "GPSDestDistance",
        0x001B => "GPSProcessingMethod",
        0x001C => "GPSAreaInformation",
        0x001D => "GPSDateStamp",
        0x001E => "GPSDifferential",
        0x001F => "GPSHPositioningError",
        _ => return None,
    })
}

/// Meaning of well-known enumerated values.
pub fn describe_enum(tag: u16, value: u32) -> Option<&'static str> {
    Some(match (tag, value) {
        (0x0103, 1) => "uncompressed",
        (0x0103, 5) => "LZW",
        (0x0103, 6) => "JPEG (old-style)",
        (0x0103, 7) => "JPEG",
        (0x0103, 8) => "Deflate",
        (0x0112, 1) => "top-left",
        (0x0112, 2) => "top-right",
        (0x0112, 3) => "bottom-right",
        (0x0112, 4) => "bottom-left",
        (0x0112, 5) => "left-top",
        (0x0112, 6) => "right-top",
        (0x0112, 7) => "right-bottom",
        (0x0112, 8) => "left-bottom",
        (0x0128 | 0xA210, 1) => "none",
        (0x0128 | 0xA210, 2) => "inch",
        (0x0128 | 0xA210, 3) => "centimetre",
        (0x0213, 1) => "centered",
        (0x0213, 2) => "co-sited",
        (0xA001, 1) => "sRGB",
        (0xA001, 0xFFFF) => "uncalibrated",
        (0x8822, 1) => "manual",
        (0x8822, 2) => "program AE",
        (0x8822, 3) => "aperture priority",
        (0x8822, 4) => "shutter priority",
        (0x9207, 2) => "center-weighted average",
        (0x9207, 3) => "spot",
        (0x9207, 5) => "pattern",
        _ => return None,
    })
}
