mod block_cache;
pub mod endian;
mod source;

pub use block_cache::{FileSource, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BLOCKS};
pub use endian::{
    fourcc_str, read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    ByteOrder, FieldReader, Rational, SRational,
};
pub use source::{ByteSource, Direction, MemorySource, Origin, SubSource};
