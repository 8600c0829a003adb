//! GIF variable-width LZW decoder.
//!
//! Codes are packed LSB-first into a chain of sub-blocks (`u8 length`,
//! `length` bytes), ended by a zero-length block. With a minimum code size
//! `m`, code `2^m` clears the table and `2^m + 1` stops the stream; codes
//! start `m + 1` bits wide and grow by one bit each time the next free slot
//! reaches `2^width`, up to 12 bits.

use crate::error::LzwError;

/// Largest code width in bits
pub const MAX_CODE_WIDTH: u8 = 12;

/// Number of table slots addressable with 12-bit codes
pub const TABLE_SIZE: usize = 1 << MAX_CODE_WIDTH;

/// Result of decoding one image's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LzwOutput {
    /// Decoded color indices, at most the requested pixel count
    pub indices: Vec<u8>,
    /// Bytes of sub-block data consumed, terminator included
    pub consumed: usize,
    /// True when the stream produced more indices than requested
    pub overflowed: bool,
}

/// Reads bytes out of a sub-block chain.
struct SubBlocks<'a> {
    data: &'a [u8],
    pos: usize,
    block_left: usize,
}

impl<'a> SubBlocks<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            block_left: 0,
        }
    }

    /// Next data byte, or `None` at the terminator or end of input.
    fn next_byte(&mut self) -> Option<u8> {
        if self.block_left == 0 {
            let len = *self.data.get(self.pos)? as usize;
            if len == 0 {
                return None;
            }
            self.pos += 1;
            self.block_left = len;
        }
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        self.block_left -= 1;
        Some(byte)
    }

    /// After the stop code: drop the rest of the current block and expect
    /// the zero-length terminator. Returns the offset past it.
    fn finish(&mut self) -> Result<usize, LzwError> {
        self.pos += self.block_left;
        self.block_left = 0;
        match self.data.get(self.pos) {
            Some(0) => Ok(self.pos + 1),
            _ => Err(LzwError::MissingTerminator),
        }
    }
}

/// LSB-first code reader.
struct CodeReader<'a> {
    blocks: SubBlocks<'a>,
    bits: u32,
    nbits: u8,
}

impl<'a> CodeReader<'a> {
    fn read(&mut self, width: u8) -> Result<u16, LzwError> {
        while self.nbits < width {
            let byte = self.blocks.next_byte().ok_or(LzwError::UnexpectedEnd)?;
            self.bits |= (byte as u32) << self.nbits;
            self.nbits += 8;
        }
        let code = (self.bits & ((1 << width) - 1)) as u16;
        self.bits >>= width;
        self.nbits -= width;
        Ok(code)
    }
}

/// Decode the sub-block chain in `data` (starting at the first length byte,
/// after the minimum code size byte).
pub fn decode_sub_blocks(
    min_code_size: u8,
    data: &[u8],
    pixel_count: usize,
) -> Result<LzwOutput, LzwError> {
    if !(1..MAX_CODE_WIDTH).contains(&min_code_size) {
        return Err(LzwError::InvalidCodeSize(min_code_size));
    }

    let clear = 1u16 << min_code_size;
    let stop = clear + 1;
    let mut width = min_code_size + 1;
    let mut next = stop + 1;
    let mut prev: Option<u16> = None;

    let mut prefix = vec![0u16; TABLE_SIZE];
    let mut suffix = vec![0u8; TABLE_SIZE];
    for code in 0..clear {
        suffix[code as usize] = code as u8;
    }

    let mut reader = CodeReader {
        blocks: SubBlocks::new(data),
        bits: 0,
        nbits: 0,
    };
    let mut indices = Vec::with_capacity(pixel_count);
    let mut overflowed = false;
    let mut sequence: Vec<u8> = Vec::with_capacity(TABLE_SIZE);

    loop {
        let code = reader.read(width)?;

        if code == clear {
            width = min_code_size + 1;
            next = stop + 1;
            prev = None;
            continue;
        }
        if code == stop {
            break;
        }
        if code > next {
            return Err(LzwError::CodeOutOfRange { code, next });
        }

        sequence.clear();
        let first = if code == next {
            // The code being defined right now: previous sequence plus its
            // own first color
            let p = prev.ok_or(LzwError::MissingPrefix(code))?;
            let first = expand(p, clear, &prefix, &suffix, &mut sequence);
            sequence.push(first);
            first
        } else {
            expand(code, clear, &prefix, &suffix, &mut sequence)
        };

        for &index in &sequence {
            if indices.len() < pixel_count {
                indices.push(index);
            } else {
                overflowed = true;
            }
        }

        if let Some(p) = prev {
            if (next as usize) < TABLE_SIZE {
                prefix[next as usize] = p;
                suffix[next as usize] = first;
                next += 1;
            }
        }
        prev = Some(code);

        if next as usize >= 1 << width && width < MAX_CODE_WIDTH {
            width += 1;
        }
    }

    let consumed = reader.blocks.finish()?;
    Ok(LzwOutput {
        indices,
        consumed,
        overflowed,
    })
}

/// Append the sequence of `code` to `out` in order and return its first
/// color.
fn expand(code: u16, clear: u16, prefix: &[u16], suffix: &[u8], out: &mut Vec<u8>) -> u8 {
    let start = out.len();
    let mut c = code;
    // Bounded by the table size; a table entry's prefix is always an
    // earlier slot
    for _ in 0..TABLE_SIZE {
        out.push(suffix[c as usize]);
        if c < clear {
            break;
        }
        c = prefix[c as usize];
    }
    out[start..].reverse();
    out[start]
}

/// Rows of an interlaced image in the order they are stored.
pub fn interlaced_row_order(height: usize) -> Vec<usize> {
    const PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];
    PASSES
        .iter()
        .flat_map(|&(start, step)| (start..height).step_by(step))
        .collect()
}

/// Rearrange rows decoded in interlaced order into top-to-bottom order.
pub fn deinterlace(indices: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height];
    for (stored, row) in interlaced_row_order(height).into_iter().enumerate() {
        let src = stored * width;
        if src >= indices.len() {
            break;
        }
        let end = (src + width).min(indices.len());
        out[row * width..row * width + (end - src)].copy_from_slice(&indices[src..end]);
    }
    out
}
