use bytes::Bytes;

use crate::error::IoError;

/// Bytes read per step when [`ByteSource::search`] scans the stream.
const SEARCH_CHUNK: usize = 64 * 1024;

/// Reference point for [`ByteSource::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Begin,
    Current,
    End,
}

/// Direction for [`ByteSource::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Random-access cursor over a possibly very large byte stream.
///
/// This abstraction lets the format walkers run over files, in-memory
/// buffers, and windows of either without knowing which one they have.
/// Sources own no format knowledge.
pub trait ByteSource {
    /// Total size of the stream in bytes.
    fn size(&self) -> u64;

    /// Current cursor position.
    fn position(&self) -> u64;

    /// Read up to `max_len` bytes and advance the cursor.
    ///
    /// Returns fewer bytes only when the end of the stream is reached.
    fn read(&mut self, max_len: usize) -> Result<Bytes, IoError>;

    /// Move the cursor and return the new absolute position.
    ///
    /// Seeking to exactly `size()` is allowed; anything outside `0..=size()`
    /// fails with [`IoError::SeekOutOfBounds`].
    fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64, IoError>;

    /// Identifier for logging (a path, or `<memory>`).
    fn identifier(&self) -> &str;

    /// Search for `needle` starting at the cursor.
    ///
    /// Forward searches look for a match starting at or after the cursor;
    /// backward searches look for a match ending at or before it. On success
    /// the cursor is left on the first byte of the match. On failure the
    /// cursor is restored.
    fn search(&mut self, needle: &[u8], direction: Direction) -> Result<bool, IoError> {
        let start = self.position();
        let size = self.size();
        let n = needle.len();
        if n == 0 {
            return Ok(true);
        }

        match direction {
            Direction::Forward => {
                let mut chunk_start = start;
                while chunk_start + n as u64 <= size {
                    self.seek(chunk_start as i64, Origin::Begin)?;
                    let buf = self.read(SEARCH_CHUNK + n - 1)?;
                    if buf.len() < n {
                        break;
                    }
                    if let Some(i) = find(&buf, needle) {
                        self.seek((chunk_start + i as u64) as i64, Origin::Begin)?;
                        return Ok(true);
                    }
                    chunk_start += (buf.len() - n + 1) as u64;
                }
            }
            Direction::Backward => {
                let mut chunk_end = start;
                while chunk_end >= n as u64 {
                    let chunk_begin = chunk_end.saturating_sub((SEARCH_CHUNK + n - 1) as u64);
                    self.seek(chunk_begin as i64, Origin::Begin)?;
                    let buf = self.read((chunk_end - chunk_begin) as usize)?;
                    if let Some(i) = rfind(&buf, needle) {
                        self.seek((chunk_begin + i as u64) as i64, Origin::Begin)?;
                        return Ok(true);
                    }
                    if chunk_begin == 0 {
                        break;
                    }
                    chunk_end = chunk_begin + (n - 1) as u64;
                }
            }
        }

        self.seek(start as i64, Origin::Begin)?;
        Ok(false)
    }
}

/// Resolve a seek request against a stream of `size` bytes.
pub(crate) fn resolve_seek(
    position: u64,
    size: u64,
    offset: i64,
    origin: Origin,
) -> Result<u64, IoError> {
    let base = match origin {
        Origin::Begin => 0i128,
        Origin::Current => position as i128,
        Origin::End => size as i128,
    };
    let target = base + offset as i128;
    if target < 0 || target > size as i128 {
        return Err(IoError::SeekOutOfBounds { target, size });
    }
    Ok(target as u64)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

// =============================================================================
// MemorySource
// =============================================================================

/// A [`ByteSource`] over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    pos: u64,
    identifier: String,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            identifier: "<memory>".to_string(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, max_len: usize) -> Result<Bytes, IoError> {
        let start = self.pos as usize;
        let end = start.saturating_add(max_len).min(self.data.len());
        self.pos = end as u64;
        Ok(self.data.slice(start..end))
    }

    fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64, IoError> {
        self.pos = resolve_seek(self.pos, self.size(), offset, origin)?;
        Ok(self.pos)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// SubSource
// =============================================================================

/// A `(base, length)` window over another source.
///
/// Nested scans (a PNG inside an ICO, a JPEG thumbnail inside EXIF) run over
/// a `SubSource` so that they see an ordinary stream starting at zero.
pub struct SubSource<'a> {
    inner: &'a mut dyn ByteSource,
    base: u64,
    len: u64,
    pos: u64,
}

impl<'a> SubSource<'a> {
    /// Borrow a window of `inner`. Fails if the window runs past its end.
    pub fn new(inner: &'a mut dyn ByteSource, base: u64, len: u64) -> Result<Self, IoError> {
        let size = inner.size();
        if base.checked_add(len).map_or(true, |end| end > size) {
            return Err(IoError::Truncated {
                offset: base,
                requested: len,
                size,
            });
        }
        Ok(Self {
            inner,
            base,
            len,
            pos: 0,
        })
    }

    /// Offset of the window inside the outer source.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl ByteSource for SubSource<'_> {
    fn size(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, max_len: usize) -> Result<Bytes, IoError> {
        let remaining = self.len - self.pos;
        let want = (max_len as u64).min(remaining) as usize;
        self.inner
            .seek((self.base + self.pos) as i64, Origin::Begin)?;
        let bytes = self.inner.read(want)?;
        self.pos += bytes.len() as u64;
        Ok(bytes)
    }

    fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64, IoError> {
        self.pos = resolve_seek(self.pos, self.len, offset, origin)?;
        Ok(self.pos)
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
