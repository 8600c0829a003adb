//! Per-scan state shared by walkers and decoders.
//!
//! [`ScanContext`] wraps the byte source a walker consumes: every read, seek
//! and search goes through it so that cancellation is checked first and short
//! reads become [`ScanError::Truncated`]. Region offsets handed to it are
//! relative to the window being scanned; it translates them to absolute
//! offsets in the outermost source.
//!
//! [`Emitter`] is the sink side. Metadata decoders, which work on in-memory
//! slices, only need an emitter.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{CancellationToken, ScanOptions};
use crate::error::ScanError;
use crate::io::{ByteSource, Direction, MemorySource, Origin, SubSource};
use crate::region::{RegionId, RegionSink, StyleFlags, ThumbnailImage};

/// Signature shared by every walker body.
pub(crate) type WalkFn = fn(&mut ScanContext<'_>) -> Result<(), ScanError>;

// =============================================================================
// Emitter
// =============================================================================

/// Forwards regions to the sink and carries the options of the running scan.
pub struct Emitter<'a> {
    sink: &'a mut dyn RegionSink,
    options: ScanOptions,
    cancel: CancellationToken,
    depth: u32,
}

impl<'a> Emitter<'a> {
    pub fn new(
        sink: &'a mut dyn RegionSink,
        options: ScanOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            options,
            cancel,
            depth: 0,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Nesting level of the scan this emitter serves (0 for the outermost).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn check_cancelled(&self) -> Result<(), ScanError> {
        self.cancel.check().map_err(ScanError::from)
    }

    /// Add a region at an absolute offset. Lengths above `u32::MAX` are clamped.
    pub fn add(
        &mut self,
        flags: StyleFlags,
        offset: u64,
        length: u64,
        label: impl Into<String>,
        parent: Option<RegionId>,
    ) -> RegionId {
        let length = u32::try_from(length).unwrap_or(u32::MAX);
        self.sink
            .add_region(flags, offset, length, Some(label.into()), parent)
    }

    pub fn attach_thumbnail(&mut self, region: RegionId, thumbnail: ThumbnailImage) {
        self.sink.attach_thumbnail(region, thumbnail);
    }

    /// Borrow this emitter for a nested scan one level deeper.
    pub fn reborrow(&mut self) -> Emitter<'_> {
        Emitter {
            sink: &mut *self.sink,
            options: self.options,
            cancel: self.cancel.clone(),
            depth: self.depth + 1,
        }
    }

    /// Run `walk` over an in-memory copy of `data` that sits at absolute
    /// offset `offset`, with `parent` as the root of everything it emits.
    ///
    /// Failures other than cancellation are logged and swallowed: an embedded
    /// image that does not parse never aborts the scan that found it.
    pub(crate) fn scan_embedded(
        &mut self,
        data: &[u8],
        offset: u64,
        parent: Option<RegionId>,
        what: &str,
        walk: WalkFn,
    ) -> Result<(), ScanError> {
        if self.depth >= self.options.max_depth {
            debug!(what, depth = self.depth, "Skipping embedded stream: nesting limit reached");
            return Ok(());
        }

        let mut source = MemorySource::new(Bytes::copy_from_slice(data));
        let mut nested = ScanContext::new(&mut source, self.reborrow(), offset, parent);
        absorb_nested(walk(&mut nested), what, offset)
    }
}

/// Keep cancellation, log and drop everything else.
pub(crate) fn absorb_nested(
    result: Result<(), ScanError>,
    what: &str,
    offset: u64,
) -> Result<(), ScanError> {
    match result {
        Ok(()) => Ok(()),
        Err(ScanError::Cancelled) => Err(ScanError::Cancelled),
        Err(err) => {
            debug!(what, offset, error = %err, "Nested scan failed");
            Ok(())
        }
    }
}

// =============================================================================
// ScanContext
// =============================================================================

/// Cursor over the window a walker is scanning.
pub struct ScanContext<'a> {
    source: &'a mut dyn ByteSource,
    out: Emitter<'a>,
    origin: u64,
    root: Option<RegionId>,
}

impl<'a> ScanContext<'a> {
    /// `origin` is the absolute offset of `source`'s first byte; `root`
    /// becomes the parent of regions emitted without an explicit one.
    pub fn new(
        source: &'a mut dyn ByteSource,
        out: Emitter<'a>,
        origin: u64,
        root: Option<RegionId>,
    ) -> Self {
        Self {
            source,
            out,
            origin,
            root,
        }
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    pub fn position(&self) -> u64 {
        self.source.position()
    }

    pub fn remaining(&self) -> u64 {
        self.size() - self.position()
    }

    pub fn identifier(&self) -> &str {
        self.source.identifier()
    }

    /// Absolute offset of a window-relative offset.
    #[inline]
    pub fn absolute(&self, offset: u64) -> u64 {
        self.origin + offset
    }

    pub fn root(&self) -> Option<RegionId> {
        self.root
    }

    pub fn options(&self) -> &ScanOptions {
        self.out.options()
    }

    pub fn out(&mut self) -> &mut Emitter<'a> {
        &mut self.out
    }

    // -------------------------------------------------------------------------
    // Source access
    // -------------------------------------------------------------------------

    pub fn seek_to(&mut self, offset: u64) -> Result<u64, ScanError> {
        self.out.check_cancelled()?;
        let offset = i64::try_from(offset).map_err(|_| ScanError::Truncated {
            offset: self.absolute(0).saturating_add(offset),
            requested: 0,
            size: self.size(),
        })?;
        Ok(self.source.seek(offset, Origin::Begin)?)
    }

    pub fn seek_end(&mut self) -> Result<u64, ScanError> {
        self.out.check_cancelled()?;
        Ok(self.source.seek(0, Origin::End)?)
    }

    /// Advance the cursor by `count` bytes. Fails if that passes the end.
    pub fn skip(&mut self, count: u64) -> Result<u64, ScanError> {
        let target = self.position().saturating_add(count);
        if target > self.size() {
            return Err(ScanError::Truncated {
                offset: self.absolute(self.position()),
                requested: count,
                size: self.size(),
            });
        }
        self.seek_to(target)
    }

    /// Read exactly `len` bytes or fail with [`ScanError::Truncated`].
    pub fn read_exact(&mut self, len: usize) -> Result<Bytes, ScanError> {
        self.out.check_cancelled()?;
        let offset = self.position();
        let bytes = self.source.read(len)?;
        if bytes.len() < len {
            return Err(ScanError::Truncated {
                offset: self.absolute(offset),
                requested: len as u64,
                size: self.absolute(self.size()),
            });
        }
        Ok(bytes)
    }

    /// Read up to `len` bytes; fewer only at end of data.
    pub fn read_up_to(&mut self, len: usize) -> Result<Bytes, ScanError> {
        self.out.check_cancelled()?;
        Ok(self.source.read(len)?)
    }

    pub fn read_exact_at(&mut self, offset: u64, len: usize) -> Result<Bytes, ScanError> {
        self.seek_to(offset)?;
        self.read_exact(len)
    }

    pub fn read_u8(&mut self) -> Result<u8, ScanError> {
        Ok(self.read_exact(1)?[0])
    }

    /// Read the whole window without moving the cursor.
    pub fn read_all(&mut self) -> Result<Bytes, ScanError> {
        let saved = self.position();
        let len = usize::try_from(self.size()).map_err(|_| {
            ScanError::malformed("stream", "window too large to load into memory")
        })?;
        let data = self.read_exact_at(0, len)?;
        self.seek_to(saved)?;
        Ok(data)
    }

    /// Read `len` bytes in pieces, feeding each to `visit`. The bytes are
    /// kept and returned only when `keep` is set.
    pub fn read_streamed(
        &mut self,
        len: u64,
        keep: bool,
        mut visit: impl FnMut(&[u8]),
    ) -> Result<Option<Bytes>, ScanError> {
        const PIECE: u64 = 64 * 1024;
        let mut kept = keep.then(|| BytesMut::with_capacity(len.min(PIECE * 16) as usize));
        let mut left = len;
        while left > 0 {
            let piece = self.read_exact(left.min(PIECE) as usize)?;
            visit(&piece);
            if let Some(buf) = kept.as_mut() {
                buf.extend_from_slice(&piece);
            }
            left -= piece.len() as u64;
        }
        Ok(kept.map(BytesMut::freeze))
    }

    pub fn search(&mut self, needle: &[u8], direction: Direction) -> Result<bool, ScanError> {
        self.out.check_cancelled()?;
        Ok(self.source.search(needle, direction)?)
    }

    // -------------------------------------------------------------------------
    // Region output
    // -------------------------------------------------------------------------

    /// Emit a region at a window-relative offset.
    ///
    /// A `None` parent attaches the region to the window root. The length is
    /// clipped to the end of the window.
    pub fn emit(
        &mut self,
        flags: StyleFlags,
        offset: u64,
        length: u64,
        label: impl Into<String>,
        parent: Option<RegionId>,
    ) -> RegionId {
        let length = length.min(self.size().saturating_sub(offset));
        let parent = parent.or(self.root);
        self.out.add(flags, self.absolute(offset), length, label, parent)
    }

    pub fn attach_thumbnail(&mut self, region: RegionId, thumbnail: ThumbnailImage) {
        self.out.attach_thumbnail(region, thumbnail);
    }

    /// Run `walk` over the window `[offset, offset + len)` of this source.
    ///
    /// The nested walker sees an ordinary stream starting at zero; its
    /// regions land at the right absolute offsets under `root`.
    pub fn nested<T>(
        &mut self,
        offset: u64,
        len: u64,
        root: Option<RegionId>,
        walk: impl FnOnce(&mut ScanContext<'_>) -> Result<T, ScanError>,
    ) -> Result<T, ScanError> {
        if self.out.depth() >= self.out.options().max_depth {
            return Err(ScanError::malformed("stream", "nesting limit reached"));
        }
        self.out.check_cancelled()?;

        let origin = self.origin + offset;
        let mut window = SubSource::new(&mut *self.source, offset, len)?;
        let mut inner = ScanContext::new(&mut window, self.out.reborrow(), origin, root);
        walk(&mut inner)
    }
}
