//! Thumbnail decoding for PNG, JPEG and BMP streams.
//!
//! These formats are decoded with the `image` crate and scaled down to
//! [`ScanOptions::thumbnail_max_dim`]. GIF frames are decoded by the GIF
//! walker itself and only pass through [`shrink_indexed`].

use image::{DynamicImage, ImageFormat};
use tracing::debug;

use super::{ScanContext, ScanOptions};
use crate::error::ScanError;
use crate::region::{RegionId, ThumbnailImage};

/// Decode an encoded image into an RGBA thumbnail.
pub fn decode(
    data: &[u8],
    format: ImageFormat,
    options: &ScanOptions,
) -> Result<ThumbnailImage, String> {
    if data.len() as u64 > options.thumbnail_max_bytes {
        return Err(format!(
            "{} bytes exceeds thumbnail limit of {}",
            data.len(),
            options.thumbnail_max_bytes
        ));
    }

    let image = image::load_from_memory_with_format(data, format).map_err(|e| e.to_string())?;
    Ok(to_thumbnail(image, options.thumbnail_max_dim))
}

fn to_thumbnail(image: DynamicImage, max_dim: u32) -> ThumbnailImage {
    let max_dim = max_dim.max(1);
    let image = if image.width() > max_dim || image.height() > max_dim {
        image.thumbnail(max_dim, max_dim)
    } else {
        image
    };
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    ThumbnailImage::rgba(width, height, rgba.into_raw())
}

/// Decode the whole window of `ctx` and attach the result to `region`.
///
/// Skipped silently when thumbnails are disabled; decode failures are logged
/// and leave the region without a thumbnail.
pub(crate) fn attach_whole_stream(
    ctx: &mut ScanContext<'_>,
    format: ImageFormat,
    region: RegionId,
) -> Result<(), ScanError> {
    let options = *ctx.options();
    if !options.thumbnails {
        return Ok(());
    }
    if ctx.size() > options.thumbnail_max_bytes {
        debug!(
            size = ctx.size(),
            limit = options.thumbnail_max_bytes,
            "Stream too large for a thumbnail"
        );
        return Ok(());
    }

    let data = ctx.read_all()?;
    attach_bytes(ctx, &data, format, region);
    Ok(())
}

/// Decode `data` and attach the result to `region`.
pub(crate) fn attach_bytes(
    ctx: &mut ScanContext<'_>,
    data: &[u8],
    format: ImageFormat,
    region: RegionId,
) {
    let options = *ctx.options();
    if !options.thumbnails {
        return;
    }
    match decode(data, format, &options) {
        Ok(thumbnail) => ctx.attach_thumbnail(region, thumbnail),
        Err(reason) => debug!(?format, %reason, "Thumbnail decode failed"),
    }
}

/// Nearest-neighbour downscale of a palette image to fit `max_dim`.
pub fn shrink_indexed(image: ThumbnailImage, max_dim: u32) -> ThumbnailImage {
    let max_dim = max_dim.max(1);
    if image.width <= max_dim && image.height <= max_dim {
        return image;
    }

    let scale = (image.width.max(image.height) as f64) / max_dim as f64;
    let width = ((image.width as f64 / scale).round() as u32).clamp(1, max_dim);
    let height = ((image.height as f64 / scale).round() as u32).clamp(1, max_dim);

    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let src_y = ((y as u64 * image.height as u64) / height as u64) as usize;
        for x in 0..width {
            let src_x = ((x as u64 * image.width as u64) / width as u64) as usize;
            let index = src_y * image.width as usize + src_x;
            pixels.push(image.pixels.get(index).copied().unwrap_or(0));
        }
    }

    ThumbnailImage {
        width,
        height,
        bit_depth: image.bit_depth,
        palette: image.palette,
        pixels,
    }
}
