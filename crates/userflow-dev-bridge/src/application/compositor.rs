//! Screenshot compositing.
//!
//! Raw page captures may have transparent or inconsistent backgrounds, which
//! render badly on the Flow Builder's non-white canvas.  The compositor
//! flattens a capture onto an opaque white canvas at device-pixel resolution
//! and encodes the result as a PNG data URL.
//!
//! ```text
//! raw capture (RGBA, any alpha) ──┐
//!                                 ├─► white canvas W·R × H·R ─► PNG ─► data:image/png;base64,...
//! device pixel ratio R ───────────┘
//! ```
//!
//! The functions here are pure apart from [`capture_composited`], which awaits
//! the host capture and then composites.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

use crate::application::host::{Host, HostError};
use crate::domain::CaptureRect;

/// Data URL produced for a zero-area image, matching what a browser canvas
/// returns from `toDataURL()` when it has no pixels.
pub const EMPTY_DATA_URL: &str = "data:,";

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Largest physical edge we are willing to allocate a canvas for.
pub const MAX_CANVAS_EDGE: u32 = 32_767;

/// Largest physical canvas area, in pixels (16384 × 16384).
pub const MAX_CANVAS_AREA: u64 = 268_435_456;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Errors from compositing, encoding, or decoding images.
#[derive(Debug, Error)]
pub enum CompositeError {
    /// The device pixel ratio was zero, negative, NaN, or infinite.
    #[error("invalid device pixel ratio: {0}")]
    InvalidRatio(f64),

    /// The physical canvas would exceed [`MAX_CANVAS_EDGE`] on one side or
    /// [`MAX_CANVAS_AREA`] in total.
    #[error("canvas of {width}x{height} logical pixels at ratio {ratio} is too large")]
    TooLarge { width: u32, height: u32, ratio: f64 },

    /// PNG encoding or decoding failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// The string is not a `data:` URL we understand.
    #[error("unsupported data URL: {0}")]
    InvalidDataUrl(String),

    /// The data URL payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Failures of a full screenshot request.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The host has no window to capture.
    #[error("no host window is available")]
    NoWindow,

    /// The host capture primitive failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// The capture succeeded but could not be composited or encoded.
    #[error(transparent)]
    Composite(#[from] CompositeError),

    /// The capture did not finish within the configured timeout.
    #[error("screenshot capture timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// The target environment was destroyed before the capture finished.
    #[error("target environment was destroyed")]
    Destroyed,
}

/// Converts a logical edge length to physical pixels.
///
/// Fractional results are truncated, as a canvas does when its size is
/// assigned a non-integer value.
///
/// # Errors
///
/// [`CompositeError::InvalidRatio`] for non-finite or non-positive ratios,
/// [`CompositeError::TooLarge`] past [`MAX_CANVAS_EDGE`] or [`MAX_CANVAS_AREA`].
pub fn physical_size(
    width: u32,
    height: u32,
    ratio: f64,
) -> Result<(u32, u32), CompositeError> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(CompositeError::InvalidRatio(ratio));
    }
    let scale = |edge: u32| (f64::from(edge) * ratio).floor();
    let (w, h) = (scale(width), scale(height));
    let too_large = CompositeError::TooLarge {
        width,
        height,
        ratio,
    };
    if w > f64::from(MAX_CANVAS_EDGE) || h > f64::from(MAX_CANVAS_EDGE) {
        return Err(too_large);
    }
    let (w, h) = (w as u32, h as u32);
    if u64::from(w) * u64::from(h) > MAX_CANVAS_AREA {
        return Err(too_large);
    }
    Ok((w, h))
}

/// Flattens `raw` onto a white canvas of `width × height` logical pixels at
/// `ratio`.
///
/// The top-left `W·R × H·R` region of `raw` is drawn at the origin without
/// rescaling.  Pixels outside `raw` stay white; semi-transparent pixels are
/// blended over white.
///
/// # Example
///
/// ```rust
/// use image::{Rgba, RgbaImage};
/// use userflow_dev_bridge::application::compositor::composite_on_white;
///
/// let raw = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
/// let out = composite_on_white(&raw, 2, 2, 2.0).unwrap();
/// assert_eq!(out.dimensions(), (4, 4));
/// assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
/// ```
pub fn composite_on_white(
    raw: &RgbaImage,
    width: u32,
    height: u32,
    ratio: f64,
) -> Result<RgbaImage, CompositeError> {
    let (pw, ph) = physical_size(width, height, ratio)?;
    let mut canvas = RgbaImage::from_pixel(pw, ph, WHITE);

    let copy_w = pw.min(raw.width());
    let copy_h = ph.min(raw.height());
    for y in 0..copy_h {
        for x in 0..copy_w {
            canvas.put_pixel(x, y, over_white(*raw.get_pixel(x, y)));
        }
    }
    Ok(canvas)
}

/// Source-over blend of one pixel onto opaque white, in integer arithmetic so
/// that opaque pixels come through bit-exact.
fn over_white(src: Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, a] = src.0;
    let a = u32::from(a);
    let mix = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
    Rgba([mix(r), mix(g), mix(b), 255])
}

/// Encodes an image as a PNG data URL.
///
/// Zero-area images encode as [`EMPTY_DATA_URL`] because PNG cannot represent
/// them.
pub fn encode_data_url(image: &RgbaImage) -> Result<String, CompositeError> {
    if image.width() == 0 || image.height() == 0 {
        return Ok(EMPTY_DATA_URL.to_string());
    }
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(&png)))
}

/// Decodes a data URL produced by [`encode_data_url`] (or by a host that
/// hands out base64 image data URLs) back into pixels.
///
/// [`EMPTY_DATA_URL`] decodes to a 0×0 image.
pub fn decode_data_url(url: &str) -> Result<RgbaImage, CompositeError> {
    if url == EMPTY_DATA_URL {
        return Ok(RgbaImage::new(0, 0));
    }
    let payload = url
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| CompositeError::InvalidDataUrl(truncate_for_log(url)))?;
    let bytes = STANDARD.decode(payload)?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

/// Captures `rect` from the host's current window and composites it.
///
/// This is the full screenshot pipeline behind
/// [`TargetEnv::capture_screenshot`](crate::application::TargetEnv::capture_screenshot),
/// minus timeout and cancellation, which belong to the caller.
pub async fn capture_composited(host: &dyn Host, rect: CaptureRect) -> Result<String, CaptureError> {
    let window = host.current_window().ok_or(CaptureError::NoWindow)?;
    let ratio = window.device_pixel_ratio();
    // Reject impossible canvases before the host allocates a capture.
    physical_size(rect.width, rect.height, ratio)?;
    let raw = window.capture_page(rect).await?;
    let composited = composite_on_white(&raw, rect.width, rect.height, ratio)?;
    Ok(encode_data_url(&composited)?)
}

fn truncate_for_log(url: &str) -> String {
    url.chars().take(32).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
