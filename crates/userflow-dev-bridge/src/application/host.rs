//! Ports to the desktop host runtime.
//!
//! The bridge never talks to a windowing system directly.  Whatever embeds it
//! supplies a [`Host`] that can hand out the current top-level window; the
//! window can be shown and can capture a rectangle of its content.
//!
//! Infrastructure implementations wrap the real host (or, in the standalone
//! binary, a static backdrop image); test implementations record calls.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;

use crate::domain::CaptureRect;

/// Failures reported by the host runtime.
#[derive(Debug, Error)]
pub enum HostError {
    /// The window exists but cannot be shown or focused.
    #[error("window could not be shown: {0}")]
    Show(String),

    /// The host refused or failed to capture the requested rectangle.
    #[error("page capture failed: {0}")]
    Capture(String),
}

/// Access to the host application's windows.
pub trait Host: Send + Sync {
    /// Returns the window the SDK is embedded in, or `None` if the app has no
    /// window right now (e.g. it is still starting or all windows are closed).
    fn current_window(&self) -> Option<Arc<dyn HostWindow>>;
}

/// A top-level host window.
#[async_trait]
pub trait HostWindow: Send + Sync {
    /// Makes the window visible and brings it to the foreground.
    fn show(&self) -> Result<(), HostError>;

    /// Ratio of physical to logical pixels for the display the window is on.
    ///
    /// `2.0` on a typical Retina display.
    fn device_pixel_ratio(&self) -> f64;

    /// Captures `rect` (logical pixels) of the window content.
    ///
    /// The returned image is at physical resolution and may contain
    /// transparent pixels.
    async fn capture_page(&self, rect: CaptureRect) -> Result<RgbaImage, HostError>;
}
