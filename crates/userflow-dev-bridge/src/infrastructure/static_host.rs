//! Headless [`Host`] used by the standalone binary.
//!
//! There is no real window when the bridge runs on its own, so the
//! `StaticHost` stands in for one: "show" requests are logged and counted, and
//! captures are cut from a fixed backdrop image (or a fully transparent
//! canvas when no backdrop is configured).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use image::{imageops, RgbaImage};
use tracing::info;

use crate::application::compositor::physical_size;
use crate::application::host::{Host, HostError, HostWindow};
use crate::domain::CaptureRect;

/// A host with exactly one always-present window.
pub struct StaticHost {
    window: Arc<StaticWindow>,
}

impl StaticHost {
    /// `backdrop` is in physical pixels; `device_pixel_ratio` converts the
    /// logical rectangles the SDK asks for.
    pub fn new(backdrop: Option<RgbaImage>, device_pixel_ratio: f64) -> Self {
        Self {
            window: Arc::new(StaticWindow {
                backdrop,
                device_pixel_ratio,
                shows: AtomicUsize::new(0),
            }),
        }
    }

    /// Loads the backdrop from an image file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn from_backdrop_file(path: &Path, device_pixel_ratio: f64) -> anyhow::Result<Self> {
        let backdrop = image::open(path)
            .with_context(|| format!("failed to load backdrop image {}", path.display()))?
            .to_rgba8();
        info!(
            "loaded backdrop {} ({}x{})",
            path.display(),
            backdrop.width(),
            backdrop.height()
        );
        Ok(Self::new(Some(backdrop), device_pixel_ratio))
    }

    /// How many times the window has been asked to show itself.
    pub fn show_count(&self) -> usize {
        self.window.shows.load(Ordering::Relaxed)
    }
}

impl Host for StaticHost {
    fn current_window(&self) -> Option<Arc<dyn HostWindow>> {
        Some(self.window.clone())
    }
}

struct StaticWindow {
    backdrop: Option<RgbaImage>,
    device_pixel_ratio: f64,
    shows: AtomicUsize,
}

#[async_trait]
impl HostWindow for StaticWindow {
    fn show(&self) -> Result<(), HostError> {
        let n = self.shows.fetch_add(1, Ordering::Relaxed) + 1;
        info!("builder asked to show the window (#{n})");
        Ok(())
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    async fn capture_page(&self, rect: CaptureRect) -> Result<RgbaImage, HostError> {
        let ratio = self.device_pixel_ratio;
        let (pw, ph) = physical_size(rect.width, rect.height, ratio)
            .map_err(|e| HostError::Capture(e.to_string()))?;
        let Some(backdrop) = &self.backdrop else {
            return Ok(RgbaImage::new(pw, ph));
        };

        // Negative offsets clamp to the window's content origin.
        let px = (f64::from(rect.x.max(0)) * ratio) as u32;
        let py = (f64::from(rect.y.max(0)) * ratio) as u32;
        Ok(imageops::crop_imm(backdrop, px, py, pw, ph).to_image())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
