//! Domain layer for userflow-dev-bridge.
//!
//! Pure types with no I/O, networking, or async runtime: the builder message
//! model, the screenshot rectangle, and the server configuration.

pub mod config;
pub mod messages;

pub use config::DevServerConfig;
pub use messages::{decode_frame, BuilderMessage, DecodeError, SdkMessage};

/// A screenshot rectangle in logical (CSS) pixels, relative to the window's
/// content area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
