//! # zsurface
//!
//! Client toolkit for presenting pixel views inside a 3D compositor.
//!
//! ## Architecture
//!
//! zsurface is built from a few small layers:
//! - `shm`: anonymous shared memory backing vertex and texture data
//! - `signal`: destroy/commit/geometry notifications with self-removing listeners
//! - `view`: pixel surfaces, their texture state machine and GPU resources
//! - `toplevel`: window-like containers negotiating size with the compositor
//! - `ray`: ray vs. view hit testing
//! - `display`: the session, input routing and the readiness protocol
//! - `protocol`: the typed seam to the wire, with a `wayland-client` backend
//! - `config`: session settings loaded from TOML
//!
//! ## Usage
//!
//! ```rust,no_run
//! use zsurface::{Display, SessionConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::default().with_env_overrides();
//!     let mut display = Display::connect(&config)?;
//!
//!     let toplevel = display.create_toplevel()?;
//!     let red = [0u8, 0, 255, 255].repeat(64 * 64);
//!     toplevel.view().set_texture(&red, 64, 64)?;
//!     toplevel.view().commit();
//!
//!     loop {
//!         display.dispatch(&mut ())?;
//!     }
//! }
//! ```

mod context;

pub mod config;
pub mod display;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod protocol;
pub mod ray;
pub mod shm;
pub mod signal;
pub mod testing;
pub mod toplevel;
pub mod view;

// Re-export main types for easy access
pub use config::SessionConfig;
pub use context::ViewId;
pub use display::{CursorImage, Display, DisplayHandler};
pub use error::{Error, Result};
pub use protocol::{ButtonState, Capabilities, KeyState};
pub use ray::Ray;
pub use signal::{Listener, Signal, Tracked};
pub use toplevel::Toplevel;
pub use view::{TextureState, View};

/// Version information for zsurface
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
