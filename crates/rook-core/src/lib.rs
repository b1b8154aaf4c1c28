//! Foundational low-level utilities shared across Rook crates.
//!
//! Provides atomic file-write helpers and text shaping used when rendering
//! upstream errors and secrets into logs.

pub mod atomic_io;
pub mod text;

pub use atomic_io::write_text_atomic;
pub use text::{mask_secret, truncate_for_error};
