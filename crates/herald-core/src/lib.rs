//! Low-level helpers shared by the Herald crates.
//!
//! Covers crash-safe file replacement for flat-file stores, unix clock
//! readings used in logs and registration records, and char-boundary-safe
//! truncation for platform message limits.

pub mod atomic_io;
pub mod text;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use text::truncate_chars;
pub use time_utils::current_unix_timestamp_ms;
