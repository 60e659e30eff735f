//! Error types re-exported from the shared error crate

pub use am_error::{AdbmendError, Result};
