//! Utility functions shared across the core.
//!
//! - **Text sanitizing**: control-character stripping for attacker-controlled
//!   feed text that ends up in logs or store rows
//! - **URL helpers**: source-string classification, server roots, relative
//!   resolution against a base URL

mod text;
mod urls;

pub use text::strip_control_chars;
pub use urls::{resolve_url, server_root, SourceKind};
