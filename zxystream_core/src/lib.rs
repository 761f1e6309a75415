//! Contains the value types shared by the zxystream crates: tile coordinates, blobs and tile formats.

pub mod types;
pub use types::*;
