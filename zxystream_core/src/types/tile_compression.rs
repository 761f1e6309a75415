//! This module defines the `TileCompression` enum: the transport compression wrapped around a tile payload.
//!
//! # Examples
//!
//! ```
//! use zxystream_core::TileCompression;
//!
//! assert_eq!(TileCompression::Gzip.as_str(), "gzip");
//! assert_eq!(TileCompression::Gzip.content_encoding(), Some("gzip"));
//! assert_eq!(TileCompression::Uncompressed.content_encoding(), None);
//! ```

use std::fmt::Display;

/// Compression algorithms found in MBTiles payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileCompression {
	Uncompressed,
	Gzip,
	/// zlib-wrapped deflate stream
	Deflate,
}

impl TileCompression {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileCompression::Uncompressed => "none",
			TileCompression::Gzip => "gzip",
			TileCompression::Deflate => "deflate",
		}
	}

	/// The HTTP `Content-Encoding` value, if any.
	pub fn content_encoding(&self) -> Option<&'static str> {
		match self {
			TileCompression::Uncompressed => None,
			TileCompression::Gzip => Some("gzip"),
			TileCompression::Deflate => Some("deflate"),
		}
	}

	/// Detect the compression from the first bytes of a payload.
	pub fn sniff(data: &[u8]) -> TileCompression {
		match data {
			[0x1f, 0x8b, ..] => TileCompression::Gzip,
			[0x78, 0x01 | 0x5e | 0x9c | 0xda, ..] => TileCompression::Deflate,
			_ => TileCompression::Uncompressed,
		}
	}
}

impl Display for TileCompression {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
