//! This module defines the `TileFormat` enum and the magic-byte detection used to label tile payloads.
//!
//! MBTiles archives do not store a content type per tile, so the format is derived from the payload:
//! raster formats by their file signature, vector tiles by being compressed or by starting with a
//! protobuf layer field.
//!
//! ```rust
//! use zxystream_core::{TileCompression, TileFormat};
//!
//! let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
//! assert_eq!(TileFormat::sniff(&png), (TileFormat::PNG, TileCompression::Uncompressed));
//! assert_eq!(TileFormat::PNG.as_mime_str(), "image/png");
//! ```

use crate::TileCompression;
use std::fmt::{Display, Formatter};

/// Enum representing the tile formats that can be recognised in an archive.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileFormat {
	BIN,
	GIF,
	JPG,
	MVT,
	PNG,
	WEBP,
}

impl TileFormat {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileFormat::BIN => "bin",
			TileFormat::GIF => "gif",
			TileFormat::JPG => "jpg",
			TileFormat::MVT => "pbf",
			TileFormat::PNG => "png",
			TileFormat::WEBP => "webp",
		}
	}

	/// Returns the MIME type served for this format.
	pub fn as_mime_str(&self) -> &'static str {
		match self {
			TileFormat::BIN => "application/octet-stream",
			TileFormat::GIF => "image/gif",
			TileFormat::JPG => "image/jpeg",
			TileFormat::MVT => "application/x-protobuf",
			TileFormat::PNG => "image/png",
			TileFormat::WEBP => "image/webp",
		}
	}

	/// Detect format and transport compression of a tile payload.
	///
	/// Compressed payloads are always vector tiles; raster tiles are stored uncompressed.
	pub fn sniff(data: &[u8]) -> (TileFormat, TileCompression) {
		let compression = TileCompression::sniff(data);
		if compression != TileCompression::Uncompressed {
			return (TileFormat::MVT, compression);
		}

		let format = match data {
			[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => TileFormat::PNG,
			[0xff, 0xd8, 0xff, ..] => TileFormat::JPG,
			[b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => TileFormat::GIF,
			[b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => TileFormat::WEBP,
			// field 3 (layers), wire type 2
			[0x1a, ..] => TileFormat::MVT,
			_ => TileFormat::BIN,
		};
		(format, compression)
	}
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
