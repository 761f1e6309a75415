//! This module provides the [`Blob`] struct, an owned tile payload as read from an archive.
//!
//! # Examples
//!
//! ```rust
//! use zxystream_core::Blob;
//!
//! let blob = Blob::from(vec![0x89, 0x50, 0x4E, 0x47]);
//! assert_eq!(blob.len(), 4);
//! assert_eq!(blob.as_slice(), &[0x89, 0x50, 0x4E, 0x47]);
//! ```

use std::fmt::Debug;

/// A wrapper around [`Vec<u8>`] holding the raw bytes of one tile.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	#[must_use]
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Returns the bytes as a slice.
	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Consumes the `Blob` and returns the underlying vector.
	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	/// Returns the number of bytes.
	#[must_use]
	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns the bytes as lowercase hex, separated by spaces.
	#[must_use]
	pub fn as_hex(&self) -> String {
		self
			.0
			.iter()
			.map(|b| format!("{b:02x}"))
			.collect::<Vec<_>>()
			.join(" ")
	}
}

impl From<Vec<u8>> for Blob {
	fn from(item: Vec<u8>) -> Self {
		Blob(item)
	}
}

impl From<&[u8]> for Blob {
	fn from(item: &[u8]) -> Self {
		Blob(item.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for Blob {
	fn from(item: &[u8; N]) -> Self {
		Blob(item.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(item: &str) -> Self {
		Blob(item.as_bytes().to_vec())
	}
}

/// Prints the length and, for short payloads, the bytes as hex.
impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.0.len() <= 16 {
			write!(f, "Blob({}): {}", self.0.len(), self.as_hex())
		} else {
			write!(f, "Blob({})", self.0.len())
		}
	}
}
