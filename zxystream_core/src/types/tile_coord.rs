//! Tile coordinates in the XYZ scheme
//!
//! [`TileCoord`] addresses one tile by zoom `level`, column `x` and row `y`, with `y` counted from
//! the north edge (XYZ / "slippy map" addressing). Archives that store rows counted from the south
//! (TMS) convert with [`TileCoord::from_tms`] and [`TileCoord::tms_row`].
//!
//! The text form is `"<z>/<x>/<y>"`:
//!
//! ```
//! use zxystream_core::TileCoord;
//!
//! let coord: TileCoord = "3/1/2".parse().unwrap();
//! assert_eq!(coord, TileCoord::new(3, 1, 2).unwrap());
//! assert_eq!(coord.to_string(), "3/1/2");
//! assert_eq!(coord.tms_row(), 5);
//! ```

use anyhow::{Context, Error, Result, ensure};
use std::{
	fmt::{self, Debug, Display},
	str::FromStr,
};

/// The highest zoom level a coordinate may carry.
pub const MAX_LEVEL: u8 = 31;

/// A tile coordinate with zoom level, x and y indices.
///
/// Ordering is lexicographic by `level`, then `x`, then `y`.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Copy)]
pub struct TileCoord {
	/// The zoom level of the tile.
	pub level: u8,
	/// The x index (column) of the tile.
	pub x: u32,
	/// The y index (row, counted from the north) of the tile.
	pub y: u32,
}

impl TileCoord {
	/// Create a new `TileCoord` at the given zoom `level` and tile indices `x`, `y`.
	///
	/// # Errors
	/// Returns an error if `level` > 31 or if `x`/`y` do not fit into the grid of `level`.
	pub fn new(level: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(level <= MAX_LEVEL, "level ({level}) must be <= {MAX_LEVEL}");
		let max = 1u64 << level;
		ensure!(u64::from(x) < max, "x ({x}) out of bounds for level {level}");
		ensure!(u64::from(y) < max, "y ({y}) out of bounds for level {level}");
		Ok(TileCoord { level, x, y })
	}

	/// Create a `TileCoord` from a TMS row (counted from the south), flipping it to XYZ.
	///
	/// ```
	/// use zxystream_core::TileCoord;
	///
	/// let coord = TileCoord::from_tms(2, 1, 0).unwrap();
	/// assert_eq!(coord.y, 3);
	/// ```
	pub fn from_tms(level: u8, x: u32, tms_row: u32) -> Result<TileCoord> {
		ensure!(level <= MAX_LEVEL, "level ({level}) must be <= {MAX_LEVEL}");
		let max_value = max_index(level);
		ensure!(tms_row <= max_value, "row ({tms_row}) out of bounds for level {level}");
		TileCoord::new(level, x, max_value - tms_row)
	}

	/// Returns `2^level - 1`, the largest valid x or y at this level.
	#[must_use]
	pub fn max_value(&self) -> u32 {
		max_index(self.level)
	}

	/// The row index in TMS addressing, as stored in MBTiles.
	#[must_use]
	pub fn tms_row(&self) -> u32 {
		self.max_value() - self.y
	}
}

fn max_index(level: u8) -> u32 {
	((1u64 << level) - 1) as u32
}

/// Formats as `z/x/y`.
impl Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.level, self.x, self.y)
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, [{}, {}])", &self.level, &self.x, &self.y))
	}
}

/// Parses `z/x/y`.
impl FromStr for TileCoord {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let mut parts = s.trim().split('/');
		let mut next = |name: &str| {
			parts
				.next()
				.with_context(|| format!("missing {name} in tile coordinate '{s}'"))
		};
		let level = next("z")?.parse::<u8>().with_context(|| format!("invalid z in '{s}'"))?;
		let x = next("x")?.parse::<u32>().with_context(|| format!("invalid x in '{s}'"))?;
		let y = next("y")?.parse::<u32>().with_context(|| format!("invalid y in '{s}'"))?;
		ensure!(parts.next().is_none(), "too many parts in tile coordinate '{s}'");
		TileCoord::new(level, x, y)
	}
}
