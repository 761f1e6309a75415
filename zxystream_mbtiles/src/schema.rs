//! Detection of the coordinate table of an MBTiles archive.
//!
//! MBTiles files come in two layouts:
//! - **de-duplicated**: `map (zoom_level, tile_column, tile_row, tile_id)` points into
//!   `images (tile_id, tile_data)`, and `tiles` is usually a view joining the two.
//! - **plain**: `tiles (zoom_level, tile_column, tile_row, tile_data)` holds every blob directly.
//!
//! [`detect_table`] prefers `map` as soon as one of its rows resolves to an image.

use anyhow::Result;
use r2d2_sqlite::rusqlite::{Connection, OptionalExtension};
use std::fmt::{self, Display};

/// The relation coordinates are read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
	/// `map` joined against `images`; rows without an image are skipped.
	Map,
	/// `tiles`; every row carries its blob.
	Tiles,
}

impl TableKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			TableKind::Map => "map",
			TableKind::Tiles => "tiles",
		}
	}
}

impl Display for TableKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Returns `true` if a table or view called `name` exists.
pub(crate) fn relation_exists(conn: &Connection, name: &str) -> Result<bool> {
	let sql = "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1";
	log::trace!("SQL: {sql} [{name}]");
	Ok(conn.query_row(sql, [name], |_| Ok(())).optional()?.is_some())
}

/// Decide which table holds the coordinates.
///
/// Falls back to [`TableKind::Tiles`] when `map`/`images` are missing or no `map` row resolves,
/// including archives without any tile table at all.
pub(crate) fn detect_table(conn: &Connection) -> Result<TableKind> {
	if !relation_exists(conn, "map")? || !relation_exists(conn, "images")? {
		return Ok(TableKind::Tiles);
	}

	let sql = "SELECT 1 FROM map JOIN images ON images.tile_id = map.tile_id LIMIT 1";
	log::trace!("SQL: {sql}");
	let resolvable = conn.query_row(sql, [], |_| Ok(())).optional()?.is_some();

	Ok(if resolvable { TableKind::Map } else { TableKind::Tiles })
}
