//! Fixture archives for tests.
//!
//! The builders write small MBTiles files in both layouts, storing rows in TMS order exactly as
//! real archives do:
//! - [`create_deduplicated`]: `map` + `images` with a `tiles` view, plus optional dangling `map`
//!   rows whose image is missing.
//! - [`create_plain`]: a single `tiles` table.
//! - [`create_blank`]: a valid SQLite file without any table.

use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::{SqliteConnectionManager, rusqlite::params};
use std::{fs::remove_file, path::Path};
use zxystream_core::TileCoord;

/// The first `count` coordinates of the tile pyramid, level by level, column by column.
///
/// Levels 0 to 3 hold 85 tiles, so e.g. `pyramid_coords(270)` also covers 185 tiles of level 4.
pub fn pyramid_coords(count: usize) -> Vec<TileCoord> {
	let mut coords = Vec::with_capacity(count);
	'levels: for level in 0..=zxystream_core::MAX_LEVEL {
		let size = 1u32 << level;
		for x in 0..size {
			for y in 0..size {
				if coords.len() == count {
					break 'levels;
				}
				coords.push(TileCoord { level, x, y });
			}
		}
	}
	coords
}

/// A PNG-signed payload unique to `coord`.
pub fn tile_payload(coord: &TileCoord) -> Vec<u8> {
	let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
	data.extend_from_slice(coord.to_string().as_bytes());
	data
}

fn open_fresh(path: &Path) -> Result<Pool<SqliteConnectionManager>> {
	if path.exists() {
		remove_file(path)?;
	}
	let manager = SqliteConnectionManager::file(path);
	Ok(Pool::builder().max_size(1).build(manager)?)
}

/// Write a de-duplicated archive.
///
/// Tiles in `coords` get an image each; `dangling` coordinates get a `map` row whose `tile_id`
/// has no image.
pub fn create_deduplicated(path: &Path, coords: &[TileCoord], dangling: &[TileCoord]) -> Result<()> {
	let pool = open_fresh(path)?;
	let mut conn = pool.get()?;
	conn.execute_batch(
		"CREATE TABLE metadata (name TEXT, value TEXT, UNIQUE (name));
		CREATE TABLE map (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_id TEXT);
		CREATE UNIQUE INDEX map_index ON map (zoom_level, tile_column, tile_row);
		CREATE TABLE images (tile_data BLOB, tile_id TEXT);
		CREATE UNIQUE INDEX images_id ON images (tile_id);
		CREATE VIEW tiles AS
			SELECT map.zoom_level AS zoom_level, map.tile_column AS tile_column, map.tile_row AS tile_row,
				images.tile_data AS tile_data
			FROM map JOIN images ON images.tile_id = map.tile_id;
		INSERT INTO metadata (name, value) VALUES ('format', 'png');",
	)?;

	let transaction = conn.transaction()?;
	for coord in coords {
		let tile_id = format!("img-{coord}");
		transaction.execute(
			"INSERT INTO images (tile_data, tile_id) VALUES (?1, ?2)",
			params![tile_payload(coord), tile_id],
		)?;
		transaction.execute(
			"INSERT INTO map (zoom_level, tile_column, tile_row, tile_id) VALUES (?1, ?2, ?3, ?4)",
			params![coord.level, coord.x, coord.tms_row(), tile_id],
		)?;
	}
	for coord in dangling {
		transaction.execute(
			"INSERT INTO map (zoom_level, tile_column, tile_row, tile_id) VALUES (?1, ?2, ?3, ?4)",
			params![coord.level, coord.x, coord.tms_row(), format!("missing-{coord}")],
		)?;
	}
	transaction.commit()?;
	Ok(())
}

/// Write a plain archive with one `tiles` row per coordinate.
pub fn create_plain(path: &Path, coords: &[TileCoord]) -> Result<()> {
	let pool = open_fresh(path)?;
	let mut conn = pool.get()?;
	conn.execute_batch(
		"CREATE TABLE metadata (name TEXT, value TEXT, UNIQUE (name));
		CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));
		INSERT INTO metadata (name, value) VALUES ('format', 'png');",
	)?;

	let transaction = conn.transaction()?;
	for coord in coords {
		transaction.execute(
			"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
			params![coord.level, coord.x, coord.tms_row(), tile_payload(coord)],
		)?;
	}
	transaction.commit()?;
	Ok(())
}

/// Write an SQLite file that contains no tables.
pub fn create_blank(path: &Path) -> Result<()> {
	let pool = open_fresh(path)?;
	// forces SQLite to write a header
	pool.get()?.execute_batch("PRAGMA user_version = 1;")?;
	Ok(())
}
