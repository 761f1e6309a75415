//! Keyset pagination over the coordinate table.
//!
//! A page is read with
//!
//! ```sql
//! SELECT zoom_level, tile_column, tile_row, <resolvable>
//! FROM <table>
//! WHERE (zoom_level, tile_column, tile_row) > (?1, ?2, ?3)   -- omitted for the first page
//! ORDER BY zoom_level, tile_column, tile_row
//! LIMIT ?4
//! ```
//!
//! Rows of `map` whose `tile_id` has no entry in `images` are returned with `resolvable = false`.
//! They still count toward the page length, which decides whether another page follows.

use crate::{ArchiveError, TableKind, schema::relation_exists};
use anyhow::Result;
use r2d2_sqlite::rusqlite::{Connection, Row, params_from_iter, types::Value};
use zxystream_core::TileCoord;

/// A coordinate table key exactly as stored: zoom, column and TMS row.
///
/// Pagination compares these lexicographically, matching the `ORDER BY` of the page query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
	pub zoom: u8,
	pub column: u32,
	pub row: u32,
}

impl RowKey {
	/// Validate raw column values read from SQLite.
	pub fn try_from_raw(zoom: i64, column: i64, row: i64) -> Result<RowKey> {
		let corrupt = || ArchiveError::CorruptRow { zoom, column, row };
		let key = RowKey {
			zoom: u8::try_from(zoom).map_err(|_| corrupt())?,
			column: u32::try_from(column).map_err(|_| corrupt())?,
			row: u32::try_from(row).map_err(|_| corrupt())?,
		};
		key.to_coord().map_err(|_| corrupt())?;
		Ok(key)
	}

	/// The XYZ coordinate of this row.
	pub fn to_coord(&self) -> Result<TileCoord> {
		TileCoord::from_tms(self.zoom, self.column, self.row)
	}
}

impl From<RowKey> for ArchiveError {
	fn from(key: RowKey) -> Self {
		ArchiveError::CorruptRow {
			zoom: i64::from(key.zoom),
			column: i64::from(key.column),
			row: i64::from(key.row),
		}
	}
}

impl From<TileCoord> for RowKey {
	fn from(coord: TileCoord) -> Self {
		RowKey {
			zoom: coord.level,
			column: coord.x,
			row: coord.tms_row(),
		}
	}
}

/// One row of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordRow {
	pub key: RowKey,
	pub coord: TileCoord,
	/// `false` for `map` rows pointing at a missing image.
	pub resolvable: bool,
}

impl CoordRow {
	pub fn new(key: RowKey, resolvable: bool) -> Result<CoordRow> {
		Ok(CoordRow {
			key,
			coord: key.to_coord()?,
			resolvable,
		})
	}
}

/// The rows returned by one page query, in ascending key order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
	rows: Vec<CoordRow>,
}

impl Page {
	pub fn new(rows: Vec<CoordRow>) -> Page {
		Page { rows }
	}

	/// Number of rows returned by the query, resolvable or not.
	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Key of the last row, the lower bound of the next page.
	pub fn last_key(&self) -> Option<RowKey> {
		self.rows.last().map(|r| r.key)
	}

	pub fn rows(&self) -> &[CoordRow] {
		&self.rows
	}

	/// Coordinates whose tile can be fetched.
	pub fn resolvable(&self) -> impl Iterator<Item = TileCoord> + '_ {
		self.rows.iter().filter(|r| r.resolvable).map(|r| r.coord)
	}
}

/// Something coordinate pages can be read from.
///
/// All methods block; streams call them from the blocking thread pool.
pub trait PageSource: Clone + Send + Sync + Unpin + 'static {
	/// Name used in logs and errors.
	fn name(&self) -> &str;

	/// Decide which table to enumerate.
	fn detect_table(&self) -> Result<TableKind>;

	/// Read up to `limit` rows with a key strictly greater than `after`.
	fn query_page(&self, table: TableKind, after: Option<RowKey>, limit: usize) -> Result<Page>;
}

fn page_sql(table: TableKind, has_cursor: bool) -> String {
	let (columns, from) = match table {
		TableKind::Map => (
			"map.zoom_level, map.tile_column, map.tile_row, \
			EXISTS (SELECT 1 FROM images WHERE images.tile_id = map.tile_id)",
			"map",
		),
		TableKind::Tiles => ("zoom_level, tile_column, tile_row, 1", "tiles"),
	};
	let key = format!("{from}.zoom_level, {from}.tile_column, {from}.tile_row");
	let mut sql = format!("SELECT {columns} FROM {from}");
	if has_cursor {
		sql.push_str(&format!(" WHERE ({key}) > (?, ?, ?)"));
	}
	sql.push_str(&format!(" ORDER BY {key} LIMIT ?"));
	sql
}

fn read_row(row: &Row) -> Result<CoordRow> {
	let key = RowKey::try_from_raw(row.get(0)?, row.get(1)?, row.get(2)?)?;
	CoordRow::new(key, row.get::<_, bool>(3)?)
}

/// Run one page query on `conn`.
///
/// A missing `tiles` relation reads as an empty archive.
pub(crate) fn query_page(conn: &Connection, table: TableKind, after: Option<RowKey>, limit: usize) -> Result<Page> {
	let sql = page_sql(table, after.is_some());
	log::trace!("SQL: {sql} [after {after:?}, limit {limit}]");

	let mut stmt = match conn.prepare_cached(&sql) {
		Ok(stmt) => stmt,
		Err(error) => {
			if table == TableKind::Tiles && !relation_exists(conn, "tiles")? {
				log::debug!("archive has no 'tiles' relation, reading it as empty");
				return Ok(Page::default());
			}
			return Err(error.into());
		}
	};

	let mut values: Vec<Value> = Vec::with_capacity(4);
	if let Some(key) = after {
		values.push(Value::Integer(i64::from(key.zoom)));
		values.push(Value::Integer(i64::from(key.column)));
		values.push(Value::Integer(i64::from(key.row)));
	}
	values.push(Value::Integer(i64::try_from(limit)?));

	let mut rows = stmt.query(params_from_iter(values))?;
	let mut page: Vec<CoordRow> = Vec::with_capacity(limit.min(4096));
	while let Some(row) = rows.next()? {
		let row = read_row(row)?;
		// duplicate keys are possible in tables without a unique index
		if let Some(previous) = page.last()
			&& previous.key >= row.key
		{
			return Err(ArchiveError::from(row.key).into());
		}
		page.push(row);
	}

	log::trace!("got {} rows from '{table}'", page.len());
	Ok(Page::new(page))
}
