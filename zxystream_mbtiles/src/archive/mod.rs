//! Read-only access to an MBTiles (SQLite) archive.
//!
//! [`MBTilesArchive`] is a cheaply cloneable handle around an `r2d2` pool of read-only SQLite
//! connections. It detects the coordinate table, answers page queries for
//! [`ZxyStream`](crate::ZxyStream) and fetches single tiles by XYZ coordinate.
//!
//! ## Usage
//! ```rust,no_run
//! use anyhow::Result;
//! use futures::StreamExt;
//! use std::path::Path;
//! use zxystream_mbtiles::{MBTilesArchive, ZxyStreamOptions, parse_payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let archive = MBTilesArchive::open_path(Path::new("/absolute/path/to/plain_2.mbtiles"))?;
//!
//!     let mut stream = archive.zxy_stream(ZxyStreamOptions::default()).await?;
//!     while let Some(payload) = stream.next().await {
//!         for coord in parse_payload(&payload?) {
//!             let (blob, headers) = archive.get_tile(&coord?)?;
//!             println!("{} bytes of {}", blob.len(), headers.content_type);
//!         }
//!     }
//!
//!     archive.close()
//! }
//! ```

mod headers;

pub use headers::TileHeaders;

use crate::{ArchiveError, Page, PageSource, RowKey, TableKind, ZxyStream, ZxyStreamOptions, page, schema};
use anyhow::{Context, Result, ensure};
use headers::FileStamp;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{OpenFlags, OptionalExtension},
};
use std::{
	fmt::Debug,
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
use zxystream_core::{Blob, TileCoord};

/// Handle to an open MBTiles archive.
///
/// Clones share one connection pool, released by [`MBTilesArchive::close`].
#[derive(Clone)]
pub struct MBTilesArchive {
	inner: Arc<Inner>,
}

struct Inner {
	name: String,
	path: PathBuf,
	pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
	stamp: FileStamp,
	in_flight: AtomicUsize,
}

impl MBTilesArchive {
	/// Open an MBTiles database from an **absolute** filesystem path.
	///
	/// # Errors
	/// Returns an error if the file does not exist, the path is not absolute, or SQLite cannot open it.
	pub fn open_path(path: &Path) -> Result<MBTilesArchive> {
		log::debug!("open {path:?}");

		ensure!(path.exists(), "file {path:?} does not exist");
		ensure!(path.is_absolute(), "path {path:?} must be absolute");

		MBTilesArchive::load_from_sqlite(path).with_context(|| format!("opening MBTiles at '{}'", path.display()))
	}

	fn load_from_sqlite(path: &Path) -> Result<MBTilesArchive> {
		let stamp = FileStamp::from_metadata(&path.metadata()?)?;
		let manager = SqliteConnectionManager::file(path)
			.with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
		let pool = Pool::builder().max_size(10).build(manager)?;

		Ok(MBTilesArchive {
			inner: Arc::new(Inner {
				name: path.to_string_lossy().into_owned(),
				path: path.to_path_buf(),
				pool: Mutex::new(Some(pool)),
				stamp,
				in_flight: AtomicUsize::new(0),
			}),
		})
	}

	pub fn path(&self) -> &Path {
		&self.inner.path
	}

	/// `true` if both handles share the same pool.
	pub fn same_archive(&self, other: &MBTilesArchive) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn is_closed(&self) -> bool {
		self.inner.pool.lock().is_none()
	}

	/// Number of page queries currently executing.
	pub fn queries_in_flight(&self) -> usize {
		self.inner.in_flight.load(Ordering::SeqCst)
	}

	/// Create a coordinate stream over this archive. See [`ZxyStream::new`].
	pub async fn zxy_stream(&self, options: ZxyStreamOptions) -> Result<ZxyStream<MBTilesArchive>> {
		ZxyStream::new(self.clone(), options).await
	}

	/// Fetch the tile at `coord` together with its HTTP headers.
	///
	/// Reads through the `tiles` relation, which de-duplicated archives provide as a view.
	///
	/// # Errors
	/// Fails with [`ArchiveError::TileNotFound`] if no tile is stored at `coord`.
	pub fn get_tile(&self, coord: &TileCoord) -> Result<(Blob, TileHeaders)> {
		log::trace!("read tile from coord {coord:?}");

		let conn = self.connection()?;
		let mut stmt =
			conn.prepare_cached("SELECT tile_data FROM tiles WHERE zoom_level = ? AND tile_column = ? AND tile_row = ?")?;
		let data = stmt
			.query_row([u32::from(coord.level), coord.x, coord.tms_row()], |row| {
				row.get::<_, Vec<u8>>(0)
			})
			.optional()
			.with_context(|| format!("fetching tile {coord} from '{}'", self.inner.name))?
			.ok_or(ArchiveError::TileNotFound(*coord))?;

		let headers = TileHeaders::new(&data, &self.inner.stamp);
		Ok((Blob::from(data), headers))
	}

	/// Close the archive and release its connection pool.
	///
	/// Page queries still executing, e.g. of a cancelled stream, finish on the connection they
	/// hold; that connection is closed when they return. Afterwards every operation on any clone of
	/// this handle fails with [`ArchiveError::Closed`]. Closing twice is a no-op.
	pub fn close(&self) -> Result<()> {
		let Some(pool) = self.inner.pool.lock().take() else {
			return Ok(());
		};
		let running = self.queries_in_flight();
		if running > 0 {
			log::debug!("closing '{}' with {running} queries still running", self.inner.name);
		}
		drop(pool);
		log::debug!("closed '{}'", self.inner.name);
		Ok(())
	}

	fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
		// clone the pool so the lock is not held while waiting for a connection
		let pool = self.inner.pool.lock().clone();
		let Some(pool) = pool else {
			return Err(ArchiveError::Closed(self.inner.name.clone()).into());
		};
		Ok(pool.get()?)
	}
}

impl PageSource for MBTilesArchive {
	fn name(&self) -> &str {
		&self.inner.name
	}

	fn detect_table(&self) -> Result<TableKind> {
		let conn = self.connection()?;
		let table = schema::detect_table(&conn)?;
		log::debug!("'{}' enumerates coordinates from '{table}'", self.inner.name);
		Ok(table)
	}

	fn query_page(&self, table: TableKind, after: Option<RowKey>, limit: usize) -> Result<Page> {
		let _guard = InFlight::enter(&self.inner);
		let conn = self.connection()?;
		page::query_page(&conn, table, after, limit)
	}
}

/// Counts a page query as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
	fn enter(inner: &'a Inner) -> InFlight<'a> {
		inner.in_flight.fetch_add(1, Ordering::SeqCst);
		InFlight(&inner.in_flight)
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

impl Debug for MBTilesArchive {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesArchive")
			.field("name", &self.inner.name)
			.field("closed", &self.is_closed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_blank, create_deduplicated, create_plain, pyramid_coords, tile_payload};
	use assert_fs::TempDir;

	fn temp_path(dir: &TempDir, name: &str) -> PathBuf {
		dir.path().join(name)
	}

	#[test]
	fn open_requires_existing_absolute_path() {
		let error = MBTilesArchive::open_path(Path::new("/does/not/exist.mbtiles")).unwrap_err();
		assert!(error.to_string().contains("does not exist"));

		assert!(MBTilesArchive::open_path(Path::new("relative.mbtiles")).is_err());
	}

	#[test]
	fn get_tile_from_plain_archive() -> Result<()> {
		let dir = TempDir::new()?;
		let path = temp_path(&dir, "plain.mbtiles");
		let coords = pyramid_coords(21);
		create_plain(&path, &coords)?;

		let archive = MBTilesArchive::open_path(&path)?;
		assert_eq!(archive.detect_table()?, TableKind::Tiles);
		for coord in &coords {
			let (blob, headers) = archive.get_tile(coord)?;
			assert_eq!(blob.as_slice(), tile_payload(coord).as_slice());
			assert_eq!(headers.content_type, "image/png");
			assert_eq!(headers.content_encoding, None);
			assert!(headers.etag.starts_with('"'));
		}
		Ok(())
	}

	#[test]
	fn get_tile_through_map_view() -> Result<()> {
		let dir = TempDir::new()?;
		let path = temp_path(&dir, "dedup.mbtiles");
		let coords = pyramid_coords(5);
		create_deduplicated(&path, &coords[..4], &coords[4..])?;

		let archive = MBTilesArchive::open_path(&path)?;
		assert_eq!(archive.detect_table()?, TableKind::Map);
		assert_eq!(archive.get_tile(&coords[0])?.0.as_slice(), tile_payload(&coords[0]).as_slice());

		let error = archive.get_tile(&coords[4]).unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::TileNotFound(c)) if *c == coords[4]
		));
		Ok(())
	}

	#[test]
	fn blank_archive() -> Result<()> {
		let dir = TempDir::new()?;
		let path = temp_path(&dir, "blank.mbtiles");
		create_blank(&path)?;

		let archive = MBTilesArchive::open_path(&path)?;
		assert_eq!(archive.detect_table()?, TableKind::Tiles);
		assert!(archive.query_page(TableKind::Tiles, None, 10)?.is_empty());
		assert!(archive.get_tile(&TileCoord::new(0, 0, 0)?).is_err());
		Ok(())
	}

	#[test]
	fn close_twice_and_use_after_close() -> Result<()> {
		let dir = TempDir::new()?;
		let path = temp_path(&dir, "plain.mbtiles");
		create_plain(&path, &pyramid_coords(1))?;

		let archive = MBTilesArchive::open_path(&path)?;
		let clone = archive.clone();
		assert!(archive.same_archive(&clone));
		assert!(!archive.same_archive(&MBTilesArchive::open_path(&path)?));

		archive.close()?;
		archive.close()?;
		assert!(clone.is_closed());
		assert_eq!(format!("{clone:?}"), format!("MBTilesArchive {{ name: {:?}, closed: true }}", path.to_string_lossy()));

		for error in [
			clone.get_tile(&TileCoord::new(0, 0, 0)?).unwrap_err(),
			clone.detect_table().unwrap_err(),
			clone.query_page(TableKind::Tiles, None, 1).unwrap_err(),
		] {
			assert!(matches!(error.downcast_ref::<ArchiveError>(), Some(ArchiveError::Closed(_))));
		}
		assert_eq!(clone.queries_in_flight(), 0);
		Ok(())
	}

	#[test]
	fn close_while_a_query_runs() -> Result<()> {
		let dir = TempDir::new()?;
		let path = temp_path(&dir, "plain.mbtiles");
		create_plain(&path, &pyramid_coords(5))?;
		let archive = MBTilesArchive::open_path(&path)?;

		let guard = InFlight::enter(&archive.inner);
		let conn = archive.connection()?;
		archive.close()?;
		assert!(archive.is_closed());
		assert_eq!(archive.queries_in_flight(), 1);

		// the running query keeps its connection until it returns
		assert_eq!(page::query_page(&conn, TableKind::Tiles, None, 10)?.len(), 5);
		drop(conn);
		drop(guard);

		let error = archive.query_page(TableKind::Tiles, None, 10).unwrap_err();
		assert!(matches!(error.downcast_ref::<ArchiveError>(), Some(ArchiveError::Closed(_))));
		assert_eq!(archive.queries_in_flight(), 0);
		Ok(())
	}
}
