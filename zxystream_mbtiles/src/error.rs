use crate::TableKind;
use thiserror::Error;
use zxystream_core::TileCoord;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures raised by archives and coordinate streams.
///
/// Public functions return [`anyhow::Result`]; these variants sit at the root of the error so
/// callers can tell them apart with `error.downcast_ref::<ArchiveError>()`.
#[derive(Debug, Error)]
pub enum ArchiveError {
	/// The metadata query deciding between `map` and `tiles` failed.
	#[error("failed to detect the coordinate table of '{name}'")]
	SchemaDetection {
		name: String,
		#[source]
		source: BoxError,
	},

	/// A page query failed. The stream that issued it ends after reporting this.
	#[error("page query on table '{table}' failed")]
	StorageQuery {
		table: TableKind,
		#[source]
		source: BoxError,
	},

	#[error("tile {0} not found")]
	TileNotFound(TileCoord),

	#[error("batch size must be positive, got {0}")]
	InvalidBatchSize(usize),

	/// A stored row is out of range or repeats the key of the row before it.
	#[error("stored row {zoom}/{column}/{row} is not a valid tile coordinate")]
	CorruptRow { zoom: i64, column: i64, row: i64 },

	#[error("archive '{0}' is closed")]
	Closed(String),
}

impl ArchiveError {
	/// Keep an `ArchiveError` already at the root of `error`, otherwise wrap it with `wrap`.
	pub(crate) fn lift(error: anyhow::Error, wrap: impl FnOnce(BoxError) -> ArchiveError) -> anyhow::Error {
		match error.downcast::<ArchiveError>() {
			Ok(error) => error.into(),
			Err(error) => wrap(error.into()).into(),
		}
	}
}
