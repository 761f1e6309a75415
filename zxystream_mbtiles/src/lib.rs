//! Stream the tile coordinates of MBTiles archives in batches.
//!
//! Open an archive with [`MBTilesArchive::open_path`], create a [`ZxyStream`] with
//! [`MBTilesArchive::zxy_stream`] and consume it as a `futures::Stream` of newline-separated
//! `z/x/y` payloads. Every coordinate in a payload can be fetched with
//! [`MBTilesArchive::get_tile`].

mod archive;
mod error;
mod page;
mod schema;
mod stream;
#[cfg(any(test, feature = "test"))]
pub mod testing;

pub use archive::{MBTilesArchive, TileHeaders};
pub use error::ArchiveError;
pub use page::{CoordRow, Page, PageSource, RowKey};
pub use schema::TableKind;
pub use stream::{DEFAULT_BATCH_SIZE, StreamState, ZxyStream, ZxyStreamOptions, parse_payload};
pub use zxystream_core::{Blob, TileCompression, TileCoord, TileFormat};
