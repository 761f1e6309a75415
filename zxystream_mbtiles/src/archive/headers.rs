use anyhow::Result;
use std::{fs::Metadata, time::UNIX_EPOCH};
use time::{OffsetDateTime, UtcOffset, macros::format_description};
use zxystream_core::TileFormat;

/// HTTP headers describing a tile fetched from an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileHeaders {
	pub content_type: &'static str,
	pub content_encoding: Option<&'static str>,
	/// Modification time of the archive file as an HTTP date.
	pub last_modified: String,
	/// `"<file size>-<mtime in ms>"`, shared by every tile of one archive version.
	pub etag: String,
}

impl TileHeaders {
	pub(crate) fn new(data: &[u8], file: &FileStamp) -> TileHeaders {
		let (format, compression) = TileFormat::sniff(data);
		TileHeaders {
			content_type: format.as_mime_str(),
			content_encoding: compression.content_encoding(),
			last_modified: file.last_modified.clone(),
			etag: file.etag.clone(),
		}
	}

	/// The headers as name/value pairs.
	pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
		let mut pairs = vec![("Content-Type", self.content_type.to_string())];
		if let Some(encoding) = self.content_encoding {
			pairs.push(("Content-Encoding", encoding.to_string()));
		}
		pairs.push(("Last-Modified", self.last_modified.clone()));
		pairs.push(("ETag", self.etag.clone()));
		pairs
	}
}

/// Size and modification time of an archive file, captured when it is opened.
#[derive(Clone, Debug)]
pub(crate) struct FileStamp {
	last_modified: String,
	etag: String,
}

impl FileStamp {
	pub(crate) fn from_metadata(metadata: &Metadata) -> Result<FileStamp> {
		let modified = metadata.modified()?;
		let millis = modified.duration_since(UNIX_EPOCH)?.as_millis();
		Ok(FileStamp {
			last_modified: http_date(OffsetDateTime::from(modified))?,
			etag: format!("\"{}-{}\"", metadata.len(), millis),
		})
	}
}

fn http_date(time: OffsetDateTime) -> Result<String> {
	let format = format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");
	Ok(time.to_offset(UtcOffset::UTC).format(&format)?)
}
