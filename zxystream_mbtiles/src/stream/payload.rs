//! The text format of stream payloads: one `z/x/y` line per tile, each terminated by `\n`.

use anyhow::Result;
use zxystream_core::TileCoord;

/// Serialize coordinates into one payload.
pub(crate) fn write_payload(coords: impl Iterator<Item = TileCoord>) -> String {
	let mut payload = String::new();
	for coord in coords {
		payload.push_str(&coord.to_string());
		payload.push('\n');
	}
	payload
}

/// Parse the coordinates of a payload, skipping empty lines.
///
/// ```
/// use zxystream_mbtiles::parse_payload;
///
/// let coords = parse_payload("0/0/0\n1/1/0\n").collect::<anyhow::Result<Vec<_>>>().unwrap();
/// assert_eq!(coords.len(), 2);
/// assert_eq!(coords[1].to_string(), "1/1/0");
/// ```
pub fn parse_payload(payload: &str) -> impl Iterator<Item = Result<TileCoord>> + '_ {
	payload.split('\n').filter(|line| !line.is_empty()).map(|line| line.parse::<TileCoord>())
}
