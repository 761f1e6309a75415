use crate::ArchiveError;
use anyhow::Result;
use serde::Deserialize;

/// Rows per page when nothing else is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Construction options of a [`ZxyStream`](crate::ZxyStream).
///
/// Deserializes from any serde format; missing fields keep their defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZxyStreamOptions {
	/// Maximum number of rows per page, and so per payload. Must be positive.
	pub batch: usize,
}

impl ZxyStreamOptions {
	pub fn with_batch(batch: usize) -> ZxyStreamOptions {
		ZxyStreamOptions { batch }
	}

	pub fn validate(&self) -> Result<()> {
		if self.batch == 0 {
			return Err(ArchiveError::InvalidBatchSize(self.batch).into());
		}
		Ok(())
	}
}

impl Default for ZxyStreamOptions {
	fn default() -> Self {
		ZxyStreamOptions {
			batch: DEFAULT_BATCH_SIZE,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let options = ZxyStreamOptions::default();
		assert_eq!(options.batch, 1000);
		assert!(options.validate().is_ok());
	}

	#[test]
	fn zero_batch_is_rejected() {
		let error = ZxyStreamOptions::with_batch(0).validate().unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::InvalidBatchSize(0))
		));
	}

	#[test]
	fn deserialize() {
		let options: ZxyStreamOptions = serde_yaml_ng::from_str("batch: 10").unwrap();
		assert_eq!(options, ZxyStreamOptions::with_batch(10));

		let options: ZxyStreamOptions = serde_yaml_ng::from_str("{}").unwrap();
		assert_eq!(options, ZxyStreamOptions::default());

		assert!(serde_yaml_ng::from_str::<ZxyStreamOptions>("batch: -1").is_err());
		assert!(serde_yaml_ng::from_str::<ZxyStreamOptions>("size: 10").is_err());
	}
}
