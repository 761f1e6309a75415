//! Batched, pull-driven enumeration of every tile coordinate in an archive
//!
//! [`ZxyStream`] walks the coordinate table with keyset pagination: each page is the next `batch`
//! rows after the last key of the previous page, in `(zoom_level, tile_column, tile_row)` order.
//! Every page becomes one payload of `z/x/y` lines (see [`parse_payload`]).
//!
//! # Backpressure
//!
//! A page query is only started from `poll_next`, that is when the consumer asks for the next
//! payload, and at most one query is in flight. Queries run on Tokio's blocking pool.
//!
//! # Life cycle
//!
//! ```text
//! Idle ─▶ Fetching ─▶ Emitting ─▶ Fetching ─▶ … ─▶ Drained ─▶ Closed
//!             │            │
//!             └─ close() ──┴──▶ Closed          any query failure ─▶ Errored
//! ```
//!
//! The stream ends after a page shorter than `batch`. Whether another page follows depends on the
//! number of rows the query returned, including `map` rows that were filtered out because their
//! image is missing.

mod options;
mod payload;

pub use options::{DEFAULT_BATCH_SIZE, ZxyStreamOptions};
pub use payload::parse_payload;

use crate::{ArchiveError, MBTilesArchive, Page, PageSource, RowKey, TableKind};
use anyhow::{Context as _, Result};
use futures::{Stream, stream::FusedStream};
use payload::write_payload;
use std::{
	fmt::{self, Debug, Display},
	future::Future,
	pin::Pin,
	task::{Context, Poll, ready},
};
use tokio::{runtime::Handle, task::JoinHandle};

/// Where a [`ZxyStream`] is in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
	/// Created, nothing fetched yet.
	Idle,
	/// A page query is in flight.
	Fetching,
	/// A payload was handed out and the last page was full.
	Emitting,
	/// The last page was short; the next poll ends the stream.
	Drained,
	/// Ended normally or cancelled.
	Closed,
	/// A query failed.
	Errored,
}

impl StreamState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, StreamState::Closed | StreamState::Errored)
	}
}

impl Display for StreamState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			StreamState::Idle => "idle",
			StreamState::Fetching => "fetching",
			StreamState::Emitting => "emitting",
			StreamState::Drained => "drained",
			StreamState::Closed => "closed",
			StreamState::Errored => "errored",
		})
	}
}

/// A one-pass stream of coordinate batches.
///
/// Yields `Ok(payload)` per non-empty page, or a single `Err` when a query fails, after which
/// it ends. Not restartable: create a new stream to enumerate again.
pub struct ZxyStream<S: PageSource = MBTilesArchive> {
	source: S,
	table: TableKind,
	batch: usize,
	cursor: Option<RowKey>,
	state: StreamState,
	pending: Option<JoinHandle<Result<Page>>>,
	runtime: Handle,
	payloads: usize,
	rows: usize,
}

impl<S: PageSource> ZxyStream<S> {
	/// Detect the coordinate table of `source` and create a stream over it.
	///
	/// Detection runs once here; nothing else is queried until the stream is polled.
	///
	/// # Errors
	/// Fails with [`ArchiveError::InvalidBatchSize`] for a zero batch and with
	/// [`ArchiveError::SchemaDetection`] if detection fails. Must be called within a Tokio runtime.
	pub async fn new(source: S, options: ZxyStreamOptions) -> Result<ZxyStream<S>> {
		options.validate()?;
		let runtime = Handle::try_current().context("coordinate streams need a Tokio runtime")?;

		let detector = source.clone();
		let table = runtime
			.spawn_blocking(move || detector.detect_table())
			.await
			.map_err(anyhow::Error::from)
			.and_then(|result| result)
			.map_err(|error| {
				ArchiveError::lift(error, |cause| ArchiveError::SchemaDetection {
					name: source.name().to_string(),
					source: cause,
				})
			})?;

		log::debug!(
			"created zxy stream over '{}' (table '{table}', batch {})",
			source.name(),
			options.batch
		);

		Ok(ZxyStream {
			source,
			table,
			batch: options.batch,
			cursor: None,
			state: StreamState::Idle,
			pending: None,
			runtime,
			payloads: 0,
			rows: 0,
		})
	}

	/// The archive this stream reads from.
	pub fn source(&self) -> &S {
		&self.source
	}

	/// The table chosen by schema detection.
	pub fn table(&self) -> TableKind {
		self.table
	}

	/// Maximum number of rows per page.
	pub fn batch(&self) -> usize {
		self.batch
	}

	/// Current life cycle state.
	pub fn state(&self) -> StreamState {
		self.state
	}

	/// Key of the last row read so far.
	pub fn cursor(&self) -> Option<RowKey> {
		self.cursor
	}

	/// Stop the stream.
	///
	/// A query already in flight finishes on its thread but its page is discarded. Further polls
	/// return `None`. Has no effect on a stream that already ended.
	pub fn close(&mut self) {
		if self.state.is_terminal() {
			return;
		}
		if self.pending.take().is_some() {
			log::debug!("discarding in-flight page of '{}'", self.source.name());
		}
		log::debug!(
			"zxy stream over '{}' cancelled in state {} after {} payloads",
			self.source.name(),
			self.state,
			self.payloads
		);
		self.state = StreamState::Closed;
	}

	fn fetch_next(&mut self) {
		let source = self.source.clone();
		let (table, after, limit) = (self.table, self.cursor, self.batch);
		self.pending = Some(
			self
				.runtime
				.spawn_blocking(move || source.query_page(table, after, limit)),
		);
		self.state = StreamState::Fetching;
	}

	/// Advance the cursor past `page` and serialize its resolvable rows.
	///
	/// A page that does not start after the cursor would repeat rows forever and fails.
	fn accept(&mut self, page: Page) -> Result<Option<String>> {
		if let (Some(cursor), Some(first)) = (self.cursor, page.rows().first())
			&& first.key <= cursor
		{
			return Err(ArchiveError::from(first.key).into());
		}
		if let Some(key) = page.last_key() {
			self.cursor = Some(key);
		}

		self.state = if page.len() >= self.batch {
			StreamState::Emitting
		} else {
			StreamState::Drained
		};

		let lines = page.resolvable().count();
		log::trace!("page of {} rows, {lines} resolvable", page.len());
		if lines == 0 {
			return Ok(None);
		}

		self.payloads += 1;
		self.rows += lines;
		Ok(Some(write_payload(page.resolvable())))
	}

	fn fail(&mut self, error: anyhow::Error) -> anyhow::Error {
		self.state = StreamState::Errored;
		let table = self.table;
		let error = ArchiveError::lift(error, |source| ArchiveError::StorageQuery { table, source });
		log::debug!("zxy stream over '{}' failed: {error:#}", self.source.name());
		error
	}
}

impl<S: PageSource> Stream for ZxyStream<S> {
	type Item = Result<String>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		loop {
			match this.state {
				StreamState::Idle | StreamState::Emitting => this.fetch_next(),
				StreamState::Fetching => {
					let Some(pending) = this.pending.as_mut() else {
						this.fetch_next();
						continue;
					};
					let joined = ready!(Pin::new(pending).poll(cx));
					this.pending = None;

					let accepted = joined
						.map_err(anyhow::Error::from)
						.and_then(|result| result)
						.and_then(|page| this.accept(page));
					match accepted {
						Ok(Some(payload)) => return Poll::Ready(Some(Ok(payload))),
						Ok(None) => {}
						Err(error) => return Poll::Ready(Some(Err(this.fail(error)))),
					}
				}
				StreamState::Drained => {
					log::debug!(
						"zxy stream over '{}' finished: {} rows in {} payloads",
						this.source.name(),
						this.rows,
						this.payloads
					);
					this.state = StreamState::Closed;
					return Poll::Ready(None);
				}
				StreamState::Closed | StreamState::Errored => return Poll::Ready(None),
			}
		}
	}
}

impl<S: PageSource> FusedStream for ZxyStream<S> {
	fn is_terminated(&self) -> bool {
		self.state.is_terminal()
	}
}

impl<S: PageSource> Debug for ZxyStream<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ZxyStream")
			.field("source", &self.source.name())
			.field("table", &self.table)
			.field("batch", &self.batch)
			.field("state", &self.state)
			.field("cursor", &self.cursor)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{CoordRow, testing::pyramid_coords};
	use anyhow::bail;
	use futures::{FutureExt, StreamExt};
	use rstest::rstest;
	use std::sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
		mpsc::{Receiver, channel},
	};

	/// In-memory page source counting its queries.
	#[derive(Clone)]
	struct MockSource {
		rows: Arc<Vec<CoordRow>>,
		queries: Arc<AtomicUsize>,
		fail_on_query: Option<usize>,
		fail_detection: bool,
		ignore_cursor: bool,
		gate: Option<Arc<Mutex<Receiver<()>>>>,
	}

	impl MockSource {
		fn new(rows: Vec<CoordRow>) -> MockSource {
			MockSource {
				rows: Arc::new(rows),
				queries: Arc::new(AtomicUsize::new(0)),
				fail_on_query: None,
				fail_detection: false,
				ignore_cursor: false,
				gate: None,
			}
		}

		/// `count` resolvable rows.
		fn resolvable(count: usize) -> MockSource {
			MockSource::with_flags(&vec![true; count])
		}

		/// One row per flag in key order, `false` marking a row without image.
		fn with_flags(flags: &[bool]) -> MockSource {
			let mut keys: Vec<RowKey> = pyramid_coords(flags.len()).into_iter().map(RowKey::from).collect();
			keys.sort();
			let rows = keys
				.into_iter()
				.zip(flags)
				.map(|(key, resolvable)| CoordRow::new(key, *resolvable).unwrap())
				.collect();
			MockSource::new(rows)
		}

		fn queries(&self) -> usize {
			self.queries.load(Ordering::SeqCst)
		}
	}

	impl PageSource for MockSource {
		fn name(&self) -> &str {
			"mock"
		}

		fn detect_table(&self) -> Result<TableKind> {
			if self.fail_detection {
				bail!("file is not a database");
			}
			Ok(TableKind::Map)
		}

		fn query_page(&self, _table: TableKind, after: Option<RowKey>, limit: usize) -> Result<Page> {
			let query = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
			if let Some(gate) = &self.gate {
				gate.lock().unwrap().recv()?;
			}
			if self.fail_on_query == Some(query) {
				bail!("disk I/O error");
			}
			let rows = self
				.rows
				.iter()
				.filter(|row| self.ignore_cursor || after.is_none_or(|after| row.key > after))
				.take(limit)
				.copied()
				.collect();
			Ok(Page::new(rows))
		}
	}

	async fn collect(stream: &mut ZxyStream<MockSource>) -> Vec<String> {
		let mut payloads = Vec::new();
		while let Some(payload) = stream.next().await {
			payloads.push(payload.unwrap());
		}
		payloads
	}

	fn lines(payload: &str) -> Vec<RowKey> {
		parse_payload(payload).map(|coord| RowKey::from(coord.unwrap())).collect()
	}

	#[rstest]
	#[case::single_page(270, 1000, 1, 1)]
	#[case::exact_pages(270, 10, 27, 28)]
	#[case::short_last_page(269, 10, 27, 27)]
	#[case::one_full_page(10, 10, 1, 2)]
	#[case::batch_of_one(3, 1, 3, 4)]
	#[case::uneven(25, 7, 4, 4)]
	#[case::empty(0, 10, 0, 1)]
	#[tokio::test]
	async fn batches_every_row_once(
		#[case] count: usize,
		#[case] batch: usize,
		#[case] expected_payloads: usize,
		#[case] expected_queries: usize,
	) {
		let source = MockSource::resolvable(count);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(batch))
			.await
			.unwrap();
		assert_eq!(stream.batch(), batch);
		assert_eq!(stream.table(), TableKind::Map);

		let payloads = collect(&mut stream).await;
		assert_eq!(payloads.len(), expected_payloads);
		assert_eq!(source.queries(), expected_queries);
		assert_eq!(stream.state(), StreamState::Closed);

		let keys: Vec<RowKey> = payloads.iter().flat_map(|p| lines(p)).collect();
		assert_eq!(keys.len(), count);
		assert!(keys.windows(2).all(|w| w[0] < w[1]));
		assert!(payloads.iter().all(|p| lines(p).len() <= batch && p.ends_with('\n')));
	}

	#[tokio::test]
	async fn continuation_uses_raw_page_length() {
		// the first page holds 4 rows but only 2 resolve; paging must go on
		let source = MockSource::with_flags(&[true, false, true, false, true, true, true]);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(4))
			.await
			.unwrap();

		let payloads = collect(&mut stream).await;
		assert_eq!(payloads.len(), 2);
		assert_eq!(payloads.iter().map(|p| lines(p).len()).collect::<Vec<_>>(), vec![2, 3]);
		assert_eq!(source.queries(), 2);
	}

	#[tokio::test]
	async fn unresolvable_rows_are_skipped() {
		let source = MockSource::with_flags(&[false, true, false, false, true]);
		let expected: Vec<String> = source
			.rows
			.iter()
			.filter(|row| row.resolvable)
			.map(|row| format!("{}\n", row.coord))
			.collect();
		let mut stream = ZxyStream::new(source, ZxyStreamOptions::default()).await.unwrap();

		assert_eq!(collect(&mut stream).await, vec![expected.concat()]);
	}

	#[tokio::test]
	async fn fully_filtered_page_yields_no_payload() {
		let source = MockSource::with_flags(&[false, false, false, true, true]);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(3))
			.await
			.unwrap();

		let payloads = collect(&mut stream).await;
		assert_eq!(payloads.len(), 1);
		assert_eq!(lines(&payloads[0]).len(), 2);
		assert_eq!(source.queries(), 2);
	}

	#[tokio::test]
	async fn only_unresolvable_rows() {
		let source = MockSource::with_flags(&[false; 6]);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(3))
			.await
			.unwrap();

		assert!(collect(&mut stream).await.is_empty());
		assert_eq!(source.queries(), 3);
		assert_eq!(stream.cursor(), source.rows.last().map(|row| row.key));
	}

	#[tokio::test]
	async fn query_failure_ends_the_stream() {
		let mut source = MockSource::resolvable(25);
		source.fail_on_query = Some(2);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(10))
			.await
			.unwrap();

		let first = stream.next().await.unwrap().unwrap();
		assert_eq!(lines(&first).len(), 10);

		let error = stream.next().await.unwrap().unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::StorageQuery {
				table: TableKind::Map,
				..
			})
		));
		assert_eq!(error.root_cause().to_string(), "disk I/O error");
		assert_eq!(stream.state(), StreamState::Errored);
		assert!(stream.is_terminated());

		assert!(stream.next().await.is_none());
		assert_eq!(source.queries(), 2);
	}

	#[tokio::test]
	async fn page_behind_the_cursor_fails() {
		let mut source = MockSource::resolvable(20);
		source.ignore_cursor = true;
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(5))
			.await
			.unwrap();

		stream.next().await.unwrap().unwrap();
		let error = stream.next().await.unwrap().unwrap_err();
		let first = source.rows[0].key;
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::CorruptRow { zoom, column, row })
				if (*zoom, *column, *row) == (i64::from(first.zoom), i64::from(first.column), i64::from(first.row))
		));
		assert_eq!(stream.state(), StreamState::Errored);
		assert!(stream.next().await.is_none());
		assert_eq!(source.queries(), 2);
	}

	#[tokio::test]
	async fn detection_failure() {
		let mut source = MockSource::resolvable(5);
		source.fail_detection = true;

		let error = ZxyStream::new(source.clone(), ZxyStreamOptions::default())
			.await
			.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::SchemaDetection { name, .. }) if name == "mock"
		));
		assert_eq!(source.queries(), 0);
	}

	#[tokio::test]
	async fn invalid_batch() {
		let error = ZxyStream::new(MockSource::resolvable(1), ZxyStreamOptions::with_batch(0))
			.await
			.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ArchiveError>(),
			Some(ArchiveError::InvalidBatchSize(0))
		));
	}

	#[tokio::test]
	async fn queries_wait_for_the_consumer() {
		let source = MockSource::resolvable(100);
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(10))
			.await
			.unwrap();
		assert_eq!(stream.state(), StreamState::Idle);
		assert_eq!(source.queries(), 0);

		stream.next().await.unwrap().unwrap();
		assert_eq!(stream.state(), StreamState::Emitting);
		assert_eq!(source.queries(), 1);

		stream.next().await.unwrap().unwrap();
		assert_eq!(source.queries(), 2);
		assert_eq!(stream.cursor(), Some(source.rows[19].key));

		stream.close();
		assert_eq!(stream.state(), StreamState::Closed);
		assert!(stream.is_terminated());
		assert!(stream.next().await.is_none());
		assert_eq!(source.queries(), 2);
	}

	#[tokio::test]
	async fn close_discards_in_flight_page() {
		let (release, gate) = channel();
		let mut source = MockSource::resolvable(30);
		source.gate = Some(Arc::new(Mutex::new(gate)));
		let mut stream = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(10))
			.await
			.unwrap();

		assert!(stream.next().now_or_never().is_none());
		assert_eq!(stream.state(), StreamState::Fetching);
		while source.queries() == 0 {
			tokio::task::yield_now().await;
		}

		stream.close();
		release.send(()).unwrap();

		assert!(stream.next().await.is_none());
		assert_eq!(stream.state(), StreamState::Closed);
		assert_eq!(source.queries(), 1);
	}

	#[tokio::test]
	async fn close_after_end_keeps_state() {
		let mut stream = ZxyStream::new(MockSource::resolvable(3), ZxyStreamOptions::default())
			.await
			.unwrap();
		assert_eq!(collect(&mut stream).await.len(), 1);
		stream.close();
		assert_eq!(stream.state(), StreamState::Closed);
	}

	#[tokio::test]
	async fn drained_before_end() {
		let mut stream = ZxyStream::new(MockSource::resolvable(3), ZxyStreamOptions::with_batch(5))
			.await
			.unwrap();
		stream.next().await.unwrap().unwrap();
		assert_eq!(stream.state(), StreamState::Drained);
		assert!(!stream.is_terminated());
		assert!(stream.next().await.is_none());
		assert_eq!(stream.state(), StreamState::Closed);
	}

	#[tokio::test]
	async fn independent_cursors() {
		let source = MockSource::resolvable(50);
		let mut a = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(7)).await.unwrap();
		let mut b = ZxyStream::new(source.clone(), ZxyStreamOptions::with_batch(7)).await.unwrap();

		let first_a = a.next().await.unwrap().unwrap();
		let first_b = b.next().await.unwrap().unwrap();
		assert_eq!(first_a, first_b);

		let (rest_a, rest_b) = futures::join!(collect(&mut a), collect(&mut b));
		assert_eq!(rest_a, rest_b);
		assert_eq!(rest_a.len(), 7);
	}

	#[tokio::test]
	async fn debug_output() {
		let stream = ZxyStream::new(MockSource::resolvable(1), ZxyStreamOptions::with_batch(3))
			.await
			.unwrap();
		assert_eq!(
			format!("{stream:?}"),
			"ZxyStream { source: \"mock\", table: Map, batch: 3, state: Idle, cursor: None }"
		);
		assert_eq!(StreamState::Errored.to_string(), "errored");
	}
}
