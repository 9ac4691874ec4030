//! Asynchronous CSV reader with batch interface
//!
//! Reads rows from any `futures::io::AsyncRead` and hands them out in
//! batches, converting each through its [`CsvRow`] implementation.
//!
//! # Design
//!
//! The AsyncReader uses:
//! - csv-async for streaming CSV parsing
//! - Batch reading so callers can fan a batch out to workers
//!
//! # Architecture
//!
//! ```text
//! AsyncRead → AsyncReader<R, T> → Vec<T::Output>
//!                  ↓
//!           csv_format module
//!           (CsvRow::convert)
//! ```

use crate::io::csv_format::CsvRow;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use std::marker::PhantomData;

/// Asynchronous CSV reader
///
/// Invalid rows are logged with their line number and skipped.
pub struct AsyncReader<R: AsyncRead + Unpin, T> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    line_num: usize,
    _row: PhantomData<fn() -> T>,
}

impl<R, T> AsyncReader<R, T>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: CsvRow + 'static,
{
    /// Create a new AsyncReader from an async reader
    ///
    /// # Arguments
    ///
    /// * `reader` - Async reader providing CSV data
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            line_num: 0,
            _row: PhantomData,
        }
    }

    /// Read a batch of converted rows
    ///
    /// Reads until `batch_size` rows converted successfully or the input ends.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Maximum number of rows to return
    ///
    /// # Returns
    ///
    /// A vector of converted rows; empty once the end of the input is reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<T::Output> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<T>();

        while batch.len() < batch_size {
            let Some(row) = records.next().await else {
                break;
            };
            self.line_num += 1;
            let line = self.line_num + 1;

            match row {
                Ok(record) => match record.convert() {
                    Ok(value) => batch.push(value),
                    Err(e) => tracing::warn!(line, "Record conversion error: {}", e),
                },
                Err(e) => tracing::warn!(line, "CSV parse error: {}", e),
            }
        }

        batch
    }
}
