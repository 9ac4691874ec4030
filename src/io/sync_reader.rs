//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over the rows of a CSV file, converting each
//! one through its [`CsvRow`] implementation.
//!
//! # Design
//!
//! The SyncReader uses csv::Reader to read and deserialize rows sequentially
//! without loading the file into memory. It is generic over the row type, so
//! the same reader serves spend batches and user imports:
//!
//! ```no_run
//! use rust_user_ledger::io::{SpendCsvRecord, SyncReader};
//! use std::path::Path;
//!
//! let reader = SyncReader::<SpendCsvRecord>::new(Path::new("spends.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(request) => println!("Spend {} from user {}", request.amount, request.user),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found) are returned from `new()`
//! - Individual row errors are yielded as Err variants in the iterator
//! - Line numbers are included in error messages for debugging

use crate::io::csv_format::CsvRow;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

/// Synchronous CSV reader
///
/// Yields one converted row at a time with constant memory usage.
#[derive(Debug)]
pub struct SyncReader<T> {
    reader: csv::Reader<File>,
    line_num: usize,
    _row: PhantomData<fn() -> T>,
}

impl<T: CsvRow> SyncReader<T> {
    /// Create a new SyncReader from a file path
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (for optional trailing columns)
    /// - Use an 8KB buffer for efficient I/O
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the CSV file
    ///
    /// # Returns
    ///
    /// * `Ok(SyncReader)` if file opened successfully
    /// * `Err(String)` if file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 0,
            _row: PhantomData,
        })
    }
}

impl<T: CsvRow> Iterator for SyncReader<T> {
    type Item = Result<T::Output, String>;

    /// Get the next converted row
    ///
    /// # Returns
    ///
    /// * `Some(Ok(value))` - Successfully parsed and converted row
    /// * `Some(Err(String))` - Parse or conversion error with line number
    /// * `None` - End of file reached
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<T>();
        let row = deserializer.next()?;
        self.line_num += 1;

        // +1 for the header line
        let line = self.line_num + 1;
        Some(match row {
            Ok(record) => record
                .convert()
                .map_err(|e| format!("Line {}: {}", line, e)),
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}
