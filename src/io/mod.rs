//! CSV input and output
//!
//! Two row kinds come in (user imports and spend requests) and one goes out
//! (user state). Both readers are generic over [`CsvRow`], so adding a row
//! kind means adding a record type, not a reader.
//!
//! - `csv_format` - row types, their validation, and the user writer
//! - `sync_reader` - streaming iterator over a file
//! - `async_reader` - batched reads for the concurrent strategy

pub mod async_reader;
pub mod csv_format;
pub mod sync_reader;

pub use async_reader::AsyncReader;
pub use csv_format::{write_users_csv, CsvRow, SpendCsvRecord, UserCsvRecord};
pub use sync_reader::SyncReader;
