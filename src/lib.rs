pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod exiftool;
pub mod faces;
pub mod ingest;
pub mod logging;
pub mod scanner;
