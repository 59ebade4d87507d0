pub mod config;
pub mod data_importer;
pub mod error;
pub mod monitoring;
pub mod sql_parser;
pub mod types;
