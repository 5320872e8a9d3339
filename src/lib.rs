pub mod browser;
pub mod cleaning;
pub mod config;
pub mod enricher;
pub mod error;
pub mod extractor;
pub mod models;
pub mod monitor;
pub mod pagination;
pub mod runner;
pub mod store;
