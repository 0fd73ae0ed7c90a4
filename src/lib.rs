pub mod config;
pub mod exporter;
pub mod parser;
pub mod watcher;
