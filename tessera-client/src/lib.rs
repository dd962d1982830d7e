pub mod client;
pub mod config;
pub mod operations;
pub mod traverse;

pub use client::Client;
pub use config::{Config, DataStorConfig, MetaStorConfig, MetaStorDbConfig, MetaStorDbType};
pub use traverse::TraverseIterator;
