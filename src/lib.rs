pub mod acquisition;
pub mod config;
pub mod db;
pub mod error;
pub mod local;
pub mod models;
pub mod pipeline;
pub mod push;
pub mod server;
mod utils;

pub use config::{AppSettings, ServerSettings};
pub use db::Database;
pub use error::PipelineError;
pub use models::{HistoryRecord, OwnerIdentity, RawReading, Sample};
