mod arrow_schemas;
pub mod consolidated;
mod error;
mod export_parquet;
pub mod graph;
mod models;
mod open;
mod query;
mod registry;
mod rows;
mod schema;
mod store;
mod targets;
mod tool_scans;

pub use error::{Result, StoreError};
pub use export_parquet::export_assets_to_parquet;
pub use models::*;
pub use open::Db;
pub use store::Store;
