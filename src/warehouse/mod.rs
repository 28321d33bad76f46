//! Remote warehouse access: the BigQuery client, result types and the
//! lookup cache.

mod cache;
mod client;
mod models;

pub use cache::LookupCache;
pub use client::{BigQueryClient, Credentials, Warehouse, WarehouseError};
pub use models::{CellValue, Column, ColumnType, QueryResult};
