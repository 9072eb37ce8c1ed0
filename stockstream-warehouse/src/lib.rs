pub mod errors;
pub mod lake;
pub mod lease;
pub mod ledger;
pub mod loader;
pub mod ndjson;
pub mod schema;
mod store;
pub mod warehouse;

pub use errors::{Result, WarehouseError};
pub use lake::LakeWarehouse;
pub use lease::Lease;
pub use ledger::{Ledger, LedgerEntry};
pub use loader::{LoadOutcome, LoadReport, LoaderProps, ObjectLoad, WarehouseLoader};
pub use schema::{stock_table_schema, ColumnDef, ColumnType, TableSchema};
pub use warehouse::{
    DatasetInfo, LoadJob, LoadJobConfig, LoadJobResult, TableInfo, TableRef, Warehouse,
    WriteDisposition,
};
