use std::io::Read;

use object_store::{path::Path, ObjectStore};

use crate::{errors::IngestorError, record::StockRecord, Result};

/// Parse quote rows from CSV with the `Index,Date,Open,...,CloseUSD` header.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<StockRecord>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let records = reader
        .deserialize::<StockRecord>()
        .collect::<core::result::Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Fetch the source CSV from an object store and parse it.
pub async fn load_records(store: &dyn ObjectStore, location: &Path) -> Result<Vec<StockRecord>> {
    let bytes = store
        .get(location)
        .await
        .map_err(|err| data_access(location, err))?
        .bytes()
        .await
        .map_err(|err| data_access(location, err))?;

    tracing::info!("downloaded {location} ({} bytes)", bytes.len());

    let records = read_records(&bytes[..]).map_err(|err| data_access(location, err))?;
    tracing::info!("total records in {location}: {}", records.len());

    Ok(records)
}

fn data_access(location: &Path, err: impl std::fmt::Display) -> IngestorError {
    IngestorError::DataAccess {
        location: location.to_string(),
        reason: err.to_string(),
    }
}
