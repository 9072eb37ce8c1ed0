use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Float,
}

impl ColumnType {
    fn arrow_type(self) -> DataType {
        match self {
            Self::String => DataType::Utf8,
            Self::Float => DataType::Float64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Column list of a warehouse table. Every column is nullable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: impl IntoIterator<Item = (&'static str, ColumnType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, column_type)| ColumnDef {
                    name: name.to_owned(),
                    column_type,
                })
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }

    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<_> = self
            .columns
            .iter()
            .map(|column| Field::new(&column.name, column.column_type.arrow_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

/// The quote table: two string columns, then seven floats.
pub fn stock_table_schema() -> TableSchema {
    let mut columns = vec![("Index", ColumnType::String), ("Date", ColumnType::String)];
    columns.extend(
        ["Open", "High", "Low", "Close", "Adj Close", "Volume", "CloseUSD"]
            .map(|name| (name, ColumnType::Float)),
    );
    TableSchema::new(columns)
}
