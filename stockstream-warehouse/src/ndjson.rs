use std::sync::Arc;

use arrow_array::{
    builder::{Float64Builder, StringBuilder},
    ArrayRef, RecordBatch,
};
use serde_json::{Map, Value};

use crate::{
    errors::{Result, WarehouseError},
    schema::{ColumnType, TableSchema},
};

enum ColumnBuilder {
    Utf8(StringBuilder),
    Float(Float64Builder),
}

impl ColumnBuilder {
    fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::String => Self::Utf8(StringBuilder::new()),
            ColumnType::Float => Self::Float(Float64Builder::new()),
        }
    }

    /// `Err` carries the JSON type that did not fit
    fn append(&mut self, value: Option<&Value>) -> core::result::Result<(), &'static str> {
        match (self, value) {
            (Self::Utf8(builder), None | Some(Value::Null)) => builder.append_null(),
            (Self::Float(builder), None | Some(Value::Null)) => builder.append_null(),
            (Self::Utf8(builder), Some(Value::String(s))) => builder.append_value(s),
            (Self::Float(builder), Some(Value::Number(n))) => match n.as_f64() {
                Some(n) => builder.append_value(n),
                None => return Err("number"),
            },
            (_, Some(other)) => return Err(json_type(other)),
        }
        Ok(())
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Utf8(mut builder) => Arc::new(builder.finish()),
            Self::Float(mut builder) => Arc::new(builder.finish()),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a newline-delimited JSON object into a batch shaped like `schema`.
///
/// Each value's JSON type is detected and has to agree with its column:
/// numbers go to FLOAT, strings to STRING, null anywhere. Keys absent from a
/// line load as null. Blank lines are skipped.
pub fn decode(object: &str, body: &[u8], schema: &TableSchema) -> Result<RecordBatch> {
    let mut builders: Vec<_> = schema
        .columns
        .iter()
        .map(|column| ColumnBuilder::new(column.column_type))
        .collect();

    let text = std::str::from_utf8(body).map_err(|err| WarehouseError::MalformedData {
        object: object.to_owned(),
        line: 1 + body[..err.valid_up_to()].iter().filter(|b| **b == b'\n').count(),
        reason: err.to_string(),
    })?;

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Map<String, Value> =
            serde_json::from_str(line).map_err(|err| WarehouseError::MalformedData {
                object: object.to_owned(),
                line: i + 1,
                reason: err.to_string(),
            })?;

        if let Some(unknown) = row.keys().find(|key| schema.column(key).is_none()) {
            return Err(WarehouseError::SchemaMismatch {
                object: object.to_owned(),
                reason: format!("line {}: unknown column {unknown:?}", i + 1),
            });
        }

        for (column, builder) in schema.columns.iter().zip(builders.iter_mut()) {
            builder
                .append(row.get(&column.name))
                .map_err(|found| WarehouseError::SchemaMismatch {
                    object: object.to_owned(),
                    reason: format!(
                        "line {}: column {:?} is {:?} but got a {found}",
                        i + 1,
                        column.name,
                        column.column_type
                    ),
                })?;
        }
    }

    let columns = builders.into_iter().map(ColumnBuilder::finish).collect();
    Ok(RecordBatch::try_new(schema.to_arrow(), columns)?)
}

#[cfg(test)]
mod tests {
    use arrow_array::{cast::AsArray, types::Float64Type, Array};

    use super::*;
    use crate::schema::stock_table_schema;

    const OBJECT: &str = "stock-data-20250601-120000-1.ndjson";

    #[test]
    fn it_decodes_quote_lines() -> anyhow::Result<()> {
        let body = concat!(
            r#"{"Index":"HSI","Date":"1986-12-31","Open":2568.3,"High":2568.3,"Low":2568.3,"Close":2568.3,"Adj Close":2568.3,"Volume":0,"CloseUSD":333.879}"#,
            "\n",
            r#"{"Index":"NYA","Date":"1965-12-31","Open":528.69,"Volume":null}"#,
        );

        let batch = decode(OBJECT, body.as_bytes(), &stock_table_schema())?;
        assert_eq!(2, batch.num_rows());
        assert_eq!(9, batch.num_columns());

        let index = batch.column(0).as_string::<i32>();
        assert_eq!("HSI", index.value(0));
        assert_eq!("NYA", index.value(1));

        // integers land in FLOAT columns
        let volume = batch.column(7).as_primitive::<Float64Type>();
        assert_eq!(0.0, volume.value(0));
        assert!(volume.is_null(1));

        // missing keys load as null
        assert!(batch.column(8).is_null(1));
        Ok(())
    }

    #[test]
    fn it_rejects_unknown_columns() {
        let body = br#"{"Index":"HSI","Ticker":"^HSI"}"#;
        let err = decode(OBJECT, body, &stock_table_schema()).unwrap_err();
        assert!(matches!(err, WarehouseError::SchemaMismatch { .. }), "{err}");
    }

    #[test]
    fn it_rejects_values_of_the_wrong_type() {
        let body = br#"{"Index":"HSI","Open":"2568.3"}"#;
        let err = decode(OBJECT, body, &stock_table_schema()).unwrap_err();
        assert!(matches!(err, WarehouseError::SchemaMismatch { .. }), "{err}");
    }

    #[test]
    fn it_reports_the_malformed_line() {
        let body = b"{\"Index\":\"HSI\"}\n{\"Index\":\n{}";
        match decode(OBJECT, body, &stock_table_schema()) {
            Err(WarehouseError::MalformedData { line, .. }) => assert_eq!(2, line),
            other => panic!("expected malformed data, got {other:?}"),
        }
    }

    #[test]
    fn it_tolerates_a_trailing_newline() -> anyhow::Result<()> {
        let batch = decode(OBJECT, b"{\"Index\":\"HSI\"}\n", &stock_table_schema())?;
        assert_eq!(1, batch.num_rows());
        Ok(())
    }
}
