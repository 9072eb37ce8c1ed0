use serde::{Deserialize, Serialize};

use crate::Result;

/// One daily quote row, as it appears in the source CSV and on the wire.
///
/// Field names serialize as the CSV header names so the warehouse table
/// columns line up with the message keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    #[serde(rename = "Index")]
    pub symbol: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Adj Close")]
    pub adj_close: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
    #[serde(rename = "CloseUSD")]
    pub close_usd: f64,
}

impl StockRecord {
    /// Serialize to the message body published on the topic
    pub fn to_message(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_message(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_uses_csv_header_names_on_the_wire() -> anyhow::Result<()> {
        let record = StockRecord {
            symbol: "NYA".into(),
            date: "1965-12-31".into(),
            open: 528.69,
            high: 528.69,
            low: 528.69,
            close: 528.69,
            adj_close: 528.69,
            volume: 0.0,
            close_usd: 528.69,
        };

        let value: serde_json::Value = serde_json::from_slice(&record.to_message()?)?;
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();

        for key in [
            "Index", "Date", "Open", "High", "Low", "Close", "Adj Close", "Volume", "CloseUSD",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(9, keys.len());

        assert_eq!(record, StockRecord::from_message(&record.to_message()?)?);
        Ok(())
    }
}
