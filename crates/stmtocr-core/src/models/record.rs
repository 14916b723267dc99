//! Structured statement records returned by the extraction service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level keys the service is asked to produce.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "bank",
    "statement_date",
    "account_number",
    "statement_period",
    "contact_info",
    "client_info",
    "account_details",
    "transactions",
];

/// Preferred column order when exporting transactions.
pub const TRANSACTION_COLUMNS: &[&str] = &["date", "description", "debit", "credit", "balance"];

/// The structured outcome of one page.
///
/// Only guaranteed to be a JSON object; every field is optional and loosely
/// typed, so accessors return `Option`s rather than failing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedRecord(Map<String, Value>);

impl ExtractedRecord {
    /// Wrap a parsed JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Accept a JSON value if it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A top-level field rendered as text, if it is a scalar.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }

    pub fn bank(&self) -> Option<String> {
        self.text("bank")
    }

    pub fn statement_date(&self) -> Option<String> {
        self.text("statement_date")
    }

    pub fn account_number(&self) -> Option<String> {
        self.text("account_number")
    }

    /// Statement period as text. Objects with start and end dates read
    /// `start to end`; other shapes are rendered as compact JSON.
    pub fn statement_period(&self) -> Option<String> {
        let period = self.get("statement_period").filter(|v| !v.is_null())?;
        if let Some(text) = scalar_text(period) {
            return Some(text);
        }
        let bound = |keys: [&str; 2]| keys.iter().find_map(|k| period.get(*k).and_then(scalar_text));
        match (bound(["start", "from"]), bound(["end", "to"])) {
            (Some(start), Some(end)) => Some(format!("{} to {}", start, end)),
            _ => Some(period.to_string()),
        }
    }

    pub fn account_details(&self) -> Option<&Map<String, Value>> {
        self.get("account_details").and_then(Value::as_object)
    }

    /// Transaction entries that are objects, in their original order.
    pub fn transactions(&self) -> Vec<&Map<String, Value>> {
        self.get("transactions")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    /// Recognized keys missing from this record.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        RECOGNIZED_KEYS
            .iter()
            .copied()
            .filter(|key| !self.0.contains_key(*key))
            .collect()
    }

    /// Summary figures for display.
    pub fn metrics(&self) -> RecordMetrics {
        let transactions = self.transactions();

        let balance = self.account_details().and_then(|details| {
            details
                .get("balance")
                .filter(|v| !v.is_null())
                .or_else(|| details.get("closing_balance"))
                .and_then(scalar_text)
        });

        let sum = |column: &str| -> f64 {
            transactions
                .iter()
                .filter_map(|t| t.get(column).and_then(Value::as_f64))
                .sum()
        };

        RecordMetrics {
            bank: self.bank(),
            account_number: self.account_number(),
            statement_date: self.statement_date(),
            statement_period: self.statement_period(),
            transaction_count: transactions.len(),
            balance,
            total_credits: sum("credit"),
            total_debits: sum("debit"),
        }
    }

    /// Column headers for a transactions table.
    ///
    /// Preferred columns first (when present), then the remaining keys in
    /// first-seen order.
    pub fn transaction_columns(&self) -> Vec<String> {
        let transactions = self.transactions();
        let mut columns: Vec<String> = TRANSACTION_COLUMNS
            .iter()
            .filter(|c| transactions.iter().any(|t| t.contains_key(**c)))
            .map(|c| c.to_string())
            .collect();

        for entry in &transactions {
            for key in entry.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    /// Transactions as rows of cells matching [`Self::transaction_columns`].
    pub fn transaction_rows(&self) -> Vec<Vec<String>> {
        let columns = self.transaction_columns();
        self.transactions()
            .into_iter()
            .map(|entry| {
                columns
                    .iter()
                    .map(|c| entry.get(c).map(cell_text).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

/// Key figures of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetrics {
    pub bank: Option<String>,
    pub account_number: Option<String>,
    pub statement_date: Option<String>,
    pub statement_period: Option<String>,
    pub transaction_count: usize,
    pub balance: Option<String>,
    pub total_credits: f64,
    pub total_debits: f64,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> ExtractedRecord {
        ExtractedRecord::from_value(json!({
            "bank": "Banque Populaire",
            "statement_date": "2023-04-06",
            "account_number": "12345678901",
            "account_details": {"iban": "FR76 1234", "balance": null, "closing_balance": 1520.5},
            "transactions": [
                {"date": "01/04", "description": "CB CARREFOUR", "debit": 42.1, "credit": null, "reference": "A1"},
                {"date": "03/04", "description": "VIR SALAIRE", "debit": null, "credit": 2100.0, "balance": 3000.0},
                "garbage"
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(ExtractedRecord::from_value(json!([1, 2])).is_none());
        assert!(ExtractedRecord::from_value(json!("text")).is_none());
        assert!(ExtractedRecord::from_value(json!({})).is_some());
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let record = sample();
        let text = serde_json::to_string(&record).unwrap();
        let back: ExtractedRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);

        let keys: Vec<&String> = back.fields().keys().collect();
        assert_eq!(keys, ["bank", "statement_date", "account_number", "account_details", "transactions"]);
        assert_eq!(back.transactions()[1]["description"], json!("VIR SALAIRE"));
    }

    #[test]
    fn test_metrics() {
        let metrics = sample().metrics();
        assert_eq!(metrics.bank.as_deref(), Some("Banque Populaire"));
        assert_eq!(metrics.transaction_count, 2);
        assert_eq!(metrics.balance.as_deref(), Some("1520.5"));
        assert_eq!(metrics.total_credits, 2100.0);
        assert_eq!(metrics.total_debits, 42.1);
        assert_eq!(metrics.statement_period, None);
    }

    #[test]
    fn test_statement_period_shapes() {
        let period = |value: Value| {
            ExtractedRecord::from_value(json!({ "statement_period": value }))
                .unwrap()
                .statement_period()
        };
        assert_eq!(period(json!("avril 2023")).as_deref(), Some("avril 2023"));
        assert_eq!(
            period(json!({"start": "2023-03-07", "end": "2023-04-06"})).as_deref(),
            Some("2023-03-07 to 2023-04-06")
        );
        assert_eq!(
            period(json!({"from": "01/03", "to": "31/03"})).as_deref(),
            Some("01/03 to 31/03")
        );
        assert_eq!(period(json!({"month": 4})).as_deref(), Some("{\"month\":4}"));
        assert_eq!(period(Value::Null), None);
    }

    #[test]
    fn test_transaction_columns_order() {
        let record = sample();
        assert_eq!(
            record.transaction_columns(),
            ["date", "description", "debit", "credit", "balance", "reference"]
        );
        let rows = record.transaction_rows();
        assert_eq!(rows[0], ["01/04", "CB CARREFOUR", "42.1", "", "", "A1"]);
    }

    #[test]
    fn test_missing_keys() {
        let record = ExtractedRecord::from_value(json!({"bank": "X", "transactions": []})).unwrap();
        assert_eq!(record.missing_keys().len(), RECOGNIZED_KEYS.len() - 2);
        assert!(record.transactions().is_empty());
    }
}
