//! Typed model of the KPI payload returned by the backend's `/upload/` endpoint.
//!
//! The backend builds the payload piece by piece and silently omits whatever
//! it could not compute, so every field here has a default. Values are coerced
//! once, in [`KpiSnapshot::from_payload`], and the rest of the crate can trust
//! the shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{DataPoint, TransactionRow, finite_or_zero, zip_points};
use crate::derive::expense_series;
use crate::error::{Error, Result};

/// A table row (top-5 table, orders list): column name to cell value
pub type TableRow = Map<String, Value>;

/// The business metrics a series can be drawn for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Revenue,
    Profit,
    /// Revenue minus profit, per row
    Expense,
    Orders,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "revenue" => Ok(Metric::Revenue),
            "profit" => Ok(Metric::Profit),
            "expense" | "expenses" => Ok(Metric::Expense),
            "orders" => Ok(Metric::Orders),
            other => Err(format!("unknown metric: {}", other)),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Revenue => "Revenue",
            Metric::Profit => "Profit",
            Metric::Expense => "Expense",
            Metric::Orders => "Orders",
        };
        f.write_str(name)
    }
}

/// Label/value pair used by the pie, bar and status breakdowns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    #[serde(deserialize_with = "lenient_number")]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Order count per channel or region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedOrders {
    pub name: String,
    #[serde(deserialize_with = "lenient_number")]
    pub orders: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
}

/// Aggregated value for one geographic place, `[lng, lat]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub name: String,
    #[serde(deserialize_with = "lenient_number")]
    pub value: f64,
    pub coordinates: [f64; 2],
}

/// Orders on one day of the orders overview chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersTrendPoint {
    pub date: String,
    #[serde(deserialize_with = "lenient_number")]
    pub orders: f64,
}

/// One line of the top products table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductOrders {
    pub product: String,
    #[serde(deserialize_with = "lenient_number")]
    pub orders: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub revenue: f64,
    #[serde(rename = "avgQty", default, deserialize_with = "lenient_number")]
    pub avg_qty: f64,
}

/// One slice of the profit breakdown bar, as a share in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownShare {
    #[serde(default, alias = "label")]
    pub name: String,
    #[serde(default, alias = "pct", deserialize_with = "lenient_number")]
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Everything the dashboard knows about one uploaded dataset
///
/// Always replaced wholesale; nothing in the crate mutates a snapshot in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(deserialize_with = "lenient_number")]
    pub profit_sum: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub revenue_sum: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub orders_sum: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub expense_sum: f64,
    /// Row count of the uploaded sheet
    #[serde(deserialize_with = "lenient_number")]
    pub customers_sum: f64,

    #[serde(deserialize_with = "lenient_labels")]
    pub date_data: Vec<String>,
    #[serde(deserialize_with = "lenient_numbers")]
    pub revenue_data: Vec<f64>,
    #[serde(deserialize_with = "lenient_numbers")]
    pub profit_data: Vec<f64>,
    /// Either aligned with `date_data` or a monthly sparkline
    #[serde(deserialize_with = "lenient_numbers")]
    pub orders_data: Vec<f64>,

    #[serde(deserialize_with = "lenient_list")]
    pub top5_profit: Vec<TableRow>,
    #[serde(deserialize_with = "lenient_labels")]
    pub top5_columns: Vec<String>,

    #[serde(deserialize_with = "lenient_list")]
    pub orders_list: Vec<TableRow>,
    #[serde(deserialize_with = "lenient_labels")]
    pub orders_columns: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pie_column: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub pie_data: Vec<NamedValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_column: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub bar_data: Vec<NamedValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_column: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub map_data: Vec<MapPoint>,

    #[serde(deserialize_with = "lenient_list")]
    pub orders_trend: Vec<OrdersTrendPoint>,
    #[serde(deserialize_with = "lenient_list")]
    pub orders_by_status: Vec<NamedValue>,
    #[serde(deserialize_with = "lenient_list")]
    pub orders_by_channel: Vec<NamedOrders>,
    #[serde(deserialize_with = "lenient_list")]
    pub orders_by_region: Vec<NamedOrders>,
    #[serde(deserialize_with = "lenient_list")]
    pub top_products_by_orders: Vec<ProductOrders>,

    #[serde(deserialize_with = "lenient_list")]
    pub profit_breakdown: Vec<BreakdownShare>,
    /// Revenue split by a categorical column, keyed by column name
    #[serde(
        deserialize_with = "lenient_columns",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub revenue_by_column: BTreeMap<String, Vec<NamedValue>>,

    /// Keys this crate does not model, kept so the payload persists verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KpiSnapshot {
    /// Validates a raw `/upload/` response body.
    ///
    /// # Arguments
    /// * `body` - Response bytes as received from the backend
    ///
    /// # Returns
    /// * `Ok(snapshot)` with every field coerced to its typed default
    ///
    /// # Errors
    /// * `Error::InvalidPayload` if the body is not a JSON object, or if it
    ///   carries an `error` field despite a successful status. The HTTP
    ///   client checks [`KpiSnapshot::error_message`] first so the backend's
    ///   text reaches the user unchanged.
    pub fn from_payload(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidPayload(format!("not JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Same as [`KpiSnapshot::from_payload`] for an already parsed value
    pub fn from_value(value: Value) -> Result<Self> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::InvalidPayload(format!(
                    "expected an object, got {}",
                    json_kind(&other)
                )));
            }
        };

        if let Some(message) = Self::error_message(&object) {
            return Err(Error::InvalidPayload(message.to_string()));
        }

        serde_json::from_value(Value::Object(object))
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// The `error` string some backends put in an otherwise successful body
    pub fn error_message(object: &Map<String, Value>) -> Option<&str> {
        object.get("error").and_then(Value::as_str)
    }

    /// Scalar total of a metric
    pub fn sum(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Revenue => self.revenue_sum,
            Metric::Profit => self.profit_sum,
            Metric::Expense => self.expense_sum,
            Metric::Orders => self.orders_sum,
        }
    }

    /// `{date, value}` points of one metric, truncated to the shorter array
    pub fn series(&self, metric: Metric) -> Vec<DataPoint> {
        match metric {
            Metric::Revenue => zip_points(&self.date_data, &self.revenue_data),
            Metric::Profit => zip_points(&self.date_data, &self.profit_data),
            Metric::Orders => zip_points(&self.date_data, &self.orders_data),
            Metric::Expense => expense_series(
                &self.series(Metric::Revenue),
                &self.series(Metric::Profit),
            ),
        }
    }

    /// Rows of the parallel arrays with every metric resolved.
    ///
    /// Length is the shortest of dates, revenue and profit, so a payload
    /// without profit values has no rows. Orders are taken by index when
    /// available and are zero otherwise.
    pub fn rows(&self) -> Vec<TransactionRow> {
        let len = self
            .date_data
            .len()
            .min(self.revenue_data.len())
            .min(self.profit_data.len());

        (0..len)
            .map(|i| {
                let revenue = finite_or_zero(self.revenue_data[i]);
                let profit = finite_or_zero(self.profit_data[i]);
                TransactionRow {
                    date: self.date_data[i].clone(),
                    revenue,
                    profit,
                    expense: revenue - profit,
                    orders: finite_or_zero(self.orders_data.get(i).copied().unwrap_or(0.0)),
                }
            })
            .collect()
    }

    /// False when the payload carried no dated revenue series at all
    pub fn has_series(&self) -> bool {
        !self.date_data.is_empty() && !self.revenue_data.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Numeric coercion matching `Number(x) || 0`: numbers and numeric strings
/// pass, anything else is zero.
fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    finite_or_zero(n)
}

fn coerce_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_number(&value))
}

fn lenient_numbers<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(coerce_number).collect(),
        _ => Vec::new(),
    })
}

fn lenient_labels<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(coerce_label).collect(),
        _ => Vec::new(),
    })
}

/// Optional breakdown lists: a missing or null list is empty, malformed items
/// are dropped one by one instead of failing the whole payload.
fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(list_items(Value::deserialize(deserializer)?))
}

fn list_items<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// `{column: [{name, value}]}`; anything but an object is empty
fn lenient_columns<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Vec<NamedValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(columns) => columns
            .into_iter()
            .map(|(column, items)| (column, list_items(items)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_loose_values() {
        let snapshot = KpiSnapshot::from_value(json!({
            "profit_sum": "12.5",
            "revenue_sum": null,
            "orders_sum": 7,
            "customers_sum": 3,
            "date_data": ["2024-01-01", 20240102, null],
            "revenue_data": [1, "2", null, "x"],
            "pie_data": [{"name": "A", "value": 3}, {"bogus": true}],
            "top5_profit": null
        }))
        .unwrap();

        assert_eq!(snapshot.profit_sum, 12.5);
        assert_eq!(snapshot.revenue_sum, 0.0);
        assert_eq!(snapshot.expense_sum, 0.0);
        assert_eq!(snapshot.date_data, vec!["2024-01-01", "20240102", ""]);
        assert_eq!(snapshot.revenue_data, vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(snapshot.pie_data.len(), 1);
        assert!(snapshot.top5_profit.is_empty());
    }

    #[test]
    fn rejects_non_objects_and_error_bodies() {
        assert!(matches!(
            KpiSnapshot::from_payload(b"[1,2]"),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            KpiSnapshot::from_payload(b"not json"),
            Err(Error::InvalidPayload(_))
        ));
        match KpiSnapshot::from_value(json!({"error": "Missing columns: ['profit']"})) {
            Err(Error::InvalidPayload(message)) => {
                assert_eq!(message, "Missing columns: ['profit']")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn series_truncate_to_shortest() {
        let snapshot = KpiSnapshot {
            date_data: vec!["2024-01-01".into(), "2024-01-02".into(), "2024-01-03".into()],
            revenue_data: vec![10.0, 20.0],
            profit_data: vec![4.0, 5.0, 6.0],
            ..Default::default()
        };
        assert_eq!(snapshot.series(Metric::Revenue).len(), 2);
        assert_eq!(snapshot.series(Metric::Profit).len(), 3);

        let expense = snapshot.series(Metric::Expense);
        assert_eq!(expense.len(), 2);
        assert_eq!(expense[1].value, 15.0);

        let rows = snapshot.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].expense, 6.0);
        assert_eq!(rows[0].orders, 0.0);
    }

    #[test]
    fn rows_need_profit_values() {
        let snapshot = KpiSnapshot {
            date_data: vec!["2024-01-01".into(), "2024-01-02".into()],
            revenue_data: vec![10.0, 20.0],
            orders_data: vec![1.0, 2.0],
            ..Default::default()
        };
        assert!(snapshot.has_series());
        assert!(snapshot.rows().is_empty());
        assert!(snapshot.series(Metric::Expense).is_empty());
        assert_eq!(snapshot.series(Metric::Orders).len(), 2);
    }

    #[test]
    fn breakdowns_and_unknown_keys_are_kept() {
        let payload = json!({
            "revenue_sum": 5,
            "profit_breakdown": [
                {"name": "Cost", "percentage": 40},
                {"label": "Shipping", "pct": "10", "color": "#34d399"},
                "junk"
            ],
            "revenue_by_column": {
                "category": [{"name": "Office", "value": "90"}, {"value": 1}],
                "region": null
            },
            "orders_columns": ["Order ID"],
            "forecast": {"next_month": 1200}
        });
        let snapshot = KpiSnapshot::from_value(payload).unwrap();

        assert_eq!(snapshot.profit_breakdown.len(), 2);
        assert_eq!(snapshot.profit_breakdown[1].name, "Shipping");
        assert_eq!(snapshot.profit_breakdown[1].percentage, 10.0);
        assert_eq!(snapshot.revenue_by_column["category"].len(), 1);
        assert_eq!(snapshot.revenue_by_column["category"][0].value, 90.0);
        assert!(snapshot.revenue_by_column["region"].is_empty());
        assert_eq!(snapshot.extra["forecast"], json!({"next_month": 1200}));
        assert!(!snapshot.extra.contains_key("revenue_sum"));

        let blob = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(blob["forecast"]["next_month"], 1200);
        let reparsed = KpiSnapshot::from_value(blob).unwrap();
        assert_eq!(reparsed, snapshot);
    }

    #[test]
    fn metric_names() {
        assert_eq!("Expenses".parse::<Metric>(), Ok(Metric::Expense));
        assert!("margin".parse::<Metric>().is_err());
        assert_eq!(Metric::Orders.to_string(), "Orders");
    }
}
