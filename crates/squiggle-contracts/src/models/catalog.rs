use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-token pricing as reported by the OpenRouter catalog (decimal
/// strings, passed through untouched).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt: String,
    pub completion: String,
}

/// One row of the OpenRouter models listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

/// Parse a `{ "data": [...] }` catalog payload, skipping rows that do
/// not match the expected shape.
pub fn parse_catalog(payload: &Value) -> Vec<CatalogModel> {
    payload
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| serde_json::from_value(row.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
