//! Receipt record types returned by the pipeline.
//!
//! All monetary and temporal fields are free text exactly as the language
//! model produced them; the schema labels values, it does not validate them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One purchased line on the receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub price: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_food: bool,
}

/// Structured receipt, as returned in `processed_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReceiptRecord {
    pub merchant: String,
    pub datetime: String,
    pub items: Vec<LineItem>,
    pub subtotal: String,
    pub tax: String,
    pub total: String,
    /// Names taken from `items`, in item order, without duplicates.
    pub food_items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_suggestions: Option<Vec<Recipe>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub name: String,
    pub additional_ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub cooking_time: String,
    /// "Easy", "Medium" or "Hard" by convention; not enforced.
    pub difficulty: String,
}

// ============================================================================
// Lenient field decoding for model output
// ============================================================================

/// Accept any JSON scalar where a string is expected.
///
/// `null` becomes the empty string and numbers keep their JSON text, so a
/// price the model wrote as `1.2` is carried as `"1.2"`.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(value))
}

/// Accept `true`/`false`, their string spellings, or `null` (false).
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    })
}

/// Accept a list of scalars, a single newline-separated string, or `null`.
pub(crate) fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(values) => values
            .into_iter()
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::String(s) => s
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        other => vec![value_to_text(other)],
    })
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
