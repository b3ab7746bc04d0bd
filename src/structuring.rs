//! Raw OCR text → structured receipt via the language model.

use crate::error::{PipelineError, Stage};
use crate::food::FoodClassifier;
use crate::json_repair::parse_llm_json;
use crate::llm::{LanguageModel, Prompt};
use crate::receipt::{lenient_string, lenient_string_list, LineItem, ReceiptRecord};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that processes receipt text and \
extracts structured information. Always answer with a single valid JSON object and nothing else.";

/// Receipt structuring stage.
pub struct Structurer {
    model: Arc<dyn LanguageModel>,
    food: FoodClassifier,
}

impl Structurer {
    pub fn new(model: Arc<dyn LanguageModel>, food: FoodClassifier) -> Self {
        Self { model, food }
    }

    /// Structure raw receipt text. One model call, one repair attempt.
    pub async fn structure(&self, text: &str) -> Result<ReceiptRecord, PipelineError> {
        info!(
            "Structuring {} chars of receipt text with {}",
            text.len(),
            self.model.name()
        );

        let response = self
            .model
            .complete(&build_prompt(text), true)
            .await
            .map_err(|e| PipelineError::backend(Stage::Structuring, e))?;

        let extracted: ExtractedReceipt = parse_llm_json(&response)
            .map_err(|e| PipelineError::StructuringFailed(format!("{:#}", e)))?;

        let record = self.into_record(extracted);
        info!(
            "Structured receipt: merchant={:?}, {} items, {} food items",
            record.merchant,
            record.items.len(),
            record.food_items.len()
        );
        Ok(record)
    }

    fn into_record(&self, extracted: ExtractedReceipt) -> ReceiptRecord {
        let mut items = extracted.items;
        let food_items = self.food.derive(&mut items);

        if !extracted.food_items.is_empty() && extracted.food_items != food_items {
            debug!(
                "Model-reported food items {:?} differ from {} derivation {:?}",
                extracted.food_items,
                self.food.policy().as_str(),
                food_items
            );
        }

        ReceiptRecord {
            merchant: extracted.merchant,
            datetime: extracted.datetime,
            items,
            subtotal: extracted.subtotal,
            tax: extracted.tax,
            total: extracted.total,
            food_items,
            recipe_suggestions: None,
        }
    }
}

/// Fixed structuring instructions with the OCR text embedded.
pub fn build_prompt(text: &str) -> Prompt {
    let user = format!(
        r#"Format the following receipt text into a structured JSON format.
Identify and clearly label:
- Store/Merchant name
- Date and time
- Individual items and their prices
- Subtotal
- Tax
- Total amount
- Which items are food or cooking ingredients

Receipt text:
{}

Format the response as JSON with this structure:
{{
  "merchant": "store name",
  "datetime": "date and time",
  "items": [
    {{"name": "item name", "price": "price as printed", "is_food": true}}
  ],
  "subtotal": "amount",
  "tax": "amount",
  "total": "amount",
  "food_items": ["names of the items whose is_food is true"]
}}

Use an empty string for any value that is not on the receipt. Fix obvious OCR typos in item names."#,
        text.trim()
    );
    Prompt::new(SYSTEM_PROMPT, user)
}

// ============================================================================
// Helper types for LLM response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExtractedReceipt {
    #[serde(default, deserialize_with = "lenient_string")]
    merchant: String,
    #[serde(default, deserialize_with = "lenient_string")]
    datetime: String,
    #[serde(default, deserialize_with = "lenient_items")]
    items: Vec<LineItem>,
    #[serde(default, deserialize_with = "lenient_string")]
    subtotal: String,
    #[serde(default, deserialize_with = "lenient_string")]
    tax: String,
    #[serde(default, deserialize_with = "lenient_string")]
    total: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    food_items: Vec<String>,
}

/// `null` items mean no items.
fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<LineItem>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<LineItem>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food::FoodItemPolicy;
    use crate::testing::{FailingModel, ScriptedModel};

    const MART_TEXT: &str =
        "MART\nApple $1.20\nBread $2.50\nSubtotal $3.70\nTax $0.30\nTotal $4.00";

    const MART_RESPONSE: &str = r#"{
        "merchant": "MART",
        "datetime": "",
        "items": [
            {"name": "Apple", "price": "$1.20", "is_food": true},
            {"name": "Bread", "price": "$2.50", "is_food": true}
        ],
        "subtotal": "$3.70",
        "tax": "$0.30",
        "total": "$4.00",
        "food_items": ["Apple", "Bread"]
    }"#;

    fn structurer(model: Arc<dyn LanguageModel>, policy: FoodItemPolicy) -> Structurer {
        Structurer::new(model, FoodClassifier::new(policy).unwrap())
    }

    #[tokio::test]
    async fn test_mart_receipt() {
        let model = Arc::new(ScriptedModel::new(vec![MART_RESPONSE]));
        let record = structurer(model.clone(), FoodItemPolicy::ItemFlag)
            .structure(MART_TEXT)
            .await
            .unwrap();

        assert_eq!(record.merchant, "MART");
        assert_eq!(
            record.items,
            vec![
                LineItem {
                    name: "Apple".into(),
                    price: "$1.20".into(),
                    is_food: true
                },
                LineItem {
                    name: "Bread".into(),
                    price: "$2.50".into(),
                    is_food: true
                },
            ]
        );
        assert_eq!(record.subtotal, "$3.70");
        assert_eq!(record.tax, "$0.30");
        assert_eq!(record.total, "$4.00");
        assert_eq!(record.food_items, vec!["Apple", "Bread"]);
        assert!(record.recipe_suggestions.is_none());

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("Apple $1.20"));
        assert!(model.json_flags().iter().all(|&json| json));
    }

    #[tokio::test]
    async fn test_prose_wrapped_response_is_repaired() {
        let wrapped = format!("Here is the JSON you asked for:\n```json\n{}\n```", MART_RESPONSE);
        let model = Arc::new(ScriptedModel::new(vec![wrapped.as_str()]));
        let record = structurer(model, FoodItemPolicy::ItemFlag)
            .structure(MART_TEXT)
            .await
            .unwrap();
        assert_eq!(record.total, "$4.00");
    }

    #[tokio::test]
    async fn test_missing_optional_fields_become_empty() {
        let model = Arc::new(ScriptedModel::new(vec![r#"{"merchant": "KIOSK", "items": null}"#]));
        let record = structurer(model, FoodItemPolicy::ItemFlag)
            .structure("KIOSK")
            .await
            .unwrap();

        assert_eq!(record.merchant, "KIOSK");
        assert!(record.items.is_empty());
        assert!(record.food_items.is_empty());
        assert_eq!(record.total, "");
    }

    #[tokio::test]
    async fn test_model_food_list_cannot_add_names_outside_items() {
        let response = r#"{
            "merchant": "MART",
            "items": [{"name": "Apple", "price": "$1.20", "is_food": true},
                      {"name": "Batteries", "price": "$5.00", "is_food": false}],
            "food_items": ["Apple", "Cheese"]
        }"#;
        let model = Arc::new(ScriptedModel::new(vec![response]));
        let record = structurer(model, FoodItemPolicy::ItemFlag)
            .structure("MART")
            .await
            .unwrap();

        assert_eq!(record.food_items, vec!["Apple"]);
        for name in &record.food_items {
            assert!(record.items.iter().any(|item| &item.name == name));
        }
    }

    #[tokio::test]
    async fn test_unparseable_response_fails_structuring() {
        let model = Arc::new(ScriptedModel::new(vec!["Sorry, I cannot read this receipt."]));
        let err = structurer(model.clone(), FoodItemPolicy::ItemFlag)
            .structure(MART_TEXT)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StructuringFailed(_)));
        // No retry after the repair pass.
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_outage_is_backend_unavailable() {
        let err = structurer(Arc::new(FailingModel), FoodItemPolicy::ItemFlag)
            .structure(MART_TEXT)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::BackendUnavailable {
                stage: Stage::Structuring,
                ..
            }
        ));
    }
}
