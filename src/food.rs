//! Food-item derivation.
//!
//! Exactly one policy is active per process. Both policies select names from
//! the record's own line items, so `food_items` is always a subset of `items`.

use crate::receipt::LineItem;
use anyhow::Result;
use regex::Regex;

/// Words that mark a line item as food under [`FoodItemPolicy::Keyword`].
/// Plural forms (`s`/`es`) match too.
const FOOD_KEYWORDS: &[&str] = &[
    "fresh", "organic", "fruit", "vegetable", "meat", "dairy", "produce", "grocery",
    "ingredient", "food", "spice", "apple", "banana", "orange", "lemon", "berry", "berries",
    "grape", "tomato", "potato", "onion", "garlic", "lettuce", "spinach", "carrot", "pepper",
    "bread", "bagel", "tortilla", "milk", "cream", "butter", "cheese", "yogurt", "egg",
    "chicken", "beef", "pork", "turkey", "bacon", "ham", "sausage", "fish", "salmon", "tuna",
    "shrimp", "rice", "pasta", "noodle", "flour", "sugar", "salt", "oil", "bean", "lentil",
    "cereal", "oat", "juice", "coffee", "tea", "sauce", "soup", "herb",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoodItemPolicy {
    /// Trust the model's per-item `is_food` flag.
    ItemFlag,
    /// Match item names against [`FOOD_KEYWORDS`]; matching items get `is_food = true`.
    Keyword,
}

impl FoodItemPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "item_flag" => Some(Self::ItemFlag),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ItemFlag => "item_flag",
            Self::Keyword => "keyword",
        }
    }
}

/// Applies the configured policy to a list of line items.
#[derive(Debug, Clone)]
pub struct FoodClassifier {
    policy: FoodItemPolicy,
    keywords: Regex,
}

impl FoodClassifier {
    pub fn new(policy: FoodItemPolicy) -> Result<Self> {
        let pattern = format!(r"(?i)\b(?:{})(?:e?s)?\b", FOOD_KEYWORDS.join("|"));
        Ok(Self {
            policy,
            keywords: Regex::new(&pattern)?,
        })
    }

    pub fn policy(&self) -> FoodItemPolicy {
        self.policy
    }

    /// Return food item names in item order, without duplicates or blanks.
    ///
    /// Under the keyword policy matching items are also flagged in place.
    pub fn derive(&self, items: &mut [LineItem]) -> Vec<String> {
        if self.policy == FoodItemPolicy::Keyword {
            for item in items.iter_mut() {
                if self.keywords.is_match(&item.name) {
                    item.is_food = true;
                }
            }
        }

        let mut food_items: Vec<String> = Vec::new();
        for item in items.iter() {
            let selected = match self.policy {
                FoodItemPolicy::ItemFlag => item.is_food,
                FoodItemPolicy::Keyword => self.keywords.is_match(&item.name),
            };
            let name = item.name.trim();
            if selected && !name.is_empty() && !food_items.iter().any(|n| n == &item.name) {
                food_items.push(item.name.clone());
            }
        }
        food_items
    }
}
