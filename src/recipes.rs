//! Recipe suggestions for the food items on a receipt.

use crate::error::PipelineError;
use crate::json_repair::parse_llm_json;
use crate::llm::{LanguageModel, Prompt};
use crate::receipt::{lenient_string, lenient_string_list, Recipe};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Suggestions beyond this count are dropped.
pub const MAX_RECIPES: usize = 3;

const SYSTEM_PROMPT: &str = "You are a helpful chef that suggests recipes based on available \
ingredients. Always answer with a single valid JSON object and nothing else.";

pub struct RecipeSuggester {
    model: Arc<dyn LanguageModel>,
}

impl RecipeSuggester {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Ask the model for 2-3 recipes. Empty input returns no recipes
    /// without calling the model.
    pub async fn suggest_recipes(&self, food_items: &[String]) -> Result<Vec<Recipe>, PipelineError> {
        if food_items.is_empty() {
            return Ok(Vec::new());
        }

        info!("Requesting recipes for {} food items", food_items.len());

        let response = self
            .model
            .complete(&build_prompt(food_items), true)
            .await
            .map_err(|e| PipelineError::RecipeGenerationFailed(format!("{:#}", e)))?;

        let payload: RecipePayload = parse_llm_json(&response)
            .map_err(|e| PipelineError::RecipeGenerationFailed(format!("{:#}", e)))?;

        let recipes = usable_recipes(payload.into_recipes());
        if recipes.is_empty() {
            return Err(PipelineError::RecipeGenerationFailed(
                "model returned no usable recipes".to_string(),
            ));
        }

        info!("Generated {} recipe suggestions", recipes.len());
        Ok(recipes)
    }
}

pub fn build_prompt(food_items: &[String]) -> Prompt {
    let user = format!(
        r#"Based on these ingredients: {}

Suggest 2-3 recipes that could be made using some or all of these ingredients.
For each recipe provide:
1. Recipe name
2. Additional ingredients needed
3. Step-by-step instructions
4. Estimated cooking time
5. Difficulty level (Easy/Medium/Hard)

Format as JSON:
{{
  "recipes": [
    {{
      "name": "recipe name",
      "additional_ingredients": ["list of additional ingredients needed"],
      "instructions": ["list of steps"],
      "cooking_time": "estimated time",
      "difficulty": "Easy|Medium|Hard"
    }}
  ]
}}"#,
        food_items.join(", ")
    );
    Prompt::new(SYSTEM_PROMPT, user)
}

/// Drop incomplete recipes and cap the list at [`MAX_RECIPES`].
fn usable_recipes(candidates: Vec<ExtractedRecipe>) -> Vec<Recipe> {
    let total = candidates.len();
    let recipes: Vec<Recipe> = candidates
        .into_iter()
        .filter(|r| !r.name.trim().is_empty() && !r.instructions.is_empty())
        .take(MAX_RECIPES)
        .map(ExtractedRecipe::into_recipe)
        .collect();

    if recipes.len() < total {
        warn!("Kept {} of {} suggested recipes", recipes.len(), total);
    }
    recipes
}

// ============================================================================
// Helper types for LLM response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecipePayload {
    Wrapped { recipes: Vec<ExtractedRecipe> },
    Bare(Vec<ExtractedRecipe>),
}

impl RecipePayload {
    fn into_recipes(self) -> Vec<ExtractedRecipe> {
        match self {
            RecipePayload::Wrapped { recipes } | RecipePayload::Bare(recipes) => recipes,
        }
    }
}

/// Also accepts the shorter `ingredients` / `time` names some prompts elicit.
/// When both spellings are present the long one wins.
#[derive(Debug, Deserialize)]
struct ExtractedRecipe {
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    additional_ingredients: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    ingredients: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    instructions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    cooking_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    difficulty: String,
}

impl ExtractedRecipe {
    fn into_recipe(self) -> Recipe {
        Recipe {
            name: self.name,
            additional_ingredients: if self.additional_ingredients.is_empty() {
                self.ingredients
            } else {
                self.additional_ingredients
            },
            instructions: self.instructions,
            cooking_time: if self.cooking_time.is_empty() {
                self.time
            } else {
                self.cooking_time
            },
            difficulty: self.difficulty,
        }
    }
}
