use std::{collections::HashMap, str::FromStr, sync::Arc};

use crate::{
    authentication::jwt::Requester,
    database::{
        error::Error,
        schema::{Id, Recipe, RecipeIngredientRow, Relation},
        store::Store,
    },
    export::{self, Attachment, ExportFormat, ShoppingItem, ShoppingList},
};

/// Sums ingredient amounts over `recipes`, keyed by (name, unit) in
/// first-seen order.
pub fn accumulate(recipes: &[Recipe], rows: Vec<RecipeIngredientRow>) -> ShoppingList {
    let mut by_recipe: HashMap<Id, Vec<RecipeIngredientRow>> = HashMap::new();
    for row in rows {
        by_recipe.entry(row.recipe_id).or_default().push(row);
    }

    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut ingredients: Vec<ShoppingItem> = vec![];
    for recipe in recipes {
        for row in by_recipe.remove(&recipe.id).unwrap_or_default() {
            let key = (row.name, row.measurement_unit);
            match positions.get(&key) {
                Some(position) => ingredients[*position].amount += i64::from(row.amount),
                None => {
                    positions.insert(key.clone(), ingredients.len());
                    ingredients.push(ShoppingItem {
                        name: key.0,
                        measurement_unit: key.1,
                        amount: i64::from(row.amount),
                    });
                }
            }
        }
    }

    ShoppingList {
        recipes: recipes.iter().map(|r| r.name.to_owned()).collect(),
        ingredients,
    }
}

/// Renders a user's shopping list in the configured attachment format.
#[derive(Clone)]
pub struct ShoppingListExporter {
    store: Arc<dyn Store>,
    attachment_format: String,
}

impl ShoppingListExporter {
    pub fn new(store: Arc<dyn Store>, attachment_format: &str) -> Self {
        Self {
            store,
            attachment_format: attachment_format.to_string(),
        }
    }

    /// Recipes in shopping list order together with the summed ingredients.
    pub async fn collect(&self, user_id: Id) -> Result<ShoppingList, Error> {
        let entries = self
            .store
            .relation_targets(Relation::ShoppingCart, user_id, None)
            .await?;
        if entries.is_empty() {
            return Ok(ShoppingList::default());
        }

        let mut recipes: HashMap<Id, Recipe> = self
            .store
            .recipes_by_ids(&entries)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let recipes: Vec<Recipe> = entries.iter().filter_map(|id| recipes.remove(id)).collect();

        let rows = self.store.recipe_ingredients(&entries).await?;
        Ok(accumulate(&recipes, rows))
    }

    pub async fn export(&self, requester: &Requester) -> Result<Attachment, Error> {
        let session = requester.authenticated()?;
        let format = ExportFormat::from_str(&self.attachment_format)?;

        let list = self.collect(session.user_id).await?;
        log::debug!(
            "Exporting shopping list of user {} ({} recipes, {} ingredients)",
            session.user_id,
            list.recipes.len(),
            list.ingredients.len()
        );
        export::render(&list, format)
    }
}
