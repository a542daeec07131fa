use std::{collections::HashSet, sync::Arc};

use crate::{
    constants::{MAX_AMOUNT, MIN_AMOUNT},
    database::{
        error::{Error, HtmlError},
        schema::{Id, IngredientAmount, Recipe, RecipeData, RecipeRelations},
        store::Store,
    },
};

/// Checks a recipe's ingredient/tag input and writes it together with the
/// recipe row.
#[derive(Clone)]
pub struct RelationHelper {
    store: Arc<dyn Store>,
}

fn first_repeat(ids: impl IntoIterator<Item = Id>) -> Option<Id> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

impl RelationHelper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Shape checks only; the first failing check is returned.
    pub fn validate(ingredients: &[IngredientAmount], tags: &[Id]) -> Result<RecipeRelations, Error> {
        if ingredients.is_empty() {
            return Err(HtmlError::InvalidRequest.field("ingredients", "ingredients not provided"));
        }
        if let Some(item) = ingredients
            .iter()
            .find(|item| !(MIN_AMOUNT..=MAX_AMOUNT).contains(&item.amount))
        {
            return Err(HtmlError::InvalidRequest.field(
                "ingredients",
                &format!(
                    "amount of ingredient {} must be between {MIN_AMOUNT} and {MAX_AMOUNT}",
                    item.id
                ),
            ));
        }
        if first_repeat(ingredients.iter().map(|item| item.id)).is_some() {
            return Err(HtmlError::InvalidRequest.field("ingredients", "ingredients repeated"));
        }

        if tags.is_empty() {
            return Err(HtmlError::InvalidRequest.field("tags", "tags not provided"));
        }
        if first_repeat(tags.iter().copied()).is_some() {
            return Err(HtmlError::InvalidRequest.field("tags", "tags repeated"));
        }

        Ok(RecipeRelations::new(ingredients.to_vec(), tags.to_vec()))
    }

    /// `validate` plus a lookup that every referenced ingredient and tag exists.
    pub async fn resolve(
        &self,
        ingredients: &[IngredientAmount],
        tags: &[Id],
    ) -> Result<RecipeRelations, Error> {
        let relations = Self::validate(ingredients, tags)?;

        let ingredient_ids: Vec<Id> = relations.ingredients().iter().map(|i| i.id).collect();
        let known: HashSet<Id> = self
            .store
            .ingredients_by_ids(&ingredient_ids)
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();
        if let Some(id) = ingredient_ids.iter().find(|id| !known.contains(id)) {
            return Err(HtmlError::InvalidRequest
                .field("ingredients", &format!("ingredient {id} does not exist")));
        }

        let known: HashSet<Id> = self
            .store
            .tags_by_ids(relations.tags())
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        if let Some(id) = relations.tags().iter().find(|id| !known.contains(id)) {
            return Err(HtmlError::InvalidRequest.field("tags", &format!("tag {id} does not exist")));
        }

        Ok(relations)
    }

    pub async fn create(
        &self,
        author_id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let recipe = self.store.create_recipe(author_id, data, relations).await?;
        log::info!(
            "Created recipe {} with {} ingredients and {} tags",
            recipe.id,
            relations.ingredients().len(),
            relations.tags().len()
        );
        Ok(recipe)
    }

    /// Replaces the recipe's fields and its whole ingredient/tag set.
    pub async fn replace(
        &self,
        recipe_id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let recipe = self.store.update_recipe(recipe_id, data, relations).await?;
        log::info!("Replaced relations of recipe {}", recipe.id);
        Ok(recipe)
    }
}
