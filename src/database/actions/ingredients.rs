use std::sync::Arc;

use crate::{
    authentication::{
        jwt::Requester,
        permissions::{ActionType, PermissionChecker},
    },
    constants::{INGREDIENT_NAME_MAX_LENGTH, MEASUREMENT_UNIT_MAX_LENGTH},
    database::{
        error::{Error, HtmlError},
        form::{max_length, require},
        schema::{Id, Ingredient, NewIngredient},
        store::Store,
    },
};

/// All ingredients, or those whose name contains `search` with prefix
/// matches first.
pub async fn list_ingredients(
    store: &Arc<dyn Store>,
    search: Option<&str>,
) -> Result<Vec<Ingredient>, Error> {
    let search = search.map(str::trim).unwrap_or_default();
    store.search_ingredients(search).await
}

pub async fn get_ingredient(store: &Arc<dyn Store>, id: Id) -> Result<Ingredient, Error> {
    store
        .get_ingredient(id)
        .await?
        .ok_or_else(|| HtmlError::NotFound.new("Ingredient not found"))
}

/// Reads `name,measurement_unit` rows; the whole file is rejected on the
/// first bad row.
pub fn parse_ingredients(data: &[u8]) -> Result<Vec<NewIngredient>, Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);

    let mut ingredients = vec![];
    for (line, record) in reader.deserialize::<NewIngredient>().enumerate() {
        // header is line 1
        let line = line + 2;
        let ingredient = record.map_err(|e| {
            HtmlError::InvalidRequest.new(&format!("Invalid ingredient on line {line}: {e}"))
        })?;

        require("name", &ingredient.name)?;
        max_length("name", &ingredient.name, INGREDIENT_NAME_MAX_LENGTH)?;
        require("measurement_unit", &ingredient.measurement_unit)?;
        max_length(
            "measurement_unit",
            &ingredient.measurement_unit,
            MEASUREMENT_UNIT_MAX_LENGTH,
        )?;

        ingredients.push(ingredient);
    }

    Ok(ingredients)
}

/// Bulk loads reference ingredients from CSV; returns the inserted count.
pub async fn import_ingredients(
    store: &Arc<dyn Store>,
    requester: &Requester,
    data: &[u8],
) -> Result<u64, Error> {
    PermissionChecker.authorize(requester, ActionType::ImportIngredients)?;

    let ingredients = parse_ingredients(data)?;
    let inserted = store.insert_ingredients(&ingredients).await?;
    log::info!("Imported {inserted} ingredients");
    Ok(inserted)
}
