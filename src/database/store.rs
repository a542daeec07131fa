use std::collections::HashSet;

use async_trait::async_trait;

use super::{
    error::Error,
    schema::{
        Id, Ingredient, NewIngredient, NewTag, NewUser, Recipe, RecipeData, RecipeFilter,
        RecipeIngredientRow, RecipeRelations, RecipeTagRow, Relation, Tag, User,
    },
};

/// Persistence seam used by every action.
///
/// Unique pairs (favorites, shopping list entries, follows, recipe
/// ingredients) are enforced by the store itself; `insert_relation` reports a
/// lost race by returning `false` rather than inserting twice.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, Error>;
    async fn get_user(&self, id: Id) -> Result<Option<User>, Error>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error>;
    async fn users_by_ids(&self, ids: &[Id]) -> Result<Vec<User>, Error>;
    /// Users ordered by id together with the total row count.
    async fn list_users(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64), Error>;
    /// Users followed by `user_id`, in follow order, with the total count.
    async fn list_following(
        &self,
        user_id: Id,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error>;
    async fn set_password(&self, id: Id, password: &str) -> Result<(), Error>;
    async fn delete_user(&self, id: Id) -> Result<bool, Error>;

    async fn create_tag(&self, tag: NewTag) -> Result<Tag, Error>;
    async fn get_tag(&self, id: Id) -> Result<Option<Tag>, Error>;
    async fn tags_by_ids(&self, ids: &[Id]) -> Result<Vec<Tag>, Error>;
    async fn list_tags(&self) -> Result<Vec<Tag>, Error>;

    async fn insert_ingredients(&self, ingredients: &[NewIngredient]) -> Result<u64, Error>;
    async fn get_ingredient(&self, id: Id) -> Result<Option<Ingredient>, Error>;
    async fn ingredients_by_ids(&self, ids: &[Id]) -> Result<Vec<Ingredient>, Error>;
    /// Case-insensitive search: prefix matches first, then other substring matches.
    async fn search_ingredients(&self, search: &str) -> Result<Vec<Ingredient>, Error>;

    /// Inserts the recipe and all of its relations atomically.
    async fn create_recipe(
        &self,
        author_id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error>;
    /// Updates the recipe and replaces all of its relations atomically.
    async fn update_recipe(
        &self,
        id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error>;
    async fn delete_recipe(&self, id: Id) -> Result<bool, Error>;
    async fn get_recipe(&self, id: Id) -> Result<Option<Recipe>, Error>;
    async fn recipes_by_ids(&self, ids: &[Id]) -> Result<Vec<Recipe>, Error>;
    async fn recipes_by_authors(&self, author_ids: &[Id]) -> Result<Vec<Recipe>, Error>;
    /// Matching recipes, newest first, together with the total match count.
    async fn list_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Recipe>, i64), Error>;
    async fn recipe_ingredients(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeIngredientRow>, Error>;
    async fn recipe_tags(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeTagRow>, Error>;

    /// Returns `false` when the pair already exists.
    async fn insert_relation(&self, relation: Relation, owner: Id, target: Id)
        -> Result<bool, Error>;
    /// Returns `false` when the pair did not exist.
    async fn delete_relation(&self, relation: Relation, owner: Id, target: Id)
        -> Result<bool, Error>;
    /// Targets of `owner`'s relation rows in insertion order, limited to
    /// `among` when given.
    async fn relation_targets(
        &self,
        relation: Relation,
        owner: Id,
        among: Option<&[Id]>,
    ) -> Result<Vec<Id>, Error>;
}

/// Membership set of `owner`'s relation targets, restricted to `among`.
pub async fn relation_set(
    store: &dyn Store,
    relation: Relation,
    owner: Id,
    among: &[Id],
) -> Result<HashSet<Id>, Error> {
    if among.is_empty() {
        return Ok(HashSet::new());
    }

    Ok(store
        .relation_targets(relation, owner, Some(among))
        .await?
        .into_iter()
        .collect())
}
