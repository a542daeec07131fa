use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    authentication::jwt::Requester,
    database::{
        error::{Error, HtmlError},
        schema::{
            Id, IngredientAmountView, Recipe, RecipeShortView, RecipeView, Relation,
            SubscriptionView, Tag, User, UserView,
        },
        store::{relation_set, Store},
    },
};

/// Builds requester-relative read views in a fixed number of store calls,
/// whatever the number of rows.
#[derive(Clone)]
pub struct RecipeAnnotator {
    store: Arc<dyn Store>,
}

impl RecipeAnnotator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn memberships(
        &self,
        requester: &Requester,
        relation: Relation,
        among: &[Id],
    ) -> Result<HashSet<Id>, Error> {
        match requester.user_id() {
            Some(user_id) => relation_set(self.store.as_ref(), relation, user_id, among).await,
            None => Ok(HashSet::new()),
        }
    }

    pub async fn users(&self, users: &[User], requester: &Requester) -> Result<Vec<UserView>, Error> {
        let ids: Vec<Id> = users.iter().map(|u| u.id).collect();
        let followed = self.memberships(requester, Relation::Follow, &ids).await?;

        Ok(users
            .iter()
            .map(|user| UserView::new(user, followed.contains(&user.id)))
            .collect())
    }

    pub async fn user(&self, user: &User, requester: &Requester) -> Result<UserView, Error> {
        let mut views = self.users(std::slice::from_ref(user), requester).await?;
        views
            .pop()
            .ok_or_else(|| HtmlError::Internal.new("Failed to build user view"))
    }

    pub async fn recipes(
        &self,
        recipes: Vec<Recipe>,
        requester: &Requester,
    ) -> Result<Vec<RecipeView>, Error> {
        if recipes.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<Id> = recipes.iter().map(|r| r.id).collect();
        let favorited = self.memberships(requester, Relation::Favorite, &ids).await?;
        let in_cart = self.memberships(requester, Relation::ShoppingCart, &ids).await?;

        let mut author_ids: Vec<Id> = recipes.iter().map(|r| r.author_id).collect();
        author_ids.sort_unstable();
        author_ids.dedup();
        let authors = self.store.users_by_ids(&author_ids).await?;
        let authors: HashMap<Id, UserView> = self
            .users(&authors, requester)
            .await?
            .into_iter()
            .map(|view| (view.id, view))
            .collect();

        let mut ingredients: HashMap<Id, Vec<IngredientAmountView>> = HashMap::new();
        for row in self.store.recipe_ingredients(&ids).await? {
            ingredients.entry(row.recipe_id).or_default().push(row.into());
        }
        let mut tags: HashMap<Id, Vec<Tag>> = HashMap::new();
        for row in self.store.recipe_tags(&ids).await? {
            tags.entry(row.recipe_id).or_default().push(row.into());
        }

        recipes
            .into_iter()
            .map(|recipe| {
                let author = authors.get(&recipe.author_id).cloned().ok_or_else(|| {
                    HtmlError::Internal.new(&format!("Author of recipe {} is missing", recipe.id))
                })?;

                Ok(RecipeView {
                    id: recipe.id,
                    tags: tags.remove(&recipe.id).unwrap_or_default(),
                    author,
                    ingredients: ingredients.remove(&recipe.id).unwrap_or_default(),
                    is_favorited: favorited.contains(&recipe.id),
                    is_in_shopping_cart: in_cart.contains(&recipe.id),
                    name: recipe.name,
                    image: recipe.image,
                    text: recipe.text,
                    cooking_time: recipe.cooking_time,
                    pub_date: recipe.pub_date,
                })
            })
            .collect()
    }

    pub async fn recipe(&self, recipe: Recipe, requester: &Requester) -> Result<RecipeView, Error> {
        let mut views = self.recipes(vec![recipe], requester).await?;
        views
            .pop()
            .ok_or_else(|| HtmlError::Internal.new("Failed to build recipe view"))
    }

    /// Followed authors with their recipes, newest first, truncated to
    /// `recipes_limit` when given.
    pub async fn subscriptions(
        &self,
        users: &[User],
        requester: &Requester,
        recipes_limit: Option<usize>,
    ) -> Result<Vec<SubscriptionView>, Error> {
        if users.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<Id> = users.iter().map(|u| u.id).collect();
        let mut recipes: HashMap<Id, Vec<Recipe>> = HashMap::new();
        for recipe in self.store.recipes_by_authors(&ids).await? {
            recipes.entry(recipe.author_id).or_default().push(recipe);
        }

        Ok(self
            .users(users, requester)
            .await?
            .into_iter()
            .map(|user| {
                let authored = recipes.remove(&user.id).unwrap_or_default();
                let recipes_count = authored.len() as i64;
                let limit = recipes_limit.unwrap_or(authored.len());

                SubscriptionView {
                    user,
                    recipes: authored.iter().take(limit).map(RecipeShortView::from).collect(),
                    recipes_count,
                }
            })
            .collect())
    }
}
