//! In-memory `Store` used by the unit tests.
//!
//! Mirrors the constraints of the Postgres schema: unique indexes, foreign
//! keys and cascading deletes.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    error::{Error, HtmlError},
    schema::{
        Id, Ingredient, NewIngredient, NewTag, NewUser, Recipe, RecipeData, RecipeFilter,
        RecipeIngredientRow, RecipeRelations, RecipeTagRow, Relation, Tag, User, UserRole,
    },
    store::Store,
};

#[derive(Default)]
struct Inner {
    next_id: Id,
    users: Vec<User>,
    tags: Vec<Tag>,
    ingredients: Vec<Ingredient>,
    recipes: Vec<Recipe>,
    /// (recipe, ingredient, amount) in insertion order.
    recipe_ingredients: Vec<(Id, Id, i32)>,
    recipe_tags: Vec<(Id, Id)>,
    relations: HashMap<Relation, Vec<(Id, Id)>>,
}

impl Inner {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn check_relations(&self, relations: &RecipeRelations) -> Result<(), Error> {
        let missing_ingredient = relations
            .ingredients()
            .iter()
            .any(|item| !self.ingredients.iter().any(|i| i.id == item.id));
        let missing_tag = relations
            .tags()
            .iter()
            .any(|id| !self.tags.iter().any(|t| t.id == *id));

        if missing_ingredient || missing_tag {
            return Err(HtmlError::InvalidRequest.new("Referenced object does not exist"));
        }

        let mut seen = Vec::new();
        for item in relations.ingredients() {
            if seen.contains(&item.id) {
                return Err(HtmlError::Conflict.new("Ingredient is already in the recipe"));
            }
            seen.push(item.id);
        }

        Ok(())
    }

    fn insert_relations(&mut self, recipe_id: Id, relations: &RecipeRelations) {
        for item in relations.ingredients() {
            self.recipe_ingredients.push((recipe_id, item.id, item.amount));
        }
        for tag_id in relations.tags() {
            self.recipe_tags.push((recipe_id, *tag_id));
        }
    }

    fn remove_recipe(&mut self, id: Id) {
        self.recipes.retain(|r| r.id != id);
        self.recipe_ingredients.retain(|(recipe_id, _, _)| *recipe_id != id);
        self.recipe_tags.retain(|(recipe_id, _)| *recipe_id != id);
        for relation in [Relation::Favorite, Relation::ShoppingCart] {
            if let Some(rows) = self.relations.get_mut(&relation) {
                rows.retain(|(_, target)| *target != id);
            }
        }
    }

    fn has_relation(&self, relation: Relation, owner: Id, target: Id) -> bool {
        self.relations
            .get(&relation)
            .map(|rows| rows.contains(&(owner, target)))
            .unwrap_or(false)
    }

    fn matches(&self, recipe: &Recipe, filter: &RecipeFilter) -> bool {
        if filter.author.is_some_and(|author| recipe.author_id != author) {
            return false;
        }
        if !filter.tags.is_empty() {
            let tagged = self.recipe_tags.iter().any(|(recipe_id, tag_id)| {
                *recipe_id == recipe.id
                    && self
                        .tags
                        .iter()
                        .any(|t| t.id == *tag_id && filter.tags.contains(&t.slug))
            });
            if !tagged {
                return false;
            }
        }
        if let Some(user_id) = filter.favorited_by {
            if !self.has_relation(Relation::Favorite, user_id, recipe.id) {
                return false;
            }
        }
        if let Some(user_id) = filter.in_shopping_cart_of {
            if !self.has_relation(Relation::ShoppingCart, user_id, recipe.id) {
                return false;
            }
        }
        true
    }
}

fn page<T: Clone>(rows: &[T], limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let page = rows
        .iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect();
    (page, total)
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub async fn seed_user(&self, username: &str, role: UserRole) -> User {
        self.create_user(NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            first_name: username.to_string(),
            last_name: String::from("Tester"),
            password: String::from("not-a-hash"),
            role,
        })
        .await
        .unwrap()
    }

    pub async fn seed_tag(&self, slug: &str, color: &str) -> Tag {
        self.create_tag(NewTag {
            name: slug.to_uppercase(),
            color: color.to_string(),
            slug: slug.to_string(),
        })
        .await
        .unwrap()
    }

    pub async fn seed_ingredient(&self, name: &str, measurement_unit: &str) -> Ingredient {
        self.insert_ingredients(&[NewIngredient {
            name: name.to_string(),
            measurement_unit: measurement_unit.to_string(),
        }])
        .await
        .unwrap();
        self.lock().ingredients.last().cloned().unwrap()
    }

    /// Number of `relation_targets` calls served so far.
    pub fn relation_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn recipe_count(&self) -> usize {
        self.lock().recipes.len()
    }

    pub fn relation_count(&self, relation: Relation) -> usize {
        self.lock()
            .relations
            .get(&relation)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, Error> {
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.username == user.username) {
            return Err(HtmlError::Conflict.new("A user with that username already exists"));
        }
        if inner.users.iter().any(|u| u.email == user.email) {
            return Err(HtmlError::Conflict.new("A user with that email already exists"));
        }

        let row = User {
            id: inner.next_id(),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password: user.password,
            role: user.role,
        };
        inner.users.push(row.clone());
        Ok(row)
    }

    async fn get_user(&self, id: Id) -> Result<Option<User>, Error> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        Ok(self.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn users_by_ids(&self, ids: &[Id]) -> Result<Vec<User>, Error> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64), Error> {
        Ok(page(&self.lock().users, limit, offset))
    }

    async fn list_following(
        &self,
        user_id: Id,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error> {
        let inner = self.lock();
        let following: Vec<User> = inner
            .relations
            .get(&Relation::Follow)
            .into_iter()
            .flatten()
            .filter(|(owner, _)| *owner == user_id)
            .filter_map(|(_, target)| inner.users.iter().find(|u| u.id == *target).cloned())
            .collect();
        Ok(page(&following, limit, offset))
    }

    async fn set_password(&self, id: Id, password: &str) -> Result<(), Error> {
        if let Some(user) = self.lock().users.iter_mut().find(|u| u.id == id) {
            user.password = password.to_string();
        }
        Ok(())
    }

    async fn delete_user(&self, id: Id) -> Result<bool, Error> {
        let mut inner = self.lock();
        let before = inner.users.len();
        inner.users.retain(|u| u.id != id);
        if inner.users.len() == before {
            return Ok(false);
        }

        let owned: Vec<Id> = inner
            .recipes
            .iter()
            .filter(|r| r.author_id == id)
            .map(|r| r.id)
            .collect();
        for recipe_id in owned {
            inner.remove_recipe(recipe_id);
        }
        for (relation, rows) in inner.relations.iter_mut() {
            rows.retain(|(owner, target)| {
                *owner != id && !(*relation == Relation::Follow && *target == id)
            });
        }
        Ok(true)
    }

    async fn create_tag(&self, tag: NewTag) -> Result<Tag, Error> {
        let mut inner = self.lock();
        if inner
            .tags
            .iter()
            .any(|t| t.name == tag.name || t.color == tag.color || t.slug == tag.slug)
        {
            return Err(HtmlError::Conflict.new("A tag with that name, color or slug already exists"));
        }

        let row = Tag {
            id: inner.next_id(),
            name: tag.name,
            color: tag.color,
            slug: tag.slug,
        };
        inner.tags.push(row.clone());
        Ok(row)
    }

    async fn get_tag(&self, id: Id) -> Result<Option<Tag>, Error> {
        Ok(self.lock().tags.iter().find(|t| t.id == id).cloned())
    }

    async fn tags_by_ids(&self, ids: &[Id]) -> Result<Vec<Tag>, Error> {
        Ok(self
            .lock()
            .tags
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, Error> {
        let mut tags = self.lock().tags.clone();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn insert_ingredients(&self, ingredients: &[NewIngredient]) -> Result<u64, Error> {
        let mut inner = self.lock();
        for ingredient in ingredients {
            let id = inner.next_id();
            inner.ingredients.push(Ingredient {
                id,
                name: ingredient.name.to_owned(),
                measurement_unit: ingredient.measurement_unit.to_owned(),
            });
        }
        Ok(ingredients.len() as u64)
    }

    async fn get_ingredient(&self, id: Id) -> Result<Option<Ingredient>, Error> {
        Ok(self.lock().ingredients.iter().find(|i| i.id == id).cloned())
    }

    async fn ingredients_by_ids(&self, ids: &[Id]) -> Result<Vec<Ingredient>, Error> {
        Ok(self
            .lock()
            .ingredients
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .collect())
    }

    async fn search_ingredients(&self, search: &str) -> Result<Vec<Ingredient>, Error> {
        let search = search.to_lowercase();
        let mut rows: Vec<Ingredient> = self
            .lock()
            .ingredients
            .iter()
            .filter(|i| i.name.to_lowercase().contains(&search))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let a_prefix = a.name.to_lowercase().starts_with(&search);
            let b_prefix = b.name.to_lowercase().starts_with(&search);
            b_prefix
                .cmp(&a_prefix)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    async fn create_recipe(
        &self,
        author_id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let mut inner = self.lock();
        if !inner.users.iter().any(|u| u.id == author_id) {
            return Err(HtmlError::InvalidRequest.new("Referenced object does not exist"));
        }
        inner.check_relations(relations)?;

        let recipe = Recipe {
            id: inner.next_id(),
            author_id,
            name: data.name,
            text: data.text,
            image: data.image,
            cooking_time: data.cooking_time,
            pub_date: Utc::now(),
        };
        inner.recipes.push(recipe.clone());
        inner.insert_relations(recipe.id, relations);
        Ok(recipe)
    }

    async fn update_recipe(
        &self,
        id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let mut inner = self.lock();
        inner.check_relations(relations)?;

        let Some(recipe) = inner.recipes.iter_mut().find(|r| r.id == id) else {
            return Err(HtmlError::NotFound.new("Recipe not found"));
        };
        recipe.name = data.name;
        recipe.text = data.text;
        recipe.image = data.image;
        recipe.cooking_time = data.cooking_time;
        let recipe = recipe.clone();

        inner.recipe_ingredients.retain(|(recipe_id, _, _)| *recipe_id != id);
        inner.recipe_tags.retain(|(recipe_id, _)| *recipe_id != id);
        inner.insert_relations(id, relations);
        Ok(recipe)
    }

    async fn delete_recipe(&self, id: Id) -> Result<bool, Error> {
        let mut inner = self.lock();
        if !inner.recipes.iter().any(|r| r.id == id) {
            return Ok(false);
        }
        inner.remove_recipe(id);
        Ok(true)
    }

    async fn get_recipe(&self, id: Id) -> Result<Option<Recipe>, Error> {
        Ok(self.lock().recipes.iter().find(|r| r.id == id).cloned())
    }

    async fn recipes_by_ids(&self, ids: &[Id]) -> Result<Vec<Recipe>, Error> {
        Ok(self
            .lock()
            .recipes
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn recipes_by_authors(&self, author_ids: &[Id]) -> Result<Vec<Recipe>, Error> {
        let mut rows: Vec<Recipe> = self
            .lock()
            .recipes
            .iter()
            .filter(|r| author_ids.contains(&r.author_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn list_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Recipe>, i64), Error> {
        let inner = self.lock();
        let mut rows: Vec<Recipe> = inner
            .recipes
            .iter()
            .filter(|r| inner.matches(r, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then_with(|| b.id.cmp(&a.id)));
        Ok(page(&rows, limit, offset))
    }

    async fn recipe_ingredients(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeIngredientRow>, Error> {
        let inner = self.lock();
        Ok(inner
            .recipe_ingredients
            .iter()
            .filter(|(recipe_id, _, _)| recipe_ids.contains(recipe_id))
            .filter_map(|(recipe_id, ingredient_id, amount)| {
                inner
                    .ingredients
                    .iter()
                    .find(|i| i.id == *ingredient_id)
                    .map(|i| RecipeIngredientRow {
                        recipe_id: *recipe_id,
                        ingredient_id: i.id,
                        name: i.name.to_owned(),
                        measurement_unit: i.measurement_unit.to_owned(),
                        amount: *amount,
                    })
            })
            .collect())
    }

    async fn recipe_tags(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeTagRow>, Error> {
        let inner = self.lock();
        let mut rows: Vec<RecipeTagRow> = inner
            .recipe_tags
            .iter()
            .filter(|(recipe_id, _)| recipe_ids.contains(recipe_id))
            .filter_map(|(recipe_id, tag_id)| {
                inner
                    .tags
                    .iter()
                    .find(|t| t.id == *tag_id)
                    .map(|t| RecipeTagRow {
                        recipe_id: *recipe_id,
                        id: t.id,
                        name: t.name.to_owned(),
                        color: t.color.to_owned(),
                        slug: t.slug.to_owned(),
                    })
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn insert_relation(
        &self,
        relation: Relation,
        owner: Id,
        target: Id,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        if inner.has_relation(relation, owner, target) {
            return Ok(false);
        }
        inner.relations.entry(relation).or_default().push((owner, target));
        Ok(true)
    }

    async fn delete_relation(
        &self,
        relation: Relation,
        owner: Id,
        target: Id,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        let Some(rows) = inner.relations.get_mut(&relation) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| *row != (owner, target));
        Ok(rows.len() < before)
    }

    async fn relation_targets(
        &self,
        relation: Relation,
        owner: Id,
        among: Option<&[Id]>,
    ) -> Result<Vec<Id>, Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .relations
            .get(&relation)
            .into_iter()
            .flatten()
            .filter(|(row_owner, target)| {
                *row_owner == owner && among.map_or(true, |ids| ids.contains(target))
            })
            .map(|(_, target)| *target)
            .collect())
    }
}
