use std::sync::Arc;

use crate::{
    authentication::{
        jwt::Requester,
        permissions::{ActionType, PermissionChecker},
    },
    config::Settings,
    database::{
        error::{Error, HtmlError},
        form::RecipeForm,
        pagination::{PageContext, PageParams},
        schema::{Id, Recipe, RecipeFilter, RecipeView},
        store::Store,
    },
    media::MediaStorage,
};

use super::{annotate::RecipeAnnotator, relations::RelationHelper};

/// Query of the recipe list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeQuery {
    pub author: Option<Id>,
    /// Tag slugs; any match is enough.
    pub tags: Vec<String>,
    pub is_favorited: Option<bool>,
    pub is_in_shopping_cart: Option<bool>,
    pub page: PageParams,
}

/// Recipe resource: list, retrieve, create, update and delete.
#[derive(Clone)]
pub struct RecipeHandler {
    store: Arc<dyn Store>,
    permissions: PermissionChecker,
    relations: RelationHelper,
    annotator: RecipeAnnotator,
    media: MediaStorage,
    page_size: i64,
}

impl RecipeHandler {
    pub fn new(store: Arc<dyn Store>, settings: &Settings) -> Self {
        Self {
            permissions: PermissionChecker,
            relations: RelationHelper::new(store.clone()),
            annotator: RecipeAnnotator::new(store.clone()),
            media: MediaStorage::new(&settings.media),
            page_size: settings.pagination.recipes,
            store,
        }
    }

    async fn find(&self, id: Id) -> Result<Recipe, Error> {
        self.store
            .get_recipe(id)
            .await?
            .ok_or_else(|| HtmlError::NotFound.new("Recipe not found"))
    }

    pub async fn list(
        &self,
        requester: &Requester,
        query: &RecipeQuery,
    ) -> Result<PageContext<RecipeView>, Error> {
        let window = query.page.window(self.page_size)?;

        let mut filter = RecipeFilter {
            author: query.author,
            tags: query.tags.to_owned(),
            ..Default::default()
        };
        if query.is_favorited == Some(true) {
            match requester.user_id() {
                Some(user_id) => filter.favorited_by = Some(user_id),
                None => return Ok(PageContext::no_rows()),
            }
        }
        if query.is_in_shopping_cart == Some(true) {
            match requester.user_id() {
                Some(user_id) => filter.in_shopping_cart_of = Some(user_id),
                None => return Ok(PageContext::no_rows()),
            }
        }

        let (rows, total) = self
            .store
            .list_recipes(&filter, window.limit, window.offset)
            .await?;
        log::debug!("Listing {} of {} recipes", rows.len(), total);

        let views = self.annotator.recipes(rows, requester).await?;
        PageContext::from_rows(views, total, window)
    }

    pub async fn retrieve(&self, requester: &Requester, id: Id) -> Result<RecipeView, Error> {
        let recipe = self.find(id).await?;
        self.annotator.recipe(recipe, requester).await
    }

    pub async fn create(&self, requester: &Requester, form: RecipeForm) -> Result<RecipeView, Error> {
        let session = self
            .permissions
            .authorize(requester, ActionType::CreateRecipes)?;

        form.validate_fields(true)?;
        let relations = self.relations.resolve(&form.ingredients, &form.tags).await?;

        let image = match form.image.as_deref() {
            Some(image) => Some(self.media.save_data_url(image).await?),
            None => None,
        };
        let created = self
            .relations
            .create(session.user_id, form.data(image.clone()), &relations)
            .await;
        let recipe = match created {
            Ok(recipe) => recipe,
            Err(e) => return Err(self.discard_image(image, e).await),
        };

        self.annotator.recipe(recipe, requester).await
    }

    /// Replaces fields and relations; the stored image is kept when the
    /// form carries none.
    pub async fn update(
        &self,
        requester: &Requester,
        id: Id,
        form: RecipeForm,
    ) -> Result<RecipeView, Error> {
        let session = requester.authenticated()?;
        let recipe = self.find(id).await?;
        self.permissions.can_modify_recipe(session, &recipe)?;

        form.validate_fields(false)?;
        let relations = self.relations.resolve(&form.ingredients, &form.tags).await?;

        let uploaded = match form.image.as_deref() {
            Some(image) => Some(self.media.save_data_url(image).await?),
            None => None,
        };
        let image = uploaded.clone().or(recipe.image);
        let replaced = self.relations.replace(id, form.data(image), &relations).await;
        let recipe = match replaced {
            Ok(recipe) => recipe,
            Err(e) => return Err(self.discard_image(uploaded, e).await),
        };

        self.annotator.recipe(recipe, requester).await
    }

    /// Drops an image written for a recipe whose store write failed.
    async fn discard_image(&self, image: Option<String>, error: Error) -> Error {
        if let Some(image) = image {
            self.media.discard(&image).await;
        }
        error
    }

    pub async fn delete(&self, requester: &Requester, id: Id) -> Result<(), Error> {
        let session = requester.authenticated()?;
        let recipe = self.find(id).await?;
        self.permissions.can_modify_recipe(session, &recipe)?;

        if !self.store.delete_recipe(id).await? {
            return Err(HtmlError::NotFound.new("Recipe not found"));
        }
        log::info!("User {} deleted recipe {}", session.user_id, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authentication::jwt::SessionData,
        config::MediaSection,
        database::{
            memory::MemoryStore,
            schema::{Ingredient, IngredientAmount, Relation, Tag, User, UserRole},
        },
    };

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    struct Setup {
        media: tempfile::TempDir,
        store: Arc<MemoryStore>,
        handler: RecipeHandler,
        author: User,
        reader: User,
        admin: User,
        flour: Ingredient,
        salt: Ingredient,
        breakfast: Tag,
        dinner: Tag,
    }

    fn requester(user: &User) -> Requester {
        Requester::User(SessionData::from(user))
    }

    async fn setup() -> Setup {
        let media = tempfile::tempdir().unwrap();
        let settings = Settings {
            media: MediaSection {
                root: media.path().to_path_buf(),
                url: "/media/".to_string(),
            },
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::new());
        Setup {
            handler: RecipeHandler::new(store.clone(), &settings),
            author: store.seed_user("author", UserRole::User).await,
            reader: store.seed_user("reader", UserRole::User).await,
            admin: store.seed_user("admin", UserRole::Admin).await,
            flour: store.seed_ingredient("Flour", "g").await,
            salt: store.seed_ingredient("Salt", "g").await,
            breakfast: store.seed_tag("breakfast", "#ff0").await,
            dinner: store.seed_tag("dinner", "#00f").await,
            store,
            media,
        }
    }

    fn form(setup: &Setup, name: &str, ingredients: Vec<IngredientAmount>) -> RecipeForm {
        RecipeForm {
            name: name.to_string(),
            text: "Mix everything".to_string(),
            image: Some(PNG.to_string()),
            cooking_time: 20,
            ingredients,
            tags: vec![setup.breakfast.id],
        }
    }

    fn amount(ingredient: &Ingredient, amount: i32) -> IngredientAmount {
        IngredientAmount {
            id: ingredient.id,
            amount,
        }
    }

    #[tokio::test]
    async fn create_returns_annotated_view() {
        let setup = setup().await;
        let author = requester(&setup.author);

        let view = setup
            .handler
            .create(&author, form(&setup, "Pancakes", vec![amount(&setup.flour, 200)]))
            .await
            .unwrap();

        assert_eq!(view.author.username, "author");
        assert_eq!(view.ingredients[0].name, "Flour");
        assert_eq!(view.tags[0].slug, "breakfast");
        assert!(view.image.unwrap().starts_with("/media/recipes/images/"));
        assert!(!view.is_favorited);
    }

    #[tokio::test]
    async fn repeated_ingredient_creates_nothing() {
        let setup = setup().await;
        let author = requester(&setup.author);

        let error = setup
            .handler
            .create(
                &author,
                form(&setup, "Salty", vec![amount(&setup.salt, 1), amount(&setup.salt, 2)]),
            )
            .await
            .unwrap_err();

        assert_eq!(error.info.as_deref(), Some("ingredients repeated"));
        assert_eq!(setup.store.recipe_count(), 0);
    }

    #[tokio::test]
    async fn field_errors_come_before_relation_errors() {
        let setup = setup().await;
        let mut form = form(&setup, "", vec![]);
        form.image = None;

        let error = setup
            .handler
            .create(&requester(&setup.author), form)
            .await
            .unwrap_err();
        assert_eq!(error.field.as_deref(), Some("name"));
    }

    #[tokio::test]
    async fn anonymous_cannot_create() {
        let setup = setup().await;
        let error = setup
            .handler
            .create(&Requester::Anonymous, form(&setup, "Tea", vec![amount(&setup.salt, 1)]))
            .await
            .unwrap_err();
        assert_eq!(error.code, 401);
    }

    #[tokio::test]
    async fn update_replaces_and_keeps_image() {
        let setup = setup().await;
        let author = requester(&setup.author);
        let created = setup
            .handler
            .create(
                &author,
                form(&setup, "Bread", vec![amount(&setup.flour, 2), amount(&setup.salt, 3)]),
            )
            .await
            .unwrap();

        let mut update = form(&setup, "Better bread", vec![amount(&setup.flour, 5)]);
        update.image = None;
        update.tags = vec![setup.dinner.id];
        let updated = setup.handler.update(&author, created.id, update).await.unwrap();

        assert_eq!(updated.name, "Better bread");
        assert_eq!(updated.ingredients.len(), 1);
        assert_eq!((updated.ingredients[0].id, updated.ingredients[0].amount), (setup.flour.id, 5));
        assert_eq!(updated.tags.len(), 1);
        assert_eq!(updated.tags[0].slug, "dinner");
        assert_eq!(updated.image, created.image);
        assert_eq!(updated.pub_date, created.pub_date);
    }

    #[tokio::test]
    async fn only_author_or_admin_may_mutate() {
        let setup = setup().await;
        let created = setup
            .handler
            .create(&requester(&setup.author), form(&setup, "Soup", vec![amount(&setup.salt, 1)]))
            .await
            .unwrap();

        let error = setup
            .handler
            .update(
                &requester(&setup.reader),
                created.id,
                form(&setup, "Mine now", vec![amount(&setup.salt, 1)]),
            )
            .await
            .unwrap_err();
        assert_eq!(error.code, 403);

        let error = setup
            .handler
            .delete(&requester(&setup.reader), created.id)
            .await
            .unwrap_err();
        assert_eq!(error.code, 403);

        setup
            .handler
            .delete(&requester(&setup.admin), created.id)
            .await
            .unwrap();
        let error = setup
            .handler
            .retrieve(&Requester::Anonymous, created.id)
            .await
            .unwrap_err();
        assert_eq!(error.code, 404);
    }

    #[tokio::test]
    async fn anonymous_list_has_no_flags() {
        let setup = setup().await;
        let author = requester(&setup.author);
        for name in ["One", "Two", "Three"] {
            let created = setup
                .handler
                .create(&author, form(&setup, name, vec![amount(&setup.flour, 1)]))
                .await
                .unwrap();
            setup
                .store
                .insert_relation(Relation::Favorite, setup.author.id, created.id)
                .await
                .unwrap();
        }

        let page = setup
            .handler
            .list(&Requester::Anonymous, &RecipeQuery::default())
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        assert!(page
            .results
            .iter()
            .all(|r| !r.is_favorited && !r.is_in_shopping_cart));
        assert_eq!(page.results[0].name, "Three");

        let page = setup.handler.list(&author, &RecipeQuery::default()).await.unwrap();
        assert!(page.results.iter().all(|r| r.is_favorited));
    }

    #[tokio::test]
    async fn list_filters() {
        let setup = setup().await;
        let author = requester(&setup.author);
        let reader = requester(&setup.reader);

        let breakfast = setup
            .handler
            .create(&author, form(&setup, "Porridge", vec![amount(&setup.flour, 1)]))
            .await
            .unwrap();
        let mut dinner = form(&setup, "Stew", vec![amount(&setup.salt, 1)]);
        dinner.tags = vec![setup.dinner.id];
        setup.handler.create(&reader, dinner).await.unwrap();
        setup
            .store
            .insert_relation(Relation::ShoppingCart, setup.reader.id, breakfast.id)
            .await
            .unwrap();

        let by_tag = RecipeQuery {
            tags: vec!["dinner".to_string()],
            ..Default::default()
        };
        let page = setup.handler.list(&reader, &by_tag).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].name, "Stew");

        let by_author = RecipeQuery {
            author: Some(setup.author.id),
            ..Default::default()
        };
        assert_eq!(setup.handler.list(&reader, &by_author).await.unwrap().count, 1);

        let in_cart = RecipeQuery {
            is_in_shopping_cart: Some(true),
            ..Default::default()
        };
        let page = setup.handler.list(&reader, &in_cart).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.results[0].is_in_shopping_cart);

        let page = setup.handler.list(&Requester::Anonymous, &in_cart).await.unwrap();
        assert_eq!(page.count, 0);
    }

    #[tokio::test]
    async fn list_paginates() {
        let setup = setup().await;
        let author = requester(&setup.author);
        for i in 0..5 {
            setup
                .handler
                .create(&author, form(&setup, &format!("Dish {i}"), vec![amount(&setup.flour, 1)]))
                .await
                .unwrap();
        }

        let query = RecipeQuery {
            page: PageParams::new(2, 2),
            ..Default::default()
        };
        let page = setup.handler.list(&author, &query).await.unwrap();
        assert_eq!(page.count, 5);
        assert_eq!(page.next, Some(3));
        assert_eq!(page.previous, Some(1));
        assert_eq!(page.results[0].name, "Dish 2");

        let past_the_end = RecipeQuery {
            page: PageParams::new(4, 2),
            ..Default::default()
        };
        let error = setup.handler.list(&author, &past_the_end).await.unwrap_err();
        assert_eq!(error.kind(), HtmlError::NotFound);
    }

    fn stored_images(setup: &Setup) -> usize {
        std::fs::read_dir(setup.media.path().join("recipes/images"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn failed_store_write_leaves_no_image() {
        let setup = setup().await;
        let ghost = Requester::User(SessionData {
            user_id: 999,
            username: "ghost".to_string(),
            role: UserRole::User,
            is_admin: false,
        });

        let error = setup
            .handler
            .create(&ghost, form(&setup, "Nothing", vec![amount(&setup.flour, 1)]))
            .await
            .unwrap_err();
        assert_eq!(error.code, 400);
        assert_eq!(stored_images(&setup), 0);

        let author = requester(&setup.author);
        setup
            .handler
            .create(&author, form(&setup, "Kept", vec![amount(&setup.flour, 1)]))
            .await
            .unwrap();
        assert_eq!(stored_images(&setup), 1);
    }
}
