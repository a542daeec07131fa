use std::sync::Arc;

use crate::{
    authentication::{
        jwt::Requester,
        permissions::{ActionType, PermissionChecker},
    },
    database::{
        error::{Error, HtmlError},
        schema::{Id, RecipeShortView, Relation, SubscriptionView},
        store::Store,
    },
};

use super::annotate::RecipeAnnotator;

fn action(relation: Relation) -> ActionType {
    match relation {
        Relation::Favorite => ActionType::ManageOwnFavorites,
        Relation::ShoppingCart => ActionType::ManageOwnShoppingList,
        Relation::Follow => ActionType::ManageOwnSubscriptions,
    }
}

/// Create/delete of favorites, shopping list entries and follows.
///
/// Each (user, target) pair is either present or absent; the store's unique
/// index decides between two concurrent creates.
#[derive(Clone)]
pub struct RelationToggles {
    store: Arc<dyn Store>,
    permissions: PermissionChecker,
    annotator: RecipeAnnotator,
}

impl RelationToggles {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            annotator: RecipeAnnotator::new(store.clone()),
            permissions: PermissionChecker,
            store,
        }
    }

    async fn ensure_target(&self, relation: Relation, target: Id) -> Result<(), Error> {
        let exists = match relation {
            Relation::Favorite | Relation::ShoppingCart => {
                self.store.get_recipe(target).await?.is_some()
            }
            Relation::Follow => self.store.get_user(target).await?.is_some(),
        };
        if !exists {
            return Err(match relation {
                Relation::Follow => HtmlError::NotFound.new("User not found"),
                _ => HtmlError::NotFound.new("Recipe not found"),
            });
        }
        Ok(())
    }

    async fn create(&self, relation: Relation, requester: &Requester, target: Id) -> Result<Id, Error> {
        let session = self.permissions.authorize(requester, action(relation))?;
        if relation == Relation::Follow && session.user_id == target {
            return Err(HtmlError::InvalidRequest.new("You cannot subscribe to yourself"));
        }
        self.ensure_target(relation, target).await?;

        if !self
            .store
            .insert_relation(relation, session.user_id, target)
            .await?
        {
            return Err(HtmlError::Conflict.new(relation.already_present()));
        }

        log::info!(
            "User {} added {} to {}",
            session.user_id,
            target,
            relation.table()
        );
        Ok(session.user_id)
    }

    async fn delete(&self, relation: Relation, requester: &Requester, target: Id) -> Result<(), Error> {
        let session = self.permissions.authorize(requester, action(relation))?;
        self.ensure_target(relation, target).await?;

        if !self
            .store
            .delete_relation(relation, session.user_id, target)
            .await?
        {
            return Err(HtmlError::NotFound.new(relation.not_present()));
        }

        log::info!(
            "User {} removed {} from {}",
            session.user_id,
            target,
            relation.table()
        );
        Ok(())
    }

    async fn short_recipe(&self, recipe_id: Id) -> Result<RecipeShortView, Error> {
        self.store
            .get_recipe(recipe_id)
            .await?
            .map(|recipe| RecipeShortView::from(&recipe))
            .ok_or_else(|| HtmlError::NotFound.new("Recipe not found"))
    }

    pub async fn add_favorite(&self, requester: &Requester, recipe_id: Id) -> Result<RecipeShortView, Error> {
        self.create(Relation::Favorite, requester, recipe_id).await?;
        self.short_recipe(recipe_id).await
    }

    pub async fn remove_favorite(&self, requester: &Requester, recipe_id: Id) -> Result<(), Error> {
        self.delete(Relation::Favorite, requester, recipe_id).await
    }

    pub async fn add_to_shopping_cart(
        &self,
        requester: &Requester,
        recipe_id: Id,
    ) -> Result<RecipeShortView, Error> {
        self.create(Relation::ShoppingCart, requester, recipe_id).await?;
        self.short_recipe(recipe_id).await
    }

    pub async fn remove_from_shopping_cart(&self, requester: &Requester, recipe_id: Id) -> Result<(), Error> {
        self.delete(Relation::ShoppingCart, requester, recipe_id).await
    }

    pub async fn follow(
        &self,
        requester: &Requester,
        user_id: Id,
        recipes_limit: Option<usize>,
    ) -> Result<SubscriptionView, Error> {
        self.create(Relation::Follow, requester, user_id).await?;

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| HtmlError::NotFound.new("User not found"))?;
        self.annotator
            .subscriptions(std::slice::from_ref(&user), requester, recipes_limit)
            .await?
            .pop()
            .ok_or_else(|| HtmlError::Internal.new("Failed to build subscription view"))
    }

    pub async fn unfollow(&self, requester: &Requester, user_id: Id) -> Result<(), Error> {
        self.delete(Relation::Follow, requester, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authentication::jwt::SessionData,
        database::{
            memory::MemoryStore,
            schema::{IngredientAmount, Recipe, RecipeData, RecipeRelations, User, UserRole},
        },
    };

    struct Setup {
        store: Arc<MemoryStore>,
        toggles: RelationToggles,
        author: User,
        reader: User,
        recipe: Recipe,
    }

    fn requester(user: &User) -> Requester {
        Requester::User(SessionData::from(user))
    }

    async fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let author = store.seed_user("author", UserRole::User).await;
        let reader = store.seed_user("reader", UserRole::User).await;
        let flour = store.seed_ingredient("Flour", "g").await;
        let tag = store.seed_tag("bread", "#aaa").await;
        let recipe = store
            .create_recipe(
                author.id,
                RecipeData {
                    name: "Bread".to_string(),
                    text: "Knead".to_string(),
                    image: None,
                    cooking_time: 60,
                },
                &RecipeRelations::new(vec![IngredientAmount { id: flour.id, amount: 500 }], vec![tag.id]),
            )
            .await
            .unwrap();

        Setup {
            toggles: RelationToggles::new(store.clone()),
            store,
            author,
            reader,
            recipe,
        }
    }

    async fn is_favorited(setup: &Setup) -> bool {
        RecipeAnnotator::new(setup.store.clone())
            .recipe(setup.recipe.clone(), &requester(&setup.reader))
            .await
            .unwrap()
            .is_favorited
    }

    #[tokio::test]
    async fn favorite_round_trip_flips_flag() {
        let setup = setup().await;
        let reader = requester(&setup.reader);

        let view = setup.toggles.add_favorite(&reader, setup.recipe.id).await.unwrap();
        assert_eq!(view.name, "Bread");
        assert!(is_favorited(&setup).await);

        setup.toggles.remove_favorite(&reader, setup.recipe.id).await.unwrap();
        assert!(!is_favorited(&setup).await);
    }

    #[tokio::test]
    async fn duplicate_favorite_is_a_conflict_with_one_row() {
        let setup = setup().await;
        let reader = requester(&setup.reader);

        setup.toggles.add_favorite(&reader, setup.recipe.id).await.unwrap();
        let error = setup.toggles.add_favorite(&reader, setup.recipe.id).await.unwrap_err();

        assert_eq!(error.kind(), HtmlError::Conflict);
        assert_eq!(error.info.as_deref(), Some("Recipe is already in favorites"));
        assert_eq!(setup.store.relation_count(Relation::Favorite), 1);
    }

    #[tokio::test]
    async fn deleting_absent_pair_is_not_found() {
        let setup = setup().await;
        let reader = requester(&setup.reader);

        let error = setup
            .toggles
            .remove_from_shopping_cart(&reader, setup.recipe.id)
            .await
            .unwrap_err();
        assert_eq!(error.info.as_deref(), Some("Recipe is not in the shopping list"));

        let error = setup.toggles.unfollow(&reader, setup.author.id).await.unwrap_err();
        assert_eq!(error.kind(), HtmlError::NotFound);
    }

    #[tokio::test]
    async fn self_follow_always_fails() {
        let setup = setup().await;
        let author = requester(&setup.author);

        for _ in 0..2 {
            let error = setup.toggles.follow(&author, setup.author.id, None).await.unwrap_err();
            assert_eq!(error.kind(), HtmlError::InvalidRequest);
        }
        // Even with a self row already stored.
        setup
            .store
            .insert_relation(Relation::Follow, setup.author.id, setup.author.id)
            .await
            .unwrap();
        let error = setup.toggles.follow(&author, setup.author.id, None).await.unwrap_err();
        assert_eq!(error.kind(), HtmlError::InvalidRequest);
    }

    #[tokio::test]
    async fn self_favorite_is_allowed() {
        let setup = setup().await;
        let author = requester(&setup.author);
        assert!(setup.toggles.add_favorite(&author, setup.recipe.id).await.is_ok());
    }

    #[tokio::test]
    async fn follow_returns_subscription() {
        let setup = setup().await;
        let reader = requester(&setup.reader);

        let view = setup.toggles.follow(&reader, setup.author.id, Some(0)).await.unwrap();
        assert!(view.user.is_subscribed);
        assert_eq!(view.recipes_count, 1);
        assert!(view.recipes.is_empty());

        let error = setup.toggles.follow(&reader, setup.author.id, None).await.unwrap_err();
        assert_eq!(error.info.as_deref(), Some("Subscription already exists"));
    }

    #[tokio::test]
    async fn missing_targets_and_anonymous_callers() {
        let setup = setup().await;

        let error = setup.toggles.add_favorite(&Requester::Anonymous, setup.recipe.id).await.unwrap_err();
        assert_eq!(error.code, 401);

        let reader = requester(&setup.reader);
        let error = setup.toggles.add_to_shopping_cart(&reader, 999).await.unwrap_err();
        assert_eq!(error.info.as_deref(), Some("Recipe not found"));

        let error = setup.toggles.follow(&reader, 999, None).await.unwrap_err();
        assert_eq!(error.info.as_deref(), Some("User not found"));
        assert_eq!(setup.store.relation_count(Relation::ShoppingCart), 0);
    }
}
