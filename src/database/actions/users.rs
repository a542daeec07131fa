use std::sync::Arc;

use serde::Serialize;

use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::{generate_jwt_session, Requester},
        permissions::{ActionType, PermissionChecker},
    },
    config::AuthSection,
    database::{
        error::{Error, HtmlError},
        form::{LoginForm, SetPasswordForm, UserForm},
        pagination::{PageContext, PageParams},
        schema::{Id, NewUser, SubscriptionView, User, UserRole, UserView},
        store::Store,
    },
};

use super::annotate::RecipeAnnotator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenView {
    pub auth_token: String,
}

async fn find_user(store: &Arc<dyn Store>, id: Id) -> Result<User, Error> {
    store
        .get_user(id)
        .await?
        .ok_or_else(|| HtmlError::NotFound.new("User not found"))
}

/// Creates a regular user with a hashed password.
pub async fn register(store: &Arc<dyn Store>, form: UserForm) -> Result<UserView, Error> {
    form.validate()?;

    let user = store
        .create_user(NewUser {
            username: form.username,
            email: form.email.to_lowercase(),
            first_name: form.first_name,
            last_name: form.last_name,
            password: hash_password(&form.password)?,
            role: UserRole::User,
        })
        .await?;

    log::info!("Registered user {} ({})", user.username, user.id);
    Ok(UserView::new(&user, false))
}

/// Exchanges email and password for a session token.
pub async fn login(
    store: &Arc<dyn Store>,
    form: LoginForm,
    auth: &AuthSection,
) -> Result<TokenView, Error> {
    let invalid = || HtmlError::InvalidRequest.new("Unable to log in with provided credentials.");

    let user = store
        .user_by_email(&form.email.to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&form.password, &user.password)? {
        return Err(invalid());
    }

    let auth_token = generate_jwt_session(&user, &auth.jwt_secret, auth.session_hours)?;
    log::debug!("User {} logged in", user.id);
    Ok(TokenView { auth_token })
}

pub async fn current_user(store: &Arc<dyn Store>, requester: &Requester) -> Result<UserView, Error> {
    let session = requester.authenticated()?;
    let user = find_user(store, session.user_id).await?;
    Ok(UserView::new(&user, false))
}

pub async fn get_user(
    store: &Arc<dyn Store>,
    requester: &Requester,
    id: Id,
) -> Result<UserView, Error> {
    let user = find_user(store, id).await?;
    RecipeAnnotator::new(store.clone()).user(&user, requester).await
}

pub async fn list_users(
    store: &Arc<dyn Store>,
    requester: &Requester,
    params: PageParams,
    page_size: i64,
) -> Result<PageContext<UserView>, Error> {
    let window = params.window(page_size)?;
    let (rows, total) = store.list_users(window.limit, window.offset).await?;

    let views = RecipeAnnotator::new(store.clone()).users(&rows, requester).await?;
    PageContext::from_rows(views, total, window)
}

pub async fn set_password(
    store: &Arc<dyn Store>,
    requester: &Requester,
    form: SetPasswordForm,
) -> Result<(), Error> {
    let session = PermissionChecker.authorize(requester, ActionType::ManageOwnAccount)?;
    let user = find_user(store, session.user_id).await?;

    if !verify_password(&form.current_password, &user.password)? {
        return Err(HtmlError::InvalidRequest.field("current_password", "Invalid password."));
    }
    if form.new_password.trim().is_empty() {
        return Err(HtmlError::InvalidRequest.field("new_password", "This field may not be blank."));
    }

    store
        .set_password(user.id, &hash_password(&form.new_password)?)
        .await?;
    log::info!("User {} changed password", user.id);
    Ok(())
}

/// Removes the requester along with their recipes and relation rows.
pub async fn delete_account(store: &Arc<dyn Store>, requester: &Requester) -> Result<(), Error> {
    let session = PermissionChecker.authorize(requester, ActionType::ManageOwnAccount)?;

    if !store.delete_user(session.user_id).await? {
        return Err(HtmlError::NotFound.new("User not found"));
    }
    log::info!("Deleted account {}", session.user_id);
    Ok(())
}

/// Followed users, each with their recipes.
pub async fn subscriptions(
    store: &Arc<dyn Store>,
    requester: &Requester,
    params: PageParams,
    recipes_limit: Option<usize>,
    page_size: i64,
) -> Result<PageContext<SubscriptionView>, Error> {
    let session = PermissionChecker.authorize(requester, ActionType::ManageOwnSubscriptions)?;
    let window = params.window(page_size)?;

    let (rows, total) = store
        .list_following(session.user_id, window.limit, window.offset)
        .await?;
    let views = RecipeAnnotator::new(store.clone())
        .subscriptions(&rows, requester, recipes_limit)
        .await?;

    PageContext::from_rows(views, total, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authentication::jwt::{verify_jwt_session, SessionData},
        database::{
            memory::MemoryStore,
            schema::{IngredientAmount, RecipeData, RecipeRelations, Relation},
        },
    };

    fn user_form(username: &str) -> UserForm {
        UserForm {
            email: format!("{username}@Example.com"),
            username: username.to_string(),
            first_name: "Jamie".to_string(),
            last_name: "Oliver".to_string(),
            password: "s3cret-pass".to_string(),
        }
    }

    async fn registered(store: &Arc<dyn Store>, username: &str) -> Requester {
        let view = register(store, user_form(username)).await.unwrap();
        let user = store.get_user(view.id).await.unwrap().unwrap();
        Requester::User(SessionData::from(&user))
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn register_hashes_and_rejects_duplicates() {
        let store = store();
        let view = register(&store, user_form("jamie")).await.unwrap();
        assert_eq!(view.email, "jamie@example.com");
        assert!(!view.is_subscribed);

        let stored = store.get_user(view.id).await.unwrap().unwrap();
        assert_ne!(stored.password, "s3cret-pass");

        let error = register(&store, user_form("jamie")).await.unwrap_err();
        assert_eq!(error.kind(), HtmlError::Conflict);
    }

    #[tokio::test]
    async fn login_issues_a_verifiable_token() {
        let store = store();
        register(&store, user_form("jamie")).await.unwrap();
        let auth = AuthSection::default();

        let token = login(
            &store,
            LoginForm {
                email: "JAMIE@example.com".to_string(),
                password: "s3cret-pass".to_string(),
            },
            &auth,
        )
        .await
        .unwrap();
        let session = verify_jwt_session(&token.auth_token, &auth.jwt_secret).unwrap();
        assert_eq!(session.username, "jamie");

        let error = login(
            &store,
            LoginForm {
                email: "jamie@example.com".to_string(),
                password: "wrong".to_string(),
            },
            &auth,
        )
        .await
        .unwrap_err();
        assert_eq!(error.code, 400);
    }

    #[tokio::test]
    async fn current_user_requires_session() {
        let store = store();
        let error = current_user(&store, &Requester::Anonymous).await.unwrap_err();
        assert_eq!(error.code, 401);

        let me = registered(&store, "jamie").await;
        assert_eq!(current_user(&store, &me).await.unwrap().username, "jamie");
    }

    #[tokio::test]
    async fn user_views_carry_subscription_flag() {
        let store = store();
        let fan = registered(&store, "fan").await;
        let chef = registered(&store, "chef").await;
        let chef_id = chef.user_id().unwrap();
        store
            .insert_relation(Relation::Follow, fan.user_id().unwrap(), chef_id)
            .await
            .unwrap();

        assert!(get_user(&store, &fan, chef_id).await.unwrap().is_subscribed);
        assert!(!get_user(&store, &Requester::Anonymous, chef_id).await.unwrap().is_subscribed);

        let page = list_users(&store, &fan, PageParams::default(), 6).await.unwrap();
        assert_eq!(page.count, 2);
        let flags: Vec<bool> = page.results.iter().map(|u| u.is_subscribed).collect();
        assert_eq!(flags, vec![false, true]);

        let error = get_user(&store, &fan, 999).await.unwrap_err();
        assert_eq!(error.code, 404);
    }

    #[tokio::test]
    async fn set_password_checks_current() {
        let store = store();
        let me = registered(&store, "jamie").await;

        let error = set_password(
            &store,
            &me,
            SetPasswordForm {
                current_password: "nope".to_string(),
                new_password: "next".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(error.field.as_deref(), Some("current_password"));

        set_password(
            &store,
            &me,
            SetPasswordForm {
                current_password: "s3cret-pass".to_string(),
                new_password: "next-pass".to_string(),
            },
        )
        .await
        .unwrap();

        let token = login(
            &store,
            LoginForm {
                email: "jamie@example.com".to_string(),
                password: "next-pass".to_string(),
            },
            &AuthSection::default(),
        )
        .await;
        assert!(token.is_ok());
    }

    #[tokio::test]
    async fn delete_account_cascades() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let chef = registered(&store, "chef").await;
        let fan = registered(&store, "fan").await;
        let chef_id = chef.user_id().unwrap();
        let fan_id = fan.user_id().unwrap();

        let flour = memory.seed_ingredient("Flour", "g").await;
        let tag = memory.seed_tag("bread", "#abc").await;
        let recipe = store
            .create_recipe(
                chef_id,
                RecipeData {
                    name: "Bread".to_string(),
                    text: "Bake".to_string(),
                    image: None,
                    cooking_time: 40,
                },
                &RecipeRelations::new(vec![IngredientAmount { id: flour.id, amount: 1 }], vec![tag.id]),
            )
            .await
            .unwrap();
        store.insert_relation(Relation::Follow, fan_id, chef_id).await.unwrap();
        store.insert_relation(Relation::Favorite, fan_id, recipe.id).await.unwrap();

        delete_account(&store, &chef).await.unwrap();

        assert_eq!(memory.recipe_count(), 0);
        assert_eq!(memory.relation_count(Relation::Follow), 0);
        assert_eq!(memory.relation_count(Relation::Favorite), 0);
        assert!(store.get_ingredient(flour.id).await.unwrap().is_some());

        let error = delete_account(&store, &chef).await.unwrap_err();
        assert_eq!(error.code, 404);
    }

    #[tokio::test]
    async fn subscriptions_list_followed_authors() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let fan = registered(&store, "fan").await;
        let chef = registered(&store, "chef").await;
        store
            .insert_relation(Relation::Follow, fan.user_id().unwrap(), chef.user_id().unwrap())
            .await
            .unwrap();

        let page = subscriptions(&store, &fan, PageParams::default(), None, 6)
            .await
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].user.username, "chef");
        assert!(page.results[0].user.is_subscribed);
        assert_eq!(page.results[0].recipes_count, 0);

        let error = subscriptions(&store, &Requester::Anonymous, PageParams::default(), None, 6)
            .await
            .unwrap_err();
        assert_eq!(error.code, 401);
    }
}
