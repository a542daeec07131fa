use std::sync::Arc;

use crate::{
    authentication::{
        jwt::Requester,
        permissions::{ActionType, PermissionChecker},
    },
    constants::{TAG_COLOR_MAX_LENGTH, TAG_NAME_MAX_LENGTH, TAG_SLUG_MAX_LENGTH},
    database::{
        error::{Error, HtmlError},
        form::{is_hex_color, is_slug, max_length, require},
        schema::{Id, NewTag, Tag},
        store::Store,
    },
};

pub async fn list_tags(store: &Arc<dyn Store>) -> Result<Vec<Tag>, Error> {
    store.list_tags().await
}

pub async fn get_tag(store: &Arc<dyn Store>, id: Id) -> Result<Tag, Error> {
    store
        .get_tag(id)
        .await?
        .ok_or_else(|| HtmlError::NotFound.new("Tag not found"))
}

fn validate(tag: &NewTag) -> Result<(), Error> {
    require("name", &tag.name)?;
    max_length("name", &tag.name, TAG_NAME_MAX_LENGTH)?;

    max_length("color", &tag.color, TAG_COLOR_MAX_LENGTH)?;
    if !is_hex_color(&tag.color) {
        return Err(HtmlError::InvalidRequest.field("color", "Enter a valid HEX color."));
    }

    max_length("slug", &tag.slug, TAG_SLUG_MAX_LENGTH)?;
    if !is_slug(&tag.slug) {
        return Err(HtmlError::InvalidRequest.field(
            "slug",
            "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
        ));
    }
    Ok(())
}

pub async fn create_tag(store: &Arc<dyn Store>, requester: &Requester, tag: NewTag) -> Result<Tag, Error> {
    PermissionChecker.authorize(requester, ActionType::CreateTags)?;

    let tag = NewTag {
        color: tag.color.to_uppercase(),
        ..tag
    };
    validate(&tag)?;

    let tag = store.create_tag(tag).await?;
    log::info!("Created tag {} ({})", tag.slug, tag.id);
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authentication::jwt::SessionData,
        database::{memory::MemoryStore, schema::UserRole},
    };
    use rstest::rstest;

    fn new_tag(name: &str, color: &str, slug: &str) -> NewTag {
        NewTag {
            name: name.to_string(),
            color: color.to_string(),
            slug: slug.to_string(),
        }
    }

    async fn admin(store: &MemoryStore) -> Requester {
        Requester::User(SessionData::from(&store.seed_user("admin", UserRole::Admin).await))
    }

    #[tokio::test]
    async fn admin_creates_tags_listed_by_name() {
        let memory = Arc::new(MemoryStore::new());
        let admin = admin(&memory).await;
        let store: Arc<dyn Store> = memory;

        let lunch = create_tag(&store, &admin, new_tag("Lunch", "#e26c2d", "lunch")).await.unwrap();
        create_tag(&store, &admin, new_tag("Breakfast", "#49B64E", "breakfast")).await.unwrap();

        assert_eq!(lunch.color, "#E26C2D");
        let names: Vec<String> = list_tags(&store).await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Breakfast", "Lunch"]);
        assert_eq!(get_tag(&store, lunch.id).await.unwrap(), lunch);
    }

    #[tokio::test]
    async fn regular_users_cannot_create_tags() {
        let memory = Arc::new(MemoryStore::new());
        let user = Requester::User(SessionData::from(&memory.seed_user("cook", UserRole::User).await));
        let store: Arc<dyn Store> = memory;

        let error = create_tag(&store, &user, new_tag("Lunch", "#fff", "lunch")).await.unwrap_err();
        assert_eq!(error.code, 403);
    }

    #[rstest]
    #[case(new_tag("", "#fff", "x"), "name")]
    #[case(new_tag("Red", "red", "red"), "color")]
    #[case(new_tag("Red", "#f00", "not a slug"), "slug")]
    #[tokio::test]
    async fn invalid_tags_name_the_field(#[case] tag: NewTag, #[case] field: &str) {
        let memory = Arc::new(MemoryStore::new());
        let admin = admin(&memory).await;
        let store: Arc<dyn Store> = memory;

        let error = create_tag(&store, &admin, tag).await.unwrap_err();
        assert_eq!(error.field.as_deref(), Some(field));
    }

    #[tokio::test]
    async fn duplicate_slug_conflicts_and_missing_tag_is_not_found() {
        let memory = Arc::new(MemoryStore::new());
        let admin = admin(&memory).await;
        let store: Arc<dyn Store> = memory;

        create_tag(&store, &admin, new_tag("Lunch", "#fff", "lunch")).await.unwrap();
        let error = create_tag(&store, &admin, new_tag("Lunch 2", "#000", "lunch")).await.unwrap_err();
        assert_eq!(error.kind(), HtmlError::Conflict);

        assert_eq!(get_tag(&store, 999).await.unwrap_err().code, 404);
    }
}
