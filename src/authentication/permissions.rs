use crate::database::{
    error::{Error, HtmlError},
    schema::{Recipe, UserRole},
};

use super::jwt::{Requester, SessionData};

const ACTION_TABLE: &[(UserRole, &[ActionType])] = &[
    (
        UserRole::User,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnFavorites,
            ActionType::ManageOwnShoppingList,
            ActionType::ManageOwnSubscriptions,
            ActionType::ManageOwnAccount,
        ],
    ),
    (
        UserRole::Admin,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnFavorites,
            ActionType::ManageOwnShoppingList,
            ActionType::ManageOwnSubscriptions,
            ActionType::ManageOwnAccount,
            ActionType::ManageAllRecipes,
            ActionType::CreateTags,
            ActionType::ImportIngredients,
        ],
    ),
];

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionType {
    CreateRecipes,
    CreateTags,
    ImportIngredients,

    ManageOwnRecipes,
    ManageOwnFavorites,
    ManageOwnShoppingList,
    ManageOwnSubscriptions,
    ManageOwnAccount,

    ManageAllRecipes,
}

impl ActionType {
    pub fn authenticate(self, session: &SessionData) -> bool {
        ACTION_TABLE
            .iter()
            .find_map(|(role, actions)| {
                if session.role != *role {
                    return None;
                }

                Some(actions.contains(&self))
            })
            .unwrap_or(false)
    }
}

/// Gatekeeper composed into the resource handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionChecker;

impl PermissionChecker {
    /// 401 for anonymous requesters, 403 when the role lacks `action`.
    pub fn authorize<'a>(
        &self,
        requester: &'a Requester,
        action: ActionType,
    ) -> Result<&'a SessionData, Error> {
        let session = requester.authenticated()?;
        session.authenticate(action)?;
        Ok(session)
    }

    /// Authors may change their own recipes; admins may change any.
    pub fn can_modify_recipe(&self, session: &SessionData, recipe: &Recipe) -> Result<(), Error> {
        if ActionType::ManageAllRecipes.authenticate(session) {
            return Ok(());
        }
        if recipe.author_id == session.user_id
            && ActionType::ManageOwnRecipes.authenticate(session)
        {
            return Ok(());
        }

        Err(HtmlError::Forbidden.new("Only the author can change this recipe"))
    }
}
