use chrono::{Duration, Local};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::database::{
    error::{Error, HtmlError},
    schema::{Id, User, UserRole},
};

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: Id, username: String, role: UserRole, hours: i64) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + Duration::hours(hours)).timestamp();

        Self {
            user_id: id,
            username,
            role,
            iat,
            exp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl SessionData {
    pub fn authenticate(&self, action: ActionType) -> Result<(), Error> {
        if !action.authenticate(self) {
            return Err(HtmlError::Forbidden.default());
        }
        Ok(())
    }
}

impl From<JwtSessionData> for SessionData {
    fn from(value: JwtSessionData) -> Self {
        SessionData {
            user_id: value.user_id,
            username: value.username,
            is_admin: value.role == UserRole::Admin,
            role: value.role,
        }
    }
}

impl From<&User> for SessionData {
    fn from(user: &User) -> Self {
        SessionData {
            user_id: user.id,
            username: user.username.to_owned(),
            role: user.role,
            is_admin: user.role == UserRole::Admin,
        }
    }
}

/// Whoever issued the request; anonymous requests carry no session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Requester {
    #[default]
    Anonymous,
    User(SessionData),
}

impl Requester {
    pub fn user_id(&self) -> Option<Id> {
        match self {
            Requester::Anonymous => None,
            Requester::User(session) => Some(session.user_id),
        }
    }

    pub fn session(&self) -> Option<&SessionData> {
        match self {
            Requester::Anonymous => None,
            Requester::User(session) => Some(session),
        }
    }

    /// The session, or 401 for anonymous requesters.
    pub fn authenticated(&self) -> Result<&SessionData, Error> {
        self.session()
            .ok_or_else(|| HtmlError::Unauthorized.default())
    }
}

impl From<Option<JwtSessionData>> for Requester {
    fn from(value: Option<JwtSessionData>) -> Self {
        match value {
            Some(session) => Requester::User(session.into()),
            None => Requester::Anonymous,
        }
    }
}

fn signing_key(secret: &str) -> Result<Hmac<Sha256>, Error> {
    Hmac::new_from_slice(secret.as_bytes())
        .map_err(|_| HtmlError::Internal.new("Invalid session signing key"))
}

pub fn generate_jwt_session(user: &User, secret: &str, hours: i64) -> Result<String, Error> {
    let key = signing_key(secret)?;
    let claims = JwtSessionData::new(user.id, user.username.to_owned(), user.role, hours);

    claims
        .sign_with_key(&key)
        .map_err(|e| HtmlError::Internal.new(&format!("Failed to sign session: {e}")))
}

pub fn verify_jwt_session(token: &str, secret: &str) -> Result<JwtSessionData, Error> {
    let key = signing_key(secret)?;

    let session: JwtSessionData = token
        .verify_with_key(&key)
        .map_err(|_| HtmlError::InvalidSession.new("Invalid session; Invalid token"))?;

    let now = Local::now().timestamp();
    if (session.exp - now).is_negative() {
        return Err(HtmlError::InvalidSession.new("Invalid session; Token expired"));
    }
    Ok(session)
}
