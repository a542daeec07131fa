use std::sync::Arc;

use warp::{Filter, Rejection};

use super::jwt::{verify_jwt_session, Requester};

/// Pulls the token out of `Authorization: Token <jwt>` or `Bearer <jwt>`.
fn header_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the requester from the header token, falling back to the
/// `session` cookie. Invalid or expired tokens resolve to anonymous.
pub fn resolve_requester(
    authorization: Option<&str>,
    cookie: Option<&str>,
    secret: &str,
) -> Requester {
    let Some(token) = authorization.and_then(header_token).or(cookie) else {
        return Requester::Anonymous;
    };

    match verify_jwt_session(token, secret) {
        Ok(session) => Requester::User(session.into()),
        Err(e) => {
            log::warn!("Rejected session token: {e}");
            Requester::Anonymous
        }
    }
}

pub fn with_requester(
    secret: Arc<str>,
) -> impl Filter<Extract = (Requester,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::cookie::optional::<String>("session"))
        .map(move |authorization: Option<String>, session: Option<String>| {
            resolve_requester(authorization.as_deref(), session.as_deref(), &secret)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authentication::jwt::generate_jwt_session,
        database::schema::{User, UserRole},
    };

    fn token(secret: &str) -> String {
        let user = User {
            id: 3,
            username: "baker".to_string(),
            email: "baker@example.com".to_string(),
            first_name: "B".to_string(),
            last_name: "K".to_string(),
            password: String::new(),
            role: UserRole::User,
        };
        generate_jwt_session(&user, secret, 1).unwrap()
    }

    #[test]
    fn header_prefixes_are_accepted() {
        assert_eq!(header_token("Token abc"), Some("abc"));
        assert_eq!(header_token("Bearer abc"), Some("abc"));
        assert_eq!(header_token("Basic abc"), None);
        assert_eq!(header_token("Token "), None);
    }

    #[test]
    fn bad_tokens_are_anonymous() {
        let requester = resolve_requester(Some("Token garbage"), None, "secret");
        assert_eq!(requester, Requester::Anonymous);
        assert_eq!(resolve_requester(None, None, "secret"), Requester::Anonymous);
    }

    #[tokio::test]
    async fn filter_reads_header_and_cookie() {
        let filter = with_requester(Arc::from("secret"));

        let requester = warp::test::request()
            .header("authorization", format!("Token {}", token("secret")))
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(requester.user_id(), Some(3));

        let requester = warp::test::request()
            .header("cookie", format!("session={}", token("secret")))
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(requester.user_id(), Some(3));

        let requester = warp::test::request().filter(&filter).await.unwrap();
        assert_eq!(requester, Requester::Anonymous);
    }
}
