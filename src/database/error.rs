use std::fmt::{self, Display};

use serde_json::{json, Map, Value};
use warp::reject::Reject;

/// Error kinds surfaced to API callers, each bound to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HtmlError {
    InvalidRequest,
    Unauthorized,
    InvalidSession,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl HtmlError {
    pub fn code(&self) -> u16 {
        match self {
            HtmlError::InvalidRequest => 400,
            HtmlError::Unauthorized | HtmlError::InvalidSession => 401,
            HtmlError::Forbidden => 403,
            HtmlError::NotFound => 404,
            HtmlError::Conflict => 409,
            HtmlError::Internal => 500,
        }
    }

    fn default_info(&self) -> &'static str {
        match self {
            HtmlError::InvalidRequest => "Invalid request",
            HtmlError::Unauthorized => "Authentication credentials were not provided",
            HtmlError::InvalidSession => "Invalid session",
            HtmlError::Forbidden => "You don't have permission to perform this action",
            HtmlError::NotFound => "Not found",
            HtmlError::Conflict => "Object already exists",
            HtmlError::Internal => "Internal server error",
        }
    }

    pub fn new(self, info: &str) -> Error {
        Error {
            code: self.code(),
            info: Some(info.to_string()),
            field: None,
        }
    }

    pub fn default(self) -> Error {
        self.new(self.default_info())
    }

    /// Error attributed to a single request field, rendered as `{"<field>": ["<info>"]}`.
    pub fn field(self, field: &str, info: &str) -> Error {
        Error {
            code: self.code(),
            info: Some(info.to_string()),
            field: Some(field.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {}", .code, .info.as_deref().unwrap_or("no details"))]
pub struct Error {
    pub code: u16,
    pub info: Option<String>,
    pub field: Option<String>,
}

impl Error {
    pub fn kind(&self) -> HtmlError {
        match self.code {
            400 => HtmlError::InvalidRequest,
            401 => HtmlError::Unauthorized,
            403 => HtmlError::Forbidden,
            404 => HtmlError::NotFound,
            409 => HtmlError::Conflict,
            _ => HtmlError::Internal,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// JSON payload of the error response.
    pub fn body(&self) -> Value {
        let info = self.info.as_deref().unwrap_or(self.kind().default_info());
        match &self.field {
            Some(field) => {
                let mut body = Map::new();
                body.insert(field.clone(), json!([info]));
                Value::Object(body)
            }
            None => json!({ "detail": info }),
        }
    }
}

impl Reject for Error {}

/// Unique constraints and the message reported when an insert collides with them.
const UNIQUE_CONSTRAINTS: &[(&str, &str)] = &[
    ("unique_user_favorite", "Recipe is already in favorites"),
    ("unique_user_shoppinglist", "Recipe is already in the shopping list"),
    ("unique_user_following", "Subscription already exists"),
    ("unique_ingredient_recipe", "Ingredient is already in the recipe"),
    ("users_username_key", "A user with that username already exists"),
    ("users_email_key", "A user with that email already exists"),
    ("tags_name_key", "A tag with that name already exists"),
    ("tags_color_key", "A tag with that color already exists"),
    ("tags_slug_key", "A tag with that slug already exists"),
];

pub struct QueryError {
    kind: HtmlError,
    info: String,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self {
            kind: HtmlError::Internal,
            info,
        }
    }

    fn unique_violation(constraint: Option<&str>) -> Self {
        let info = constraint
            .and_then(|name| {
                UNIQUE_CONSTRAINTS
                    .iter()
                    .find(|(constraint, _)| *constraint == name)
                    .map(|(_, info)| info.to_string())
            })
            .unwrap_or_else(|| HtmlError::Conflict.default_info().to_string());

        Self {
            kind: HtmlError::Conflict,
            info,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Database(e) => match e.code().as_deref() {
                Some("23505") => Self::unique_violation(e.constraint()),
                Some("23503") => Self {
                    kind: HtmlError::InvalidRequest,
                    info: String::from("Referenced object does not exist"),
                },
                _ => Self::new(format!("{e}")),
            },
            sqlx::Error::Configuration(e) => Self::new(format!("{e}")),
            sqlx::Error::Io(e) => Self::new(format!("{e}")),
            sqlx::Error::Tls(e) => Self::new(format!("{e}")),
            sqlx::Error::Protocol(e) => Self::new(e),
            sqlx::Error::RowNotFound => Self {
                kind: HtmlError::NotFound,
                info: String::from("Not found"),
            },
            sqlx::Error::TypeNotFound { type_name } => {
                Self::new(format!("Type not found: {type_name}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                Self::new(format!("Column index out of bounds {index} ({len})"))
            }
            sqlx::Error::ColumnNotFound(e) => Self::new(e),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Decode(e) => Self::new(format!("{e}")),
            sqlx::Error::PoolTimedOut => Self::new(String::from("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(String::from("Pool closed")),
            sqlx::Error::WorkerCrashed => Self::new(String::from("Worker crashed")),
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            _ => Self::new(String::from("Unknown error")),
        }
    }
}

impl From<QueryError> for Error {
    fn from(value: QueryError) -> Self {
        value.kind.new(&value.info)
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        QueryError::from(value).into()
    }
}

#[derive(Debug)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }
}

impl From<TypeError> for Error {
    fn from(value: TypeError) -> Self {
        HtmlError::InvalidRequest.new(&value.info)
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HtmlError::InvalidRequest, 400)]
    #[case(HtmlError::Unauthorized, 401)]
    #[case(HtmlError::Forbidden, 403)]
    #[case(HtmlError::NotFound, 404)]
    #[case(HtmlError::Conflict, 409)]
    #[case(HtmlError::Internal, 500)]
    fn kind_survives_status_code(#[case] kind: HtmlError, #[case] code: u16) {
        let error = kind.default();
        assert_eq!(error.code, code);
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn field_errors_are_keyed_by_field() {
        let error = HtmlError::InvalidRequest.field("ingredients", "ingredients repeated");
        assert_eq!(error.body(), json!({ "ingredients": ["ingredients repeated"] }));
        assert!(error.is_client_error());
    }

    #[test]
    fn plain_errors_use_detail() {
        let error = HtmlError::NotFound.new("Recipe not found");
        assert_eq!(error.body(), json!({ "detail": "Recipe not found" }));
        assert_eq!(error.to_string(), "404: Recipe not found");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let error: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(error.kind(), HtmlError::NotFound);
    }

    #[test]
    fn pool_failures_are_internal() {
        let error: Error = sqlx::Error::PoolTimedOut.into();
        assert_eq!(error.code, 500);
        assert!(!error.is_client_error());
    }
}
