//! Request bodies and the field checks shared by the actions.

use serde::Deserialize;

use crate::constants::{
    EMAIL_MAX_LENGTH, MAX_COOKING_TIME, MIN_COOKING_TIME, NAME_MAX_LENGTH,
    RECIPE_NAME_MAX_LENGTH, USERNAME_MAX_LENGTH,
};

use super::{
    error::{Error, HtmlError},
    schema::{Id, IngredientAmount, RecipeData},
};

pub fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(HtmlError::InvalidRequest.field(field, "This field may not be blank."));
    }
    Ok(())
}

pub fn max_length(field: &str, value: &str, max: usize) -> Result<(), Error> {
    if value.chars().count() > max {
        return Err(HtmlError::InvalidRequest.field(
            field,
            &format!("Ensure this field has no more than {max} characters."),
        ));
    }
    Ok(())
}

pub fn in_range(field: &str, value: i32, min: i32, max: i32) -> Result<(), Error> {
    if !(min..=max).contains(&value) {
        return Err(HtmlError::InvalidRequest.field(
            field,
            &format!("Ensure this value is between {min} and {max}."),
        ));
    }
    Ok(())
}

/// `#RGB` or `#RRGGBB`.
pub fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .map(|hex| (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn is_username(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '+' | '-'))
}

pub fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Body of recipe create and update requests.
///
/// Missing `ingredients`/`tags` deserialize to empty lists and are reported
/// the same way as empty ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
    /// `data:image/<ext>;base64,...`
    pub image: Option<String>,
    #[serde(default)]
    pub cooking_time: i32,
    #[serde(default)]
    pub ingredients: Vec<IngredientAmount>,
    #[serde(default)]
    pub tags: Vec<Id>,
}

impl RecipeForm {
    pub fn validate_fields(&self, image_required: bool) -> Result<(), Error> {
        require("name", &self.name)?;
        max_length("name", &self.name, RECIPE_NAME_MAX_LENGTH)?;
        require("text", &self.text)?;
        in_range("cooking_time", self.cooking_time, MIN_COOKING_TIME, MAX_COOKING_TIME)?;

        match self.image.as_deref() {
            Some(image) => require("image", image),
            None if image_required => {
                Err(HtmlError::InvalidRequest.field("image", "This field is required."))
            }
            None => Ok(()),
        }
    }

    /// Scalar columns, with the stored image reference substituted in.
    pub fn data(&self, image: Option<String>) -> RecipeData {
        RecipeData {
            name: self.name.trim().to_string(),
            text: self.text.to_owned(),
            image,
            cooking_time: self.cooking_time,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub password: String,
}

impl UserForm {
    pub fn validate(&self) -> Result<(), Error> {
        require("email", &self.email)?;
        max_length("email", &self.email, EMAIL_MAX_LENGTH)?;
        if !is_email(&self.email) {
            return Err(HtmlError::InvalidRequest.field("email", "Enter a valid email address."));
        }

        require("username", &self.username)?;
        max_length("username", &self.username, USERNAME_MAX_LENGTH)?;
        if !is_username(&self.username) {
            return Err(HtmlError::InvalidRequest.field(
                "username",
                "Enter a valid username. Letters, digits and @/./+/-/_ only.",
            ));
        }
        if self.username == "me" {
            return Err(HtmlError::InvalidRequest.field("username", "Username 'me' is reserved."));
        }

        require("first_name", &self.first_name)?;
        max_length("first_name", &self.first_name, NAME_MAX_LENGTH)?;
        require("last_name", &self.last_name)?;
        max_length("last_name", &self.last_name, NAME_MAX_LENGTH)?;
        require("password", &self.password)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetPasswordForm {
    pub current_password: String,
    pub new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn recipe() -> RecipeForm {
        RecipeForm {
            name: "Pancakes".to_string(),
            text: "Mix and fry".to_string(),
            image: Some("data:image/png;base64,AAAA".to_string()),
            cooking_time: 15,
            ingredients: vec![IngredientAmount { id: 1, amount: 200 }],
            tags: vec![1],
        }
    }

    #[rstest]
    #[case("#fff", true)]
    #[case("#E26C2D", true)]
    #[case("E26C2D", false)]
    #[case("#12345", false)]
    #[case("#GGGGGG", false)]
    fn hex_colors(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(is_hex_color(value), valid);
    }

    #[rstest]
    #[case("breakfast", true)]
    #[case("late-night_snack", true)]
    #[case("with space", false)]
    #[case("", false)]
    fn slugs(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(is_slug(value), valid);
    }

    #[rstest]
    #[case("cook@example.com", true)]
    #[case("cook@localhost", false)]
    #[case("@example.com", false)]
    #[case("co ok@example.com", false)]
    fn emails(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(is_email(value), valid);
    }

    #[test]
    fn valid_recipe_fields_pass() {
        assert!(recipe().validate_fields(true).is_ok());
    }

    #[test]
    fn create_requires_image_update_does_not() {
        let form = RecipeForm {
            image: None,
            ..recipe()
        };
        let error = form.validate_fields(true).unwrap_err();
        assert_eq!(error.field.as_deref(), Some("image"));
        assert!(form.validate_fields(false).is_ok());
    }

    #[rstest]
    #[case(0)]
    #[case(32001)]
    fn cooking_time_is_bounded(#[case] cooking_time: i32) {
        let form = RecipeForm {
            cooking_time,
            ..recipe()
        };
        let error = form.validate_fields(true).unwrap_err();
        assert_eq!(error.field.as_deref(), Some("cooking_time"));
    }

    #[test]
    fn missing_lists_deserialize_empty() {
        let form: RecipeForm =
            serde_json::from_str(r#"{"name": "Tea", "text": "Steep", "cooking_time": 3}"#).unwrap();
        assert!(form.ingredients.is_empty());
        assert!(form.tags.is_empty());
    }

    #[test]
    fn reserved_username_is_rejected() {
        let form = UserForm {
            email: "me@example.com".to_string(),
            username: "me".to_string(),
            first_name: "M".to_string(),
            last_name: "E".to_string(),
            password: "pw".to_string(),
        };
        let error = form.validate().unwrap_err();
        assert_eq!(error.field.as_deref(), Some("username"));
    }
}
