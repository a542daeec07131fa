pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const USER_COUNT_PER_PAGE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const MIN_AMOUNT: i32 = 1;
pub const MAX_AMOUNT: i32 = 32000;
pub const MIN_COOKING_TIME: i32 = 1;
pub const MAX_COOKING_TIME: i32 = 32000;

pub const RECIPE_NAME_MAX_LENGTH: usize = 200;
pub const TAG_NAME_MAX_LENGTH: usize = 200;
pub const TAG_COLOR_MAX_LENGTH: usize = 16;
pub const TAG_SLUG_MAX_LENGTH: usize = 50;
pub const INGREDIENT_NAME_MAX_LENGTH: usize = 200;
pub const MEASUREMENT_UNIT_MAX_LENGTH: usize = 15;
pub const USERNAME_MAX_LENGTH: usize = 150;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const NAME_MAX_LENGTH: usize = 150;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpeg", "jpg", "gif", "webp"];
