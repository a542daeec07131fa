use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, QueryBuilder, Transaction};

use crate::config::DatabaseSection;

use super::{
    error::{Error, HtmlError, QueryError},
    schema::{
        Id, Ingredient, NewIngredient, NewTag, NewUser, Recipe, RecipeData, RecipeFilter,
        RecipeIngredientRow, RecipeRelations, RecipeTagRow, Relation, Tag, User,
    },
    store::Store,
};

/// Postgres binds at most 65535 parameters per statement.
const BIND_LIMIT: usize = 65535;

#[derive(sqlx::FromRow)]
struct CountedUser {
    #[sqlx(flatten)]
    user: User,
    count: i64,
}

#[derive(sqlx::FromRow)]
struct CountedRecipe {
    #[sqlx(flatten)]
    recipe: Recipe,
    count: i64,
}

/// Escapes `%`, `_` and `\` so user input matches literally inside `LIKE`.
fn like_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSection) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .map_err(QueryError::from)?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueryError::from(sqlx::Error::from(e)))?;

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn insert_relations(
        tx: &mut Transaction<'_, Postgres>,
        recipe_id: Id,
        relations: &RecipeRelations,
    ) -> Result<(), Error> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) ");
        query_builder.push_values(relations.ingredients(), |mut b, ingredient| {
            b.push_bind(recipe_id)
                .push_bind(ingredient.id)
                .push_bind(ingredient.amount);
        });
        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(QueryError::from)?;

        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO recipe_tags (recipe_id, tag_id) ");
        query_builder.push_values(relations.tags(), |mut b, tag_id| {
            b.push_bind(recipe_id).push_bind(*tag_id);
        });
        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(QueryError::from)?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, Error> {
        let row: User = sqlx::query_as(
            "
            INSERT INTO users (username, email, first_name, last_name, password, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        ",
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.password)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn get_user(&self, id: Id) -> Result<Option<User>, Error> {
        let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn users_by_ids(&self, ids: &[Id]) -> Result<Vec<User>, Error> {
        let rows: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64), Error> {
        let rows: Vec<CountedUser> = sqlx::query_as(
            "SELECT u.*, COUNT(*) OVER() AS count FROM users u ORDER BY u.id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        let total_count = rows.first().map(|row| row.count).unwrap_or(0);
        Ok((rows.into_iter().map(|row| row.user).collect(), total_count))
    }

    async fn list_following(
        &self,
        user_id: Id,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error> {
        let rows: Vec<CountedUser> = sqlx::query_as(
            "
            SELECT u.*, COUNT(*) OVER() AS count
            FROM follows f
            INNER JOIN users u ON u.id = f.following_id
            WHERE f.user_id = $1
            ORDER BY f.id
            LIMIT $2 OFFSET $3
        ",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        let total_count = rows.first().map(|row| row.count).unwrap_or(0);
        Ok((rows.into_iter().map(|row| row.user).collect(), total_count))
    }

    async fn set_password(&self, id: Id, password: &str) -> Result<(), Error> {
        sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
            .bind(password)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(())
    }

    async fn delete_user(&self, id: Id) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_tag(&self, tag: NewTag) -> Result<Tag, Error> {
        let row: Tag =
            sqlx::query_as("INSERT INTO tags (name, color, slug) VALUES ($1, $2, $3) RETURNING *")
                .bind(tag.name)
                .bind(tag.color)
                .bind(tag.slug)
                .fetch_one(&self.pool)
                .await
                .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn get_tag(&self, id: Id) -> Result<Option<Tag>, Error> {
        let row: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn tags_by_ids(&self, ids: &[Id]) -> Result<Vec<Tag>, Error> {
        let rows: Vec<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, Error> {
        let rows: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn insert_ingredients(&self, ingredients: &[NewIngredient]) -> Result<u64, Error> {
        let mut inserted = 0;
        let mut tx = self.pool.begin().await.map_err(QueryError::from)?;

        for chunk in ingredients.chunks(BIND_LIMIT / 2) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO ingredients (name, measurement_unit) ");
            query_builder.push_values(chunk, |mut b, ingredient| {
                b.push_bind(&ingredient.name)
                    .push_bind(&ingredient.measurement_unit);
            });

            inserted += query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(QueryError::from)?
                .rows_affected();
        }

        tx.commit().await.map_err(QueryError::from)?;
        Ok(inserted)
    }

    async fn get_ingredient(&self, id: Id) -> Result<Option<Ingredient>, Error> {
        let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn ingredients_by_ids(&self, ids: &[Id]) -> Result<Vec<Ingredient>, Error> {
        let rows: Vec<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn search_ingredients(&self, search: &str) -> Result<Vec<Ingredient>, Error> {
        let rows: Vec<Ingredient> = sqlx::query_as(
            "
            SELECT * FROM ingredients
            WHERE name ILIKE '%' || $1 || '%'
            ORDER BY (name ILIKE $1 || '%') DESC, name, id
        ",
        )
        .bind(like_escape(search))
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn create_recipe(
        &self,
        author_id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let mut tx = self.pool.begin().await.map_err(QueryError::from)?;

        let recipe: Recipe = sqlx::query_as(
            "
            INSERT INTO recipes (author_id, name, text, image, cooking_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
        ",
        )
        .bind(author_id)
        .bind(data.name)
        .bind(data.text)
        .bind(data.image)
        .bind(data.cooking_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(QueryError::from)?;

        Self::insert_relations(&mut tx, recipe.id, relations).await?;
        tx.commit().await.map_err(QueryError::from)?;

        log::debug!("Created recipe {} with {} ingredients", recipe.id, relations.ingredients().len());
        Ok(recipe)
    }

    async fn update_recipe(
        &self,
        id: Id,
        data: RecipeData,
        relations: &RecipeRelations,
    ) -> Result<Recipe, Error> {
        let mut tx = self.pool.begin().await.map_err(QueryError::from)?;

        let recipe: Option<Recipe> = sqlx::query_as(
            "
            UPDATE recipes SET name = $1, text = $2, image = $3, cooking_time = $4
            WHERE id = $5
            RETURNING *
        ",
        )
        .bind(data.name)
        .bind(data.text)
        .bind(data.image)
        .bind(data.cooking_time)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(QueryError::from)?;

        let Some(recipe) = recipe else {
            return Err(HtmlError::NotFound.new("Recipe not found"));
        };

        sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(QueryError::from)?;

        sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(QueryError::from)?;

        Self::insert_relations(&mut tx, id, relations).await?;
        tx.commit().await.map_err(QueryError::from)?;

        Ok(recipe)
    }

    async fn delete_recipe(&self, id: Id) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM recipes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_recipe(&self, id: Id) -> Result<Option<Recipe>, Error> {
        let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn recipes_by_ids(&self, ids: &[Id]) -> Result<Vec<Recipe>, Error> {
        let rows: Vec<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn recipes_by_authors(&self, author_ids: &[Id]) -> Result<Vec<Recipe>, Error> {
        let rows: Vec<Recipe> = sqlx::query_as(
            "SELECT * FROM recipes WHERE author_id = ANY($1) ORDER BY pub_date DESC, id DESC",
        )
        .bind(author_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn list_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Recipe>, i64), Error> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");

        if let Some(author) = filter.author {
            query_builder.push(" AND r.author_id = ").push_bind(author);
        }
        if !filter.tags.is_empty() {
            query_builder
                .push(
                    " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id \
                     WHERE rt.recipe_id = r.id AND t.slug = ANY(",
                )
                .push_bind(filter.tags.clone())
                .push("))");
        }
        if let Some(user_id) = filter.favorited_by {
            query_builder
                .push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
        if let Some(user_id) = filter.in_shopping_cart_of {
            query_builder
                .push(
                    " AND EXISTS (SELECT 1 FROM shopping_list s WHERE s.recipe_id = r.id AND s.user_id = ",
                )
                .push_bind(user_id)
                .push(")");
        }

        query_builder
            .push(" ORDER BY r.pub_date DESC, r.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<CountedRecipe> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        let total_count = rows.first().map(|row| row.count).unwrap_or(0);
        Ok((rows.into_iter().map(|row| row.recipe).collect(), total_count))
    }

    async fn recipe_ingredients(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeIngredientRow>, Error> {
        let rows: Vec<RecipeIngredientRow> = sqlx::query_as(
            "
            SELECT ri.recipe_id AS recipe_id, i.id AS ingredient_id, i.name AS name,
                i.measurement_unit AS measurement_unit, ri.amount AS amount
            FROM recipe_ingredients ri
            INNER JOIN ingredients i ON i.id = ri.ingredient_id
            WHERE ri.recipe_id = ANY($1)
            ORDER BY ri.id
        ",
        )
        .bind(recipe_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn recipe_tags(&self, recipe_ids: &[Id]) -> Result<Vec<RecipeTagRow>, Error> {
        let rows: Vec<RecipeTagRow> = sqlx::query_as(
            "
            SELECT rt.recipe_id AS recipe_id, t.id AS id, t.name AS name, t.color AS color, t.slug AS slug
            FROM recipe_tags rt
            INNER JOIN tags t ON t.id = rt.tag_id
            WHERE rt.recipe_id = ANY($1)
            ORDER BY t.name
        ",
        )
        .bind(recipe_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn insert_relation(
        &self,
        relation: Relation,
        owner: Id,
        target: Id,
    ) -> Result<bool, Error> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            relation.table(),
            relation.owner_column(),
            relation.target_column()
        ))
        .bind(owner)
        .bind(target)
        .execute(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_relation(
        &self,
        relation: Relation,
        owner: Id,
        target: Id,
    ) -> Result<bool, Error> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            relation.table(),
            relation.owner_column(),
            relation.target_column()
        ))
        .bind(owner)
        .bind(target)
        .execute(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn relation_targets(
        &self,
        relation: Relation,
        owner: Id,
        among: Option<&[Id]>,
    ) -> Result<Vec<Id>, Error> {
        let table = relation.table();
        let owner_column = relation.owner_column();
        let target_column = relation.target_column();

        let rows: Vec<(Id,)> = match among {
            Some(ids) => sqlx::query_as(&format!(
                "SELECT {target_column} FROM {table} WHERE {owner_column} = $1 AND {target_column} = ANY($2) ORDER BY id"
            ))
            .bind(owner)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?,
            None => sqlx::query_as(&format!(
                "SELECT {target_column} FROM {table} WHERE {owner_column} = $1 ORDER BY id"
            ))
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?,
        };

        Ok(rows.into_iter().map(|row| row.0).collect())
    }
}
