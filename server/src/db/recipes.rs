//! Database operations for the recipes table.

use recipebox_engine::{Location, RecipeBody, RemoteRecipe};
use sqlx::{PgConnection, PgPool, Row};

const COLUMNS: &str = "id, client_id, title, ingredients, steps, location, photo_url, version, deleted";

/// A stored recipe row from the database.
#[derive(Debug)]
pub struct StoredRecipe {
    pub id: String,
    pub client_id: Option<String>,
    pub title: String,
    pub ingredients: serde_json::Value,
    pub steps: serde_json::Value,
    pub location: Option<serde_json::Value>,
    pub photo_url: Option<String>,
    pub version: i64,
    pub deleted: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecipe {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecipe {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            title: row.try_get("title")?,
            ingredients: row.try_get("ingredients")?,
            steps: row.try_get("steps")?,
            location: row.try_get("location")?,
            photo_url: row.try_get("photo_url")?,
            version: row.try_get("version")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl StoredRecipe {
    /// Convert a database row to the wire representation.
    pub fn to_remote(&self) -> Result<RemoteRecipe, serde_json::Error> {
        let location: Option<Location> = match &self.location {
            Some(value) => serde_json::from_value(value.clone())?,
            None => None,
        };
        Ok(RemoteRecipe {
            remote_id: self.id.clone(),
            client_id: self.client_id.clone(),
            title: self.title.clone(),
            ingredients: serde_json::from_value(self.ingredients.clone())?,
            steps: serde_json::from_value(self.steps.clone())?,
            location,
            photo_url: self.photo_url.clone(),
            updated_at: self.version as u64,
            deleted: self.deleted,
        })
    }
}

fn location_json(body: &RecipeBody) -> Result<Option<serde_json::Value>, sqlx::Error> {
    body.location
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Serialize writers for the rest of the transaction.
///
/// Versions then commit in increasing order, so a pull cursor never skips a
/// row that commits late.
pub async fn lock_versions(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(7201)")
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert a new recipe with the next version.
pub async fn insert_recipe(
    conn: &mut PgConnection,
    id: &str,
    body: &RecipeBody,
) -> Result<StoredRecipe, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO recipes (
            id, client_id, title, ingredients, steps, location, photo_url, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, nextval('recipe_version_seq'))
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, StoredRecipe>(&sql)
        .bind(id)
        .bind(&body.client_id)
        .bind(&body.title)
        .bind(sqlx::types::Json(&body.ingredients))
        .bind(sqlx::types::Json(&body.steps))
        .bind(location_json(body)?)
        .bind(&body.photo_url)
        .fetch_one(conn)
        .await
}

/// Replace the content of a live recipe. Returns `None` when the recipe is
/// missing or deleted.
pub async fn update_recipe(
    conn: &mut PgConnection,
    id: &str,
    body: &RecipeBody,
) -> Result<Option<StoredRecipe>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE recipes SET
            title = $2,
            ingredients = $3,
            steps = $4,
            location = $5,
            photo_url = $6,
            version = nextval('recipe_version_seq'),
            modified_at = NOW()
        WHERE id = $1 AND deleted = FALSE
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, StoredRecipe>(&sql)
        .bind(id)
        .bind(&body.title)
        .bind(sqlx::types::Json(&body.ingredients))
        .bind(sqlx::types::Json(&body.steps))
        .bind(location_json(body)?)
        .bind(&body.photo_url)
        .fetch_optional(conn)
        .await
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Now,
    Already,
    Missing,
}

/// Tombstone a recipe. Deleting a tombstone is a no-op.
pub async fn delete_recipe(conn: &mut PgConnection, id: &str) -> Result<Deleted, sqlx::Error> {
    let deleted: Option<bool> =
        sqlx::query_scalar("SELECT deleted FROM recipes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    match deleted {
        None => Ok(Deleted::Missing),
        Some(true) => Ok(Deleted::Already),
        Some(false) => {
            sqlx::query(
                r#"
                UPDATE recipes SET
                    deleted = TRUE,
                    version = nextval('recipe_version_seq'),
                    modified_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(conn)
            .await?;
            Ok(Deleted::Now)
        }
    }
}

/// Recipes (tombstones included) with a version above `since`, oldest first.
pub async fn recipes_since(
    pool: &PgPool,
    since: i64,
    limit: i64,
) -> Result<Vec<StoredRecipe>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {}
        FROM recipes
        WHERE version > $1
        ORDER BY version ASC
        LIMIT $2
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, StoredRecipe>(&sql)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> StoredRecipe {
        StoredRecipe {
            id: "r1".into(),
            client_id: Some("rec-1".into()),
            title: "Pasta".into(),
            ingredients: json!(["spaghetti", "salt"]),
            steps: json!(["Boil"]),
            location: Some(json!({"latitude": 41.9, "longitude": 12.5})),
            photo_url: None,
            version: 12,
            deleted: false,
        }
    }

    #[test]
    fn row_converts_to_wire_recipe() {
        let recipe = row().to_remote().unwrap();
        assert_eq!(recipe.remote_id, "r1");
        assert_eq!(recipe.ingredients, vec!["spaghetti", "salt"]);
        assert_eq!(recipe.location, Some(Location::new(41.9, 12.5)));
        assert_eq!(recipe.updated_at, 12);
    }

    #[test]
    fn corrupt_json_column_is_an_error() {
        let mut stored = row();
        stored.steps = json!({"not": "a list"});
        assert!(stored.to_remote().is_err());
    }
}
