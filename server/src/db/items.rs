//! Database operations for the items and collection_columns tables.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use stash_engine::item::{CREATED_AT_FIELD, ID_FIELD, OWNER_FIELD};
use stash_engine::Item;

/// A stored item row from the database.
#[derive(Debug)]
pub struct StoredItem {
    pub id: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fields: Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredItem {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredItem {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            created_at: row.try_get("created_at")?,
            fields: row.try_get("fields")?,
        })
    }
}

impl StoredItem {
    /// Convert database row to a wire item.
    pub fn into_item(self) -> Item {
        let fields = match self.fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Item {
            id: self.id,
            owner_id: self.owner_id,
            created_at: self.created_at,
            fields,
        }
    }
}

/// Permitted columns of a collection; `None` when it declares none.
///
/// Declared sets always include `id` and `created_at`.
pub async fn declared_columns(
    pool: &PgPool,
    collection: &str,
) -> Result<Option<HashSet<String>>, sqlx::Error> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT column_name
        FROM collection_columns
        WHERE collection = $1
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    if names.is_empty() {
        return Ok(None);
    }

    let mut columns: HashSet<String> = names.into_iter().collect();
    columns.insert(ID_FIELD.to_string());
    columns.insert(CREATED_AT_FIELD.to_string());
    Ok(Some(columns))
}

/// First column of `item` outside `columns`, if any.
pub fn unknown_column<'a>(columns: Option<&HashSet<String>>, item: &'a Item) -> Option<&'a str> {
    let columns = columns?;
    item.columns().find(|column| !columns.contains(*column))
}

/// Whether rows of a collection are filtered by owner.
pub fn scoped_by_owner(columns: Option<&HashSet<String>>) -> bool {
    columns.map_or(true, |columns| columns.contains(OWNER_FIELD))
}

/// All items of a collection, newest first, optionally for one owner.
pub async fn list_items(
    pool: &PgPool,
    collection: &str,
    owner: Option<&str>,
) -> Result<Vec<StoredItem>, sqlx::Error> {
    sqlx::query_as::<_, StoredItem>(
        r#"
        SELECT id, owner_id, created_at, fields
        FROM items
        WHERE collection = $1 AND ($2::text IS NULL OR owner_id = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(collection)
    .bind(owner)
    .fetch_all(pool)
    .await
}

/// Insert an item. Returns false if the id is already taken.
pub async fn insert_item(pool: &PgPool, collection: &str, item: &Item) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO items (collection, id, owner_id, created_at, fields)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (collection, id) DO NOTHING
        "#,
    )
    .bind(collection)
    .bind(&item.id)
    .bind(&item.owner_id)
    .bind(item.created_at)
    .bind(Value::Object(item.fields.clone()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Replace an item whole. Returns false if no row matched.
pub async fn update_item(pool: &PgPool, collection: &str, item: &Item) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE items
        SET owner_id = $3, created_at = $4, fields = $5
        WHERE collection = $1 AND id = $2
        "#,
    )
    .bind(collection)
    .bind(&item.id)
    .bind(&item.owner_id)
    .bind(item.created_at)
    .bind(Value::Object(item.fields.clone()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Delete an item. Returns false if it did not exist.
pub async fn delete_item(pool: &PgPool, collection: &str, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM items
        WHERE collection = $1 AND id = $2
        "#,
    )
    .bind(collection)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
