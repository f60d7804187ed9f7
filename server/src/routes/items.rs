//! Item and change-stream routes.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use stash_engine::remote::wire::ChangeKind;
use stash_engine::Item;

use crate::auth::Authorized;
use crate::changes;
use crate::db::{self, StoredItem};
use crate::error::{AppError, Result};
use crate::AppState;

/// Create item routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/collections/{collection}/items", get(list).post(create))
        .route(
            "/collections/{collection}/items/{id}",
            put(replace).delete(remove),
        )
        .route("/collections/{collection}/changes", get(stream_changes))
}

/// Query parameters for listing items.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_id: Option<String>,
}

/// Reject items naming a column the collection does not declare.
async fn check_columns(state: &AppState, collection: &str, item: &Item) -> Result<()> {
    let columns = db::declared_columns(&state.pool, collection).await?;
    match db::unknown_column(columns.as_ref(), item) {
        Some(field) => {
            tracing::debug!(collection = %collection, field = %field, "rejected unknown column");
            Err(AppError::UnknownField(field.to_string()))
        }
        None => Ok(()),
    }
}

/// GET /collections/{collection}/items - newest first.
///
/// The owner filter only applies to collections that have an owner column.
async fn list(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Item>>> {
    let columns = db::declared_columns(&state.pool, &collection).await?;
    let owner = query
        .owner_id
        .as_deref()
        .filter(|_| db::scoped_by_owner(columns.as_ref()));

    let rows = db::list_items(&state.pool, &collection, owner).await?;
    tracing::debug!(collection = %collection, owner = ?owner, count = rows.len(), "listed items");

    Ok(Json(rows.into_iter().map(StoredItem::into_item).collect()))
}

/// POST /collections/{collection}/items
async fn create(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(collection): Path<String>,
    Json(item): Json<Item>,
) -> Result<(StatusCode, Json<Item>)> {
    check_columns(&state, &collection, &item).await?;

    if !db::insert_item(&state.pool, &collection, &item).await? {
        return Err(AppError::BadRequest(format!("duplicate id: {}", item.id)));
    }

    tracing::info!(collection = %collection, id = %item.id, "item created");
    state.hub.publish(&collection, ChangeKind::Insert);
    Ok((StatusCode::CREATED, Json(item)))
}

/// PUT /collections/{collection}/items/{id} - whole-item replace.
async fn replace(
    State(state): State<AppState>,
    _auth: Authorized,
    Path((collection, id)): Path<(String, String)>,
    Json(item): Json<Item>,
) -> Result<Json<Item>> {
    if item.id != id {
        return Err(AppError::BadRequest(format!(
            "body id {} does not match path id {id}",
            item.id
        )));
    }
    check_columns(&state, &collection, &item).await?;

    if !db::update_item(&state.pool, &collection, &item).await? {
        return Err(AppError::NotFound(format!("item {id}")));
    }

    tracing::info!(collection = %collection, id = %id, "item updated");
    state.hub.publish(&collection, ChangeKind::Update);
    Ok(Json(item))
}

/// DELETE /collections/{collection}/items/{id} - succeeds for missing rows.
async fn remove(
    State(state): State<AppState>,
    _auth: Authorized,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    if db::delete_item(&state.pool, &collection, &id).await? {
        tracing::info!(collection = %collection, id = %id, "item deleted");
        state.hub.publish(&collection, ChangeKind::Delete);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /collections/{collection}/changes - websocket upgrade.
///
/// The key is checked before the upgrade is accepted.
async fn stream_changes(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(collection): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(collection = %collection, "change socket upgrade requested");
    ws.on_upgrade(move |socket| changes::handle_change_socket(socket, state.hub, collection))
}
