//! Item types stored in collections.

use crate::{ItemId, OwnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Wire name of the id column.
pub const ID_FIELD: &str = "id";
/// Wire name of the owner column.
pub const OWNER_FIELD: &str = "owner_id";
/// Wire name of the creation timestamp column.
pub const CREATED_AT_FIELD: &str = "created_at";

/// A single record in a collection.
///
/// Items are replaced whole on update; fields are never merged. Domain
/// fields are flattened so the serialized form is a flat row:
/// `{"id": "..", "created_at": "..", "title": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique within a collection instance
    #[serde(deserialize_with = "deserialize_id")]
    pub id: ItemId,
    /// Owner scope the row belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    /// Creation time, the canonical sort key
    pub created_at: DateTime<Utc>,
    /// Domain fields (title, author, rating, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Item {
    /// Create an item with no domain fields.
    pub fn new(id: impl Into<ItemId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            created_at,
            fields: Map::new(),
        }
    }

    /// Set a domain field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set the owner scope.
    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    /// Get a domain field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Copy of this item with `field` removed from its payload.
    ///
    /// Returns `None` for the columns every remote table must have (`id`,
    /// `created_at`), which cannot be dropped.
    pub fn without_field(&self, field: &str) -> Option<Item> {
        match field {
            ID_FIELD | CREATED_AT_FIELD => None,
            OWNER_FIELD => Some(Item {
                owner_id: None,
                ..self.clone()
            }),
            other => {
                let mut item = self.clone();
                item.fields.remove(other);
                Some(item)
            }
        }
    }

    /// Names of every top-level column this item would write.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        let owner = self.owner_id.as_ref().map(|_| OWNER_FIELD);
        [ID_FIELD, CREATED_AT_FIELD]
            .into_iter()
            .chain(owner)
            .chain(self.fields.keys().map(String::as_str))
    }
}

/// Sort items newest first. Stable, so equal timestamps keep their order.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Accept both string and numeric ids; remote tables often use integer keys.
fn deserialize_id<'de, D>(deserializer: D) -> Result<ItemId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// An item as submitted by the caller, before the engine assigns the
/// provisional `id` and `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Draft {
    /// Create an empty draft.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use a caller-chosen creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set a domain field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Fill in whatever is missing and produce the item.
    ///
    /// A missing id becomes a UUID v4 string; a missing timestamp becomes `now`.
    pub fn into_item(mut self, now: DateTime<Utc>) -> Item {
        // Reserved columns can't ride along as domain fields.
        self.fields.remove(ID_FIELD);
        self.fields.remove(CREATED_AT_FIELD);
        self.fields.remove(OWNER_FIELD);

        Item {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            owner_id: None,
            created_at: self.created_at.unwrap_or(now),
            fields: self.fields,
        }
    }
}

impl From<Map<String, Value>> for Draft {
    fn from(fields: Map<String, Value>) -> Self {
        Self {
            id: None,
            created_at: None,
            fields,
        }
    }
}
