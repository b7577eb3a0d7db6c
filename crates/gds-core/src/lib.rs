//! Core domain model for GDS: raw upstream payload shapes and the
//! destination row.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CRATE_NAME: &str = "gds-core";

/// One page of the upstream groups collection, JSON:API shaped.
///
/// `data` carries the primary group records, `included` the side-loaded
/// related resources (tags arrive here, referenced by id from each group),
/// `links`/`meta` the pagination cursor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsPage {
    #[serde(default)]
    pub data: Vec<RawGroup>,
    #[serde(default)]
    pub included: Vec<RawIncluded>,
    #[serde(default)]
    pub links: PageLinks,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Fallback cursor fields some API versions report under `meta` instead of
/// `links`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub next_page_url: Option<String>,
}

/// A raw upstream group record. Attribute naming is not contractually fixed
/// upstream, so `attributes` stays an opaque JSON object probed by the
/// transformer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub relationships: Relationships,
}

impl RawGroup {
    /// Bare tag references carried by the group's relationship collection.
    pub fn tag_refs(&self) -> &[ResourceRef] {
        self.relationships
            .tags
            .as_ref()
            .map(|collection| collection.data.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub tags: Option<RelationshipCollection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationshipCollection {
    #[serde(default)]
    pub data: Vec<ResourceRef>,
}

/// A bare `{type, id}` reference to a related resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
}

/// A side-loaded related resource. Tag resources carry a display name such
/// as `"Campus: Conway"` in `attributes.name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncluded {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
}

/// One row of the destination `groups` table, keyed on `pco_group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub pco_group_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub campus: Option<String>,
    pub days_of_week: Option<Vec<String>>,
    pub time_of_day: Option<String>,
    pub stage_of_life: Option<String>,
    pub group_type: Option<String>,
    pub is_open: bool,
    pub max_size: Option<i64>,
    pub current_size: Option<i64>,
    pub church_center_url: Option<String>,
    pub tags: TagPayload,
}

/// Structured tag payload persisted alongside the row. Ids always reflect
/// the group's references; names only the ids the run could resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagPayload {
    pub tag_ids: Vec<String>,
    pub tag_names: Vec<String>,
}
