//! Tag resolution and transformation of raw groups into destination rows.
//!
//! Classification comes from the `"Prefix: Value"` tag naming convention
//! when the run collected tag resources, and from direct attribute probing
//! when it did not. The two paths are never merged per-field.

use std::collections::HashMap;

use gds_core::{GroupRow, RawGroup, RawIncluded, TagPayload};
use serde_json::Value;

pub const CRATE_NAME: &str = "gds-transform";

/// Build the tag id -> display-name lookup from the run's included
/// resources.
///
/// Upstream labels tag resources inconsistently (`Tag`, `tag`, `group_tag`),
/// so any type label containing "tag" qualifies. Items missing an id or a
/// name are skipped without error; later duplicate ids overwrite earlier
/// ones.
pub fn build_tag_lookup(included: &[RawIncluded]) -> HashMap<String, String> {
    let mut lookup = HashMap::new();
    for item in included {
        if !item.kind.to_ascii_lowercase().contains("tag") || item.id.is_empty() {
            continue;
        }
        let Some(name) = item.attributes.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        lookup.insert(item.id.clone(), name.to_string());
    }
    lookup
}

/// Structured output of resolving one group's tag references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTags {
    pub campus: Option<String>,
    pub stage_of_life: Option<String>,
    pub group_type: Option<String>,
    pub days_of_week: Vec<String>,
    pub tag_ids: Vec<String>,
    pub tag_names: Vec<String>,
}

/// Resolve a group's tag references against the lookup and apply the
/// `"Prefix: Value"` naming convention.
///
/// Every referenced id lands in `tag_ids`; only ids the lookup resolves
/// contribute a name. Recognized prefixes assign structured fields; `Day`
/// tags accumulate in appearance order. Tag authors own the convention, so
/// malformed or unrecognized names are inert rather than errors.
pub fn parse_tags(group: &RawGroup, lookup: &HashMap<String, String>) -> ParsedTags {
    let mut parsed = ParsedTags::default();

    for tag_ref in group.tag_refs() {
        parsed.tag_ids.push(tag_ref.id.clone());
        let Some(name) = lookup.get(&tag_ref.id) else {
            continue;
        };
        parsed.tag_names.push(name.clone());

        let Some((prefix, value)) = name.split_once(':') else {
            continue;
        };
        let prefix = prefix.trim();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        if prefix.eq_ignore_ascii_case("campus") {
            parsed.campus = Some(value.to_string());
        } else if prefix.eq_ignore_ascii_case("stage") {
            parsed.stage_of_life = Some(value.to_string());
        } else if prefix.eq_ignore_ascii_case("type") {
            parsed.group_type = Some(value.to_string());
        } else if prefix.eq_ignore_ascii_case("day") {
            parsed.days_of_week.push(value.to_string());
        }
    }

    parsed
}

/// First present value wins across the candidate keys; tolerant of upstream
/// attribute naming drift.
fn attr_str(attributes: &Value, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|key| {
        attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

fn attr_i64(attributes: &Value, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .find_map(|key| attributes.get(key).and_then(Value::as_i64))
}

fn classify_from_attributes(
    attributes: &Value,
) -> (Option<String>, Option<String>, Option<String>, Vec<String>) {
    let campus = attr_str(attributes, &["campus_name", "campus", "location_name"]);
    let stage_of_life = attr_str(attributes, &["life_stage", "group_lifestage", "age_range"]);
    let group_type = attr_str(attributes, &["group_type", "type", "category"]);
    let days_of_week = attr_str(attributes, &["meeting_day", "meets_on"])
        .map(|day| vec![day])
        .unwrap_or_default();
    (campus, stage_of_life, group_type, days_of_week)
}

/// Map one raw group into its destination row.
pub fn transform(group: &RawGroup, lookup: &HashMap<String, String>) -> GroupRow {
    let attributes = &group.attributes;

    // Absence of archived_at means the group is open.
    let is_open = attributes
        .get("archived_at")
        .map(Value::is_null)
        .unwrap_or(true);

    let parsed = parse_tags(group, lookup);
    let (campus, stage_of_life, group_type, days_of_week) = if lookup.is_empty() {
        classify_from_attributes(attributes)
    } else {
        (
            parsed.campus.clone(),
            parsed.stage_of_life.clone(),
            parsed.group_type.clone(),
            parsed.days_of_week.clone(),
        )
    };

    GroupRow {
        pco_group_id: group.id.clone(),
        name: attr_str(attributes, &["name"]),
        description: attr_str(attributes, &["description", "short_description"]),
        campus,
        days_of_week: if days_of_week.is_empty() {
            None
        } else {
            Some(days_of_week)
        },
        time_of_day: attr_str(attributes, &["meeting_time", "time", "starts_at"]),
        stage_of_life,
        group_type,
        is_open,
        max_size: attr_i64(attributes, &["capacity", "max_participants"]),
        current_size: attr_i64(attributes, &["enrollment", "current_participants"]),
        church_center_url: attr_str(attributes, &["url", "web_url", "public_url"]),
        tags: TagPayload {
            tag_ids: parsed.tag_ids,
            tag_names: parsed.tag_names,
        },
    }
}
