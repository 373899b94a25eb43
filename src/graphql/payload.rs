//! GraphQL request payloads, response shapes and the fixed query documents.
//!
//! Only two query shapes are ever issued: the paginated entity search and the
//! per-dashboard detail query. Response types are lenient: GraphQL returns
//! `null` for missing objects and lists, which decode to their defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::GraphQlError;
use crate::model::{ExportKind, NrqlQuery};

/// Upstream error message marking a deleted or inaccessible entity.
pub const NOT_FOUND_MESSAGE: &str = "Not Found";

const DASHBOARD_DETAIL_QUERY: &str = "query getDashboard($guid: EntityGuid!) {actor {entity(guid: $guid) {... on DashboardEntity {name pages {name widgets {configuration {area {nrqlQueries {accountId query}} bar {nrqlQueries {accountId query}} billboard {nrqlQueries {accountId query}} line {nrqlQueries {accountId query}} markdown {text} pie {nrqlQueries {accountId query}} table {nrqlQueries {accountId query}}} id title} guid}}}}}";

/// Decodes `null` as `T::default()`.
///
/// # Errors
///
/// Returns the deserializer's error when the value is neither `null` nor a `T`.
pub fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Builds the entity search document for `kind` restricted to `account_id`.
#[must_use]
pub fn entity_search_query(kind: ExportKind, account_id: u64) -> String {
    let tags = kind
        .tag_filter()
        .iter()
        .map(|tag| format!("\"{tag}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "query EntitySearchQuery($cursor: String) {{actor {{entitySearch(query: \"{} AND accountId = {account_id}\", options: {{tagFilter: [{tags}]}}) {{results(cursor: $cursor) {{entities {{guid accountId name permalink tags {{key values}}}} nextCursor}}}}}}}}",
        kind.search_clause()
    )
}

/// Query-and-variables body posted to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphQlPayload {
    pub query: String,
    pub variables: Variables,
}

/// Variables for either query shape; unset values are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Variables {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl GraphQlPayload {
    /// Listing payload for one page; `cursor` is `None` for the first page.
    #[must_use]
    pub fn entity_search(kind: ExportKind, account_id: u64, cursor: Option<String>) -> Self {
        Self {
            query: entity_search_query(kind, account_id),
            variables: Variables {
                cursor,
                guid: None,
            },
        }
    }

    /// Detail payload for one dashboard.
    #[must_use]
    pub fn dashboard_detail(guid: impl Into<String>) -> Self {
        Self {
            query: DASHBOARD_DETAIL_QUERY.to_string(),
            variables: Variables {
                cursor: None,
                guid: Some(guid.into()),
            },
        }
    }
}

/// Envelope shared by every response.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Default + Deserialize<'de>"))]
pub struct GraphQlResponse<T> {
    #[serde(default, deserialize_with = "null_to_default")]
    pub errors: Vec<UpstreamError>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub data: T,
}

impl<T: DeserializeOwned + Default> GraphQlResponse<T> {
    /// Decodes a raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`GraphQlError::Decode`] for an empty or malformed body.
    pub fn from_slice(body: &[u8]) -> Result<Self, GraphQlError> {
        serde_json::from_slice(body).map_err(|e| GraphQlError::decode(body.len(), e))
    }
}

impl<T> GraphQlResponse<T> {
    /// Messages of every reported error, for logging.
    #[must_use]
    pub fn error_messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }
}

/// One entry of the response's `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UpstreamError {
    #[serde(default, deserialize_with = "null_to_default")]
    pub message: String,
}

// ==================== Entity search ====================

#[derive(Debug, Default, Deserialize)]
pub struct EntitySearchData {
    #[serde(default, deserialize_with = "null_to_default")]
    pub actor: SearchActor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchActor {
    #[serde(default, deserialize_with = "null_to_default")]
    pub entity_search: EntitySearch,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntitySearch {
    #[serde(default, deserialize_with = "null_to_default")]
    pub results: SearchResults,
}

/// One page of listing results.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default, deserialize_with = "null_to_default")]
    pub entities: Vec<RawEntity>,
    /// Continuation token; `None` ends pagination.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A listed entity before tag classification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntity {
    #[serde(default, deserialize_with = "null_to_default")]
    pub account_id: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub guid: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub permalink: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub tags: Vec<RawTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTag {
    #[serde(default, deserialize_with = "null_to_default")]
    pub key: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub values: Vec<String>,
}

// ==================== Dashboard detail ====================

#[derive(Debug, Default, Deserialize)]
pub struct DashboardDetailData {
    #[serde(default, deserialize_with = "null_to_default")]
    pub actor: DetailActor,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailActor {
    #[serde(default, deserialize_with = "null_to_default")]
    pub entity: DetailEntity,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailEntity {
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub pages: Vec<RawPage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawPage {
    #[serde(default, deserialize_with = "null_to_default")]
    pub guid: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub widgets: Vec<RawWidget>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawWidget {
    #[serde(default, deserialize_with = "null_to_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub configuration: WidgetConfiguration,
}

/// Mutually exclusive visualization slots. Markdown carries no queries and
/// is not decoded.
#[derive(Debug, Default, Deserialize)]
pub struct WidgetConfiguration {
    #[serde(default, deserialize_with = "null_to_default")]
    pub area: QuerySlot,
    #[serde(default, deserialize_with = "null_to_default")]
    pub bar: QuerySlot,
    #[serde(default, deserialize_with = "null_to_default")]
    pub billboard: QuerySlot,
    #[serde(default, deserialize_with = "null_to_default")]
    pub line: QuerySlot,
    #[serde(default, deserialize_with = "null_to_default")]
    pub pie: QuerySlot,
    #[serde(default, deserialize_with = "null_to_default")]
    pub table: QuerySlot,
}

impl WidgetConfiguration {
    /// Slots in priority order.
    fn slots(&self) -> [&QuerySlot; 6] {
        [
            &self.area,
            &self.bar,
            &self.billboard,
            &self.line,
            &self.pie,
            &self.table,
        ]
    }

    /// Queries of the first non-empty slot, or an empty list.
    #[must_use]
    pub fn displayed_queries(&self) -> Vec<NrqlQuery> {
        self.slots()
            .into_iter()
            .find(|slot| !slot.nrql_queries.is_empty())
            .map(|slot| slot.nrql_queries.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySlot {
    #[serde(default, deserialize_with = "null_to_default")]
    pub nrql_queries: Vec<NrqlQuery>,
}
