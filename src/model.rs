//! Records produced by the retrieval pipeline.
//!
//! A [`Dashboard`] is created during listing and mutated only by the
//! aggregator while detail records arrive. After the aggregator's final pass
//! it is read-only and handed to the export stage.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::graphql::null_to_default;

/// Which family of entities a run lists and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportKind {
    /// Dashboards: page entities are stored, parent dashboards are fetched
    /// for their widgets.
    #[default]
    Dashboards,
    /// Alert conditions: every listed entity is terminal, no detail fetch.
    ///
    /// The export for this kind carries only the entity columns, so the
    /// per-condition detail query and its query text are never requested.
    Conditions,
}

impl ExportKind {
    /// Number of classification tags every listed entity must carry.
    #[must_use]
    pub fn expected_tag_count(self) -> usize {
        match self {
            Self::Dashboards => 2,
            Self::Conditions => 1,
        }
    }

    /// Tag keys requested through the listing query's tag filter.
    #[must_use]
    pub fn tag_filter(self) -> &'static [&'static str] {
        match self {
            Self::Dashboards => &["createdBy", "isDashboardPage"],
            Self::Conditions => &["createdBy"],
        }
    }

    /// Entity search clause, without the account restriction.
    #[must_use]
    pub fn search_clause(self) -> &'static str {
        match self {
            Self::Dashboards => "domain = 'VIZ' AND type = 'DASHBOARD'",
            Self::Conditions => "domain = 'AIOPS' AND type = 'CONDITION'",
        }
    }

    /// Prefix of the CSV file written for this kind.
    #[must_use]
    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Dashboards => "dashboards",
            Self::Conditions => "conditions",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// A query embedded in a widget or condition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NrqlQuery {
    /// Account the query runs against (may differ from the dashboard's).
    #[serde(default, deserialize_with = "null_to_default")]
    pub account_id: u64,
    /// Opaque query text.
    #[serde(default, deserialize_with = "null_to_default")]
    pub query: String,
}

/// A visual element of a dashboard page with at least one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub id: i64,
    pub title: String,
    /// GUID of the page that owns this widget.
    pub page_guid: String,
    pub queries: Vec<NrqlQuery>,
}

/// A listed entity and, for dashboard pages, its merged widgets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dashboard {
    pub account_id: u64,
    pub guid: String,
    pub name: String,
    pub permalink: String,
    pub created_by: String,
    /// True for dashboard pages, which own widgets directly.
    pub is_page: bool,
    /// Widget ids, sorted ascending once aggregation has finished.
    pub widget_ids: Vec<i64>,
    pub widgets: HashMap<i64, Widget>,
}

impl Dashboard {
    /// Iterates widgets in `widget_ids` order.
    pub fn ordered_widgets(&self) -> impl Iterator<Item = &Widget> {
        self.widget_ids.iter().filter_map(|id| self.widgets.get(id))
    }
}
