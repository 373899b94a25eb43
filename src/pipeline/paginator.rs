//! Cursor-driven listing of entities.
//!
//! The paginator issues the entity search query until the upstream returns a
//! null cursor, classifying every entity by its tags. Entities that own their
//! data (dashboard pages, conditions) are stored in the result map right away;
//! the rest become parent GUIDs for the worker pool.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, instrument, warn};

use super::PipelineStats;
use crate::graphql::GraphQlClient;
use crate::graphql::payload::{EntitySearchData, GraphQlPayload, GraphQlResponse, RawEntity};
use crate::model::{Dashboard, ExportKind};

const CREATED_BY_TAG: &str = "createdBy";
const DASHBOARD_PAGE_TAG: &str = "isDashboardPage";

/// Outcome of the listing phase.
#[derive(Debug, Default)]
pub struct Listing {
    /// Terminal entities keyed by GUID, each with an empty widget map.
    pub dashboards: BTreeMap<String, Dashboard>,
    /// GUIDs needing a detail fetch, in discovery order, without duplicates.
    pub parent_guids: Vec<String>,
    /// Number of listing requests issued.
    pub pages_fetched: usize,
    seen_parents: HashSet<String>,
}

impl Listing {
    /// Classifies one page of entities and folds them into the listing.
    pub fn absorb(&mut self, kind: ExportKind, entities: Vec<RawEntity>) {
        for entity in entities {
            let dashboard = classify_entity(kind, entity);
            if is_terminal(kind, &dashboard) {
                self.dashboards.insert(dashboard.guid.clone(), dashboard);
            } else if self.seen_parents.insert(dashboard.guid.clone()) {
                self.parent_guids.push(dashboard.guid);
            } else {
                debug!(guid = %dashboard.guid, "parent listed twice, ignoring repeat");
            }
        }
    }
}

/// Drives the listing query across cursor pages for one account.
#[derive(Debug, Clone)]
pub struct Paginator {
    client: GraphQlClient,
    kind: ExportKind,
    account_id: u64,
}

impl Paginator {
    #[must_use]
    pub fn new(client: GraphQlClient, kind: ExportKind, account_id: u64) -> Self {
        Self {
            client,
            kind,
            account_id,
        }
    }

    /// Fetches every page until the cursor is null.
    ///
    /// There is no page cap: a cursor that never becomes null keeps this
    /// loop running, bounded only by the pipeline's run timeout. A body that
    /// fails to decode carries no cursor and therefore ends the listing.
    #[instrument(skip(self, stats), fields(kind = %self.kind, account_id = self.account_id))]
    pub async fn run(&self, stats: &PipelineStats) -> Listing {
        let mut listing = Listing::default();
        let mut cursor: Option<String> = None;

        loop {
            let payload = GraphQlPayload::entity_search(self.kind, self.account_id, cursor.take());
            let body = self.client.fetch_graphql(&payload).await;
            listing.pages_fetched += 1;
            stats.increment_pages();
            debug!(page = listing.pages_fetched, bytes = body.len(), "parsing listing response");

            let response = match GraphQlResponse::<EntitySearchData>::from_slice(&body) {
                Ok(response) => response,
                Err(e) => {
                    warn!(page = listing.pages_fetched, error = %e, "unparseable listing page, stopping pagination");
                    stats.increment_parse_failures();
                    break;
                }
            };
            if !response.errors.is_empty() {
                warn!(errors = ?response.error_messages(), "listing query reported errors");
            }

            let results = response.data.actor.entity_search.results;
            listing.absorb(self.kind, results.entities);

            match results.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            parents = listing.parent_guids.len(),
            stored = listing.dashboards.len(),
            pages = listing.pages_fetched,
            "listing complete"
        );
        stats.add_parents(listing.parent_guids.len());
        listing
    }
}

/// Copies entity fields and applies tag classification.
///
/// An entity whose tag count differs from what `kind` expects keeps its
/// default (empty/false) classification; it is logged, never rejected.
#[must_use]
pub fn classify_entity(kind: ExportKind, entity: RawEntity) -> Dashboard {
    let mut dashboard = Dashboard {
        account_id: entity.account_id,
        guid: entity.guid,
        name: entity.name,
        permalink: entity.permalink,
        ..Dashboard::default()
    };

    let expected = kind.expected_tag_count();
    if entity.tags.len() != expected {
        warn!(
            expected,
            found = entity.tags.len(),
            name = %dashboard.name,
            guid = %dashboard.guid,
            "unexpected tag count, using default classification"
        );
        return dashboard;
    }

    for tag in entity.tags {
        let [value] = tag.values.as_slice() else {
            continue;
        };
        match tag.key.as_str() {
            CREATED_BY_TAG => dashboard.created_by.clone_from(value),
            DASHBOARD_PAGE_TAG => dashboard.is_page = value == "true",
            _ => {}
        }
    }
    dashboard
}

/// Terminal entities are stored directly and never fetched in detail.
fn is_terminal(kind: ExportKind, dashboard: &Dashboard) -> bool {
    match kind {
        ExportKind::Dashboards => dashboard.is_page,
        ExportKind::Conditions => true,
    }
}
