//! CSV serialization of the aggregated result map.
//!
//! Dashboards produce one row per widget query; conditions produce one row
//! per entity. Rows follow GUID order, then ascending widget id, then the
//! upstream order of each widget's queries.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::model::{Dashboard, ExportKind};

const ENTITY_COLUMNS: [&str; 5] = ["accountId", "guid", "name", "permalink", "createdBy"];
const WIDGET_COLUMNS: [&str; 4] = ["chartId", "chartName", "nrqlAccountId", "nrqlQuery"];

/// Errors that can occur while writing the export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The output directory or file could not be created.
    #[error("cannot write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV writer failed.
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
}

impl ExportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File name for an export of `kind` for `account_id`, e.g. `dashboards_42.csv`.
#[must_use]
pub fn output_file_name(kind: ExportKind, account_id: u64) -> String {
    format!("{}_{account_id}.csv", kind.file_prefix())
}

/// Writes the header and every data row to `writer`.
///
/// Returns the number of data rows written (the header is not counted).
///
/// # Errors
///
/// Returns [`ExportError::Csv`] if a record cannot be written or flushed.
pub fn write_csv<W: Write>(
    writer: W,
    kind: ExportKind,
    dashboards: &BTreeMap<String, Dashboard>,
) -> Result<usize, ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);

    match kind {
        ExportKind::Dashboards => {
            wtr.write_record(ENTITY_COLUMNS.iter().chain(WIDGET_COLUMNS.iter()))?;
        }
        ExportKind::Conditions => wtr.write_record(ENTITY_COLUMNS)?,
    }

    let mut rows = 0usize;
    for dashboard in dashboards.values() {
        let account_id = dashboard.account_id.to_string();
        let entity = [
            account_id.as_str(),
            dashboard.guid.as_str(),
            dashboard.name.as_str(),
            dashboard.permalink.as_str(),
            dashboard.created_by.as_str(),
        ];

        if kind == ExportKind::Conditions {
            wtr.write_record(entity)?;
            rows += 1;
            continue;
        }

        for widget in dashboard.ordered_widgets() {
            let chart_id = widget.id.to_string();
            for query in &widget.queries {
                let query_account = query.account_id.to_string();
                wtr.write_record(entity.iter().copied().chain([
                    chart_id.as_str(),
                    widget.title.as_str(),
                    query_account.as_str(),
                    query.query.as_str(),
                ]))?;
                rows += 1;
            }
        }
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(rows)
}

/// Writes the export into `dir`, creating the directory if needed.
///
/// Returns the path written and the number of data rows.
///
/// # Errors
///
/// Returns [`ExportError::Io`] if the directory or file cannot be created,
/// or [`ExportError::Csv`] if writing fails.
#[instrument(skip_all, fields(dir = %dir.display(), kind = %kind, account_id = account_id, entities = dashboards.len()))]
pub fn write_csv_file(
    dir: &Path,
    kind: ExportKind,
    account_id: u64,
    dashboards: &BTreeMap<String, Dashboard>,
) -> Result<(PathBuf, usize), ExportError> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        debug!("creating output directory");
        std::fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;
    }

    let path = dir.join(output_file_name(kind, account_id));
    let file = File::create(&path).map_err(|e| ExportError::io(&path, e))?;
    let rows = write_csv(&file, kind, dashboards)?;
    file.sync_all().map_err(|e| ExportError::io(&path, e))?;

    info!(path = %path.display(), rows, "wrote CSV export");
    Ok((path, rows))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NrqlQuery, Widget};

    fn query(account_id: u64, text: &str) -> NrqlQuery {
        NrqlQuery {
            account_id,
            query: text.to_string(),
        }
    }

    fn dashboard(guid: &str, widgets: Vec<Widget>) -> Dashboard {
        let mut dashboard = Dashboard {
            account_id: 42,
            guid: guid.to_string(),
            name: format!("{guid} name"),
            permalink: format!("https://one.example.com/{guid}"),
            created_by: "alice".to_string(),
            is_page: true,
            ..Dashboard::default()
        };
        for widget in widgets {
            dashboard.widget_ids.push(widget.id);
            dashboard.widgets.insert(widget.id, widget);
        }
        dashboard
    }

    fn widget(id: i64, title: &str, queries: Vec<NrqlQuery>) -> Widget {
        Widget {
            id,
            title: title.to_string(),
            page_guid: String::new(),
            queries,
        }
    }

    fn render(kind: ExportKind, dashboards: &BTreeMap<String, Dashboard>) -> (String, usize) {
        let mut out = Vec::new();
        let rows = write_csv(&mut out, kind, dashboards).unwrap();
        (String::from_utf8(out).unwrap(), rows)
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(ExportKind::Dashboards, 42), "dashboards_42.csv");
        assert_eq!(output_file_name(ExportKind::Conditions, 7), "conditions_7.csv");
    }

    #[test]
    fn test_dashboard_rows_per_query_in_guid_order() {
        let mut map = BTreeMap::new();
        map.insert(
            "b-page".to_string(),
            dashboard("b-page", vec![widget(3, "Latency", vec![query(9, "SELECT 3")])]),
        );
        map.insert(
            "a-page".to_string(),
            dashboard(
                "a-page",
                vec![widget(
                    1,
                    "Errors",
                    vec![query(42, "SELECT 1"), query(43, "SELECT 2")],
                )],
            ),
        );

        let (text, rows) = render(ExportKind::Dashboards, &map);
        assert_eq!(rows, 3);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "accountId,guid,name,permalink,createdBy,chartId,chartName,nrqlAccountId,nrqlQuery"
        );
        assert!(lines[1].starts_with("42,a-page,"));
        assert!(lines[1].ends_with(",1,Errors,42,SELECT 1"));
        assert!(lines[2].ends_with(",1,Errors,43,SELECT 2"));
        assert!(lines[3].starts_with("42,b-page,"));
    }

    #[test]
    fn test_dashboard_without_widgets_writes_no_rows() {
        let mut map = BTreeMap::new();
        map.insert("empty".to_string(), dashboard("empty", vec![]));
        let (text, rows) = render(ExportKind::Dashboards, &map);
        assert_eq!(rows, 0);
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let mut map = BTreeMap::new();
        map.insert(
            "p".to_string(),
            dashboard(
                "p",
                vec![widget(5, "Hits, by host", vec![query(1, "SELECT count(*) FACET host")])],
            ),
        );
        let (text, _) = render(ExportKind::Dashboards, &map);
        assert!(text.contains("\"Hits, by host\""));
    }

    #[test]
    fn test_conditions_one_row_per_entity() {
        let mut map = BTreeMap::new();
        map.insert("c1".to_string(), dashboard("c1", vec![]));
        map.insert("c2".to_string(), dashboard("c2", vec![]));

        let (text, rows) = render(ExportKind::Conditions, &map);
        assert_eq!(rows, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "accountId,guid,name,permalink,createdBy");
        assert_eq!(lines[1], "42,c1,c1 name,https://one.example.com/c1,alice");
    }

    #[test]
    fn test_write_csv_file_creates_missing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("nested").join("out");
        let map = BTreeMap::new();

        let (path, rows) = write_csv_file(&dir, ExportKind::Dashboards, 42, &map).unwrap();
        assert_eq!(rows, 0);
        assert_eq!(path, dir.join("dashboards_42.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("accountId,"));
    }
}
