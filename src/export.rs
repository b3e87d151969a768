//! Result exporters: JSON, JSON Lines, CSV and SQLite.
//!
//! Exporters flatten each [`ScrapeResult`] into a record carrying the fetch
//! outcome plus the extracted data fields, then write the batch under the
//! configured export directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::error::{CrawlError, Result};
use crate::orchestrator::ScrapeResult;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
    Sqlite,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Sqlite => "db",
        }
    }
}

/// One flat record per result: fetch outcome columns plus data fields.
fn flatten(result: &ScrapeResult) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("url".to_string(), Value::String(result.url.clone()));
    record.insert("success".to_string(), Value::Bool(result.success));
    record.insert("status_code".to_string(), Value::from(result.status_code));
    record.insert(
        "error".to_string(),
        result
            .error
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "response_time".to_string(),
        Value::from(result.response_time),
    );
    for (key, value) in &result.data {
        record.insert(key.clone(), value.clone());
    }
    record
}

fn timestamped_filename(format: ExportFormat) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("export_{secs}.{}", format.extension())
}

/// Render a value for a CSV cell; composite values become JSON strings.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Writes result batches in a chosen format under the export directory.
pub struct Exporter {
    export_dir: PathBuf,
}

impl Exporter {
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }

    /// Export results, returning the written file path. `filename` overrides
    /// the timestamped default.
    pub async fn export(
        &self,
        results: &[ScrapeResult],
        format: ExportFormat,
        filename: Option<&str>,
    ) -> Result<PathBuf> {
        if results.is_empty() {
            return Err(CrawlError::InvalidConfig(
                "no results to export".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&self.export_dir).await?;

        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| timestamped_filename(format));
        let path = self.export_dir.join(filename);

        let records: Vec<Map<String, Value>> = results.iter().map(flatten).collect();
        match format {
            ExportFormat::Json => self.write_json(&records, &path).await?,
            ExportFormat::Jsonl => self.write_jsonl(&records, &path).await?,
            ExportFormat::Csv => self.write_csv(&records, &path).await?,
            ExportFormat::Sqlite => Self::write_sqlite(records, path.clone()).await?,
        }

        tracing::info!("Exported results {{ path: {}, count: {} }}", path.display(), results.len());
        Ok(path)
    }

    async fn write_json(&self, records: &[Map<String, Value>], path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    async fn write_jsonl(&self, records: &[Map<String, Value>], path: &Path) -> Result<()> {
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    async fn write_csv(&self, records: &[Map<String, Value>], path: &Path) -> Result<()> {
        // Union of keys over all records, sorted for a stable header row.
        let headers: Vec<String> = records
            .iter()
            .flat_map(|record| record.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut body = String::new();
        body.push_str(&headers.iter().map(|h| csv_escape(h)).collect::<Vec<_>>().join(","));
        body.push('\n');
        for record in records {
            let row: Vec<String> = headers
                .iter()
                .map(|header| {
                    record
                        .get(header)
                        .map(csv_cell)
                        .map(|cell| csv_escape(&cell))
                        .unwrap_or_default()
                })
                .collect();
            body.push_str(&row.join(","));
            body.push('\n');
        }
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    /// SQLite writes are blocking; run them off the async executor.
    async fn write_sqlite(records: Vec<Map<String, Value>>, path: PathBuf) -> Result<()> {
        tokio::task::spawn_blocking(move || -> Result<()> {
            let db = rusqlite::Connection::open(&path)?;
            db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

            let columns: Vec<String> = records
                .iter()
                .flat_map(|record| record.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let columns_sql = columns
                .iter()
                .map(|col| format!("\"{col}\" TEXT"))
                .collect::<Vec<_>>()
                .join(", ");
            db.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS scraped_data (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    {columns_sql},
                    _scraped_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )"
            ))?;

            let placeholders = columns
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            let column_names = columns
                .iter()
                .map(|col| format!("\"{col}\""))
                .collect::<Vec<_>>()
                .join(", ");
            let insert_sql =
                format!("INSERT INTO scraped_data ({column_names}) VALUES ({placeholders})");

            let mut statement = db.prepare(&insert_sql)?;
            for record in &records {
                let values: Vec<Option<String>> = columns
                    .iter()
                    .map(|col| match record.get(col) {
                        None | Some(Value::Null) => None,
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(other) => Some(other.to_string()),
                    })
                    .collect();
                statement.execute(rusqlite::params_from_iter(values.iter()))?;
            }
            Ok(())
        })
        .await
        .map_err(|join_error| {
            CrawlError::InvalidConfig(format!("sqlite export task failed: {join_error}"))
        })?
    }
}
