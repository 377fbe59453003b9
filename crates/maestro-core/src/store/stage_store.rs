//! Persistence for completed stage outcomes.
//!
//! One row per (pipeline, stage); re-running a stage overwrites its row.
//! JSON columns hold the merged data and the provider id lists.

use chrono::Utc;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;
use crate::error::OrchestratorError;
use crate::models::StageResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStageResult {
    pub pipeline_id: String,
    pub stage_id: u32,
    pub success: bool,
    pub merged_data: Value,
    pub providers_used: Vec<String>,
    pub fallbacks_used: Vec<String>,
    pub validation_score: f64,
    pub duration_ms: u64,
    /// Unix millis.
    pub created_at: i64,
}

#[derive(Clone)]
pub struct StageStore {
    db: Database,
}

impl StageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(
        &self,
        pipeline_id: &str,
        result: &StageResult,
    ) -> Result<(), OrchestratorError> {
        let pipeline_id = pipeline_id.to_string();
        let stage_id = result.stage_id;
        let success = result.success;
        let merged_data = result.merged_data.to_string();
        let providers_used = serde_json::to_string(&result.providers_used)
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        let fallbacks_used = serde_json::to_string(&result.fallbacks_used)
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        let validation_score = result.validation_score;
        let duration_ms = result.duration_ms;
        let created_at = Utc::now().timestamp_millis();

        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO stage_results \
                     (pipeline_id, stage_id, success, merged_data, providers_used, \
                      fallbacks_used, validation_score, duration_ms, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        pipeline_id,
                        stage_id,
                        success,
                        merged_data,
                        providers_used,
                        fallbacks_used,
                        validation_score,
                        duration_ms as i64,
                        created_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(
        &self,
        pipeline_id: &str,
        stage_id: u32,
    ) -> Result<Option<StoredStageResult>, OrchestratorError> {
        let pipeline_id = pipeline_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT pipeline_id, stage_id, success, merged_data, providers_used, \
                     fallbacks_used, validation_score, duration_ms, created_at \
                     FROM stage_results WHERE pipeline_id = ?1 AND stage_id = ?2",
                    rusqlite::params![pipeline_id, stage_id],
                    row_to_stored,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
            })
            .await
    }

    /// All stored stages of one pipeline run, in stage order.
    pub async fn list(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<StoredStageResult>, OrchestratorError> {
        let pipeline_id = pipeline_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT pipeline_id, stage_id, success, merged_data, providers_used, \
                     fallbacks_used, validation_score, duration_ms, created_at \
                     FROM stage_results WHERE pipeline_id = ?1 ORDER BY stage_id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![pipeline_id], row_to_stored)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn row_to_stored(row: &Row<'_>) -> Result<StoredStageResult, rusqlite::Error> {
    let merged_data: String = row.get(3)?;
    let providers_used: String = row.get(4)?;
    let fallbacks_used: String = row.get(5)?;
    let duration_ms: i64 = row.get(7)?;
    Ok(StoredStageResult {
        pipeline_id: row.get(0)?,
        stage_id: row.get(1)?,
        success: row.get(2)?,
        merged_data: serde_json::from_str(&merged_data).unwrap_or(Value::Null),
        providers_used: serde_json::from_str(&providers_used).unwrap_or_default(),
        fallbacks_used: serde_json::from_str(&fallbacks_used).unwrap_or_default(),
        validation_score: row.get(6)?,
        duration_ms: duration_ms as u64,
        created_at: row.get(8)?,
    })
}
