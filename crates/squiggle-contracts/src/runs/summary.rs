use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of one optimization run, written to the run directory when
/// the loop deactivates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_rounds: u32,
    pub improved_rounds: u32,
    pub failed_rounds: u32,
    pub cancelled: bool,
}

pub fn write_loop_summary(path: &Path, summary: &LoopSummary) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(summary)?
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
