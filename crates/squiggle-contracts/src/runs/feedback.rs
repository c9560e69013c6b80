use std::path::{Path, PathBuf};

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One per-round feedback record. Entries are composed during a round and
/// appended exactly once when the round resolves, so a failed improve
/// step is reflected in that round's single entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub round: u32,
    pub text: String,
    pub failed: bool,
    pub ts: String,
}

/// Append-only per-run feedback, in strict round order. Optionally
/// mirrored to a `feedback.jsonl` file in the run directory.
#[derive(Debug, Clone, Default)]
pub struct FeedbackLog {
    entries: Vec<FeedbackEntry>,
    mirror: Option<PathBuf>,
}

impl FeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            mirror: Some(path.into()),
        }
    }

    /// Drop all entries; called when a new run starts.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append the entry for `round`. Rounds must arrive in order with no
    /// gaps and no repeats.
    pub fn append(
        &mut self,
        round: u32,
        text: impl Into<String>,
        failed: bool,
    ) -> anyhow::Result<&FeedbackEntry> {
        let expected = self.entries.len() as u32 + 1;
        if round != expected {
            bail!("feedback round {round} out of order (expected {expected})");
        }
        let entry = FeedbackEntry {
            round,
            text: text.into(),
            failed,
            ts: now_utc_iso(),
        };
        if let Some(path) = &self.mirror {
            append_jsonl(path, &entry)?;
        }
        self.entries.push(entry);
        Ok(self.entries.last().expect("entry just pushed"))
    }

    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn append_jsonl(path: &Path, entry: &FeedbackEntry) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    use std::io::Write;
    file.write_all(serde_json::to_string(entry)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::FeedbackLog;

    #[test]
    fn appends_in_round_order() -> anyhow::Result<()> {
        let mut log = FeedbackLog::new();
        log.append(1, "round 1: stiff tail", false)?;
        log.append(2, "round 2: improve failed: timeout", true)?;

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].round, 1);
        assert!(!log.entries()[0].failed);
        assert!(log.entries()[1].failed);
        Ok(())
    }

    #[test]
    fn out_of_order_round_is_rejected() {
        let mut log = FeedbackLog::new();
        log.append(1, "ok", false).unwrap();
        assert!(log.append(3, "skipped a round", false).is_err());
        assert!(log.append(1, "repeat", false).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn clear_resets_round_ordering() -> anyhow::Result<()> {
        let mut log = FeedbackLog::new();
        log.append(1, "first run", false)?;
        log.clear();
        assert!(log.is_empty());
        log.append(1, "second run", false)?;
        assert_eq!(log.len(), 1);
        Ok(())
    }

    #[test]
    fn mirror_appends_jsonl_records() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("feedback.jsonl");
        let mut log = FeedbackLog::with_mirror(&path);
        log.append(1, "round 1: flat easing", false)?;
        log.append(2, "round 2: improve failed: 503", true)?;

        let raw = std::fs::read_to_string(path)?;
        let rows: Vec<Value> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["round"], Value::from(1));
        assert_eq!(rows[1]["failed"], Value::from(true));
        assert!(rows[0].get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
