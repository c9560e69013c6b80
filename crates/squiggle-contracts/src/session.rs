use serde::{Deserialize, Serialize};

/// Which surface of the studio the user is looking at. The core never
/// renders; it only records the mode for the surrounding shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Preview,
    Code,
    Settings,
}

/// Session-scoped mutable state: the current generated artifact, the last
/// surfaced error, and the busy flag. Single-writer; during an active
/// optimization run the loop controller owns `current_code`.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub current_code: String,
    pub last_error: Option<String>,
    pub generating: bool,
    pub view_mode: ViewMode,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_artifact(&self) -> bool {
        !self.current_code.trim().is_empty()
    }

    /// Install a new artifact, clearing any stale error and switching the
    /// view back to the preview.
    pub fn set_artifact(&mut self, code: String) {
        self.current_code = code;
        self.last_error = None;
        self.view_mode = ViewMode::Preview;
    }

    /// Record a failure without touching the current artifact.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }
}
