use serde::{Deserialize, Serialize};

use crate::ids::{RunId, TicketId};

/// Diagnostic record the execution backend attaches to a finished ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp_ms: u64,
    pub run: RunId,
    pub ticket: TicketId,
    pub lambda: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl ReportEntry {
    /// Encode as one line of a JSON-lines execution log.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}
