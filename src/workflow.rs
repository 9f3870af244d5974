//! Workflow records: the per-ingestion progress ledger.
//!
//! Every ingested play gets exactly one workflow record. Enrichment steps are
//! modelled as named [`Capability`] entries, each carrying a
//! `(required, done)` pair. The JSON form flattens those pairs into
//! `<capability>_required` / `<capability>_done` keys, so the standard
//! capabilities render as `genre_required`, `yt_required`, `genre_done` and
//! `yt_done`.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a workflow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A named enrichment step tracked on every workflow record.
///
/// New capabilities are new constants plus a trigger rule; they never need a
/// schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(&'static str);

impl Capability {
    /// Genre lookup for newly seen artists.
    pub const GENRE: Capability = Capability("genre");

    /// Alternate-source (video platform) resolution for newly seen tracks.
    pub const ALTERNATE_SOURCE: Capability = Capability("yt");

    /// Define a custom capability.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    /// JSON key of the required flag, e.g. `genre_required`.
    pub fn required_key(&self) -> String {
        format!("{}_required", self.0)
    }

    /// JSON key of the done flag, e.g. `genre_done`.
    pub fn done_key(&self) -> String {
        format!("{}_done", self.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

/// Required/done pair for one capability of one workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub required: bool,
    pub done: bool,
}

impl Progress {
    /// Work was requested and has not completed yet.
    pub fn is_outstanding(&self) -> bool {
        self.required && !self.done
    }
}

/// Snapshot of a workflow record.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub init_done: bool,
    pub created_at: DateTime<Utc>,
    /// Keyed by capability name.
    pub capabilities: BTreeMap<String, Progress>,
}

impl WorkflowState {
    /// Progress for a capability. Unknown capabilities read as not required.
    pub fn progress(&self, capability: Capability) -> Progress {
        self.capabilities
            .get(capability.name())
            .copied()
            .unwrap_or_default()
    }

    pub fn is_required(&self, capability: Capability) -> bool {
        self.progress(capability).required
    }

    pub fn is_done(&self, capability: Capability) -> bool {
        self.progress(capability).done
    }

    /// Names of capabilities that are required but not yet done.
    pub fn outstanding(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .filter(|(_, p)| p.is_outstanding())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Ingestion finished and every required capability is done.
    pub fn is_complete(&self) -> bool {
        self.init_done && self.capabilities.values().all(|p| !p.is_outstanding())
    }
}

impl Serialize for WorkflowState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3 + 2 * self.capabilities.len()))?;
        map.serialize_entry("workflow_id", &self.workflow_id)?;
        map.serialize_entry("init_done", &self.init_done)?;
        map.serialize_entry("created_at", &self.created_at)?;
        for (name, progress) in &self.capabilities {
            map.serialize_entry(&format!("{name}_required"), &progress.required)?;
            map.serialize_entry(&format!("{name}_done"), &progress.done)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawWorkflowState {
    workflow_id: WorkflowId,
    init_done: bool,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    flags: BTreeMap<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for WorkflowState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawWorkflowState::deserialize(deserializer)?;
        let mut capabilities: BTreeMap<String, Progress> = BTreeMap::new();

        for (key, value) in raw.flags {
            let Some(flag) = value.as_bool() else {
                continue;
            };
            if let Some(name) = key.strip_suffix("_required") {
                capabilities.entry(name.to_string()).or_default().required = flag;
            } else if let Some(name) = key.strip_suffix("_done") {
                capabilities.entry(name.to_string()).or_default().done = flag;
            }
        }

        Ok(WorkflowState {
            workflow_id: raw.workflow_id,
            init_done: raw.init_done,
            created_at: raw.created_at,
            capabilities,
        })
    }
}
