use serde::{Deserialize, Serialize};

/// One visited flow object, recorded in visit order.
///
/// For call activities and sub-processes the entry also carries the
/// nested instance's own history, grafted in when the nested instance
/// completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Name of the visited flow object
    pub name: String,
    /// History of the nested instance, for call activities and
    /// sub-processes
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sub_process_history: Option<HistoryLog>,
}

impl HistoryEntry {
    /// Create a plain entry with no nested history
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_process_history: None,
        }
    }
}

/// Append-only visit log of a process instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a visit
    pub fn append(&mut self, name: impl Into<String>) {
        self.entries.push(HistoryEntry::new(name));
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Visited names, oldest first
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// The most recent entry for the given name
    pub fn last_entry_for(&self, name: &str) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    /// Mutable access to the most recent entry for the given name.
    /// Nested history is grafted through this.
    pub fn last_entry_for_mut(&mut self, name: &str) -> Option<&mut HistoryEntry> {
        self.entries.iter_mut().rev().find(|e| e.name == name)
    }

    /// Whether nothing has been visited yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
