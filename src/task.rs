//! Task list: the ordered items to harvest.
//!
//! One record per line, three tab-separated fields
//! (`collection<TAB>sub-collection<TAB>item`). Lines with any other field
//! count are skipped without comment.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Three-part composite key of one item (fond / opis / delo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub collection: String,
    pub sub_collection: String,
    pub item: String,
}

impl ItemKey {
    pub fn new(
        collection: impl Into<String>,
        sub_collection: impl Into<String>,
        item: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            sub_collection: sub_collection.into(),
            item: item.into(),
        }
    }

    /// Deterministic working-directory and artifact base name,
    /// e.g. `100-1-5`.
    pub fn folder_name(&self) -> String {
        format!("{}-{}-{}", self.collection, self.sub_collection, self.item)
    }

    /// Parse one task-list line. `None` unless it has exactly three fields.
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        match fields.as_slice() {
            [c, s, i] => Some(Self::new(c.trim(), s.trim(), i.trim())),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folder_name())
    }
}

/// Parse a whole task list held in memory.
pub fn parse_tasks(text: &str) -> Vec<ItemKey> {
    text.lines().filter_map(ItemKey::parse_line).collect()
}

/// Read the task list from disk.
///
/// # Errors
/// [`HarvestError::TaskListNotFound`] when the file is missing or unreadable.
pub fn load_tasks(path: &Path) -> Result<Vec<ItemKey>, HarvestError> {
    let text = std::fs::read_to_string(path).map_err(|_| HarvestError::TaskListNotFound {
        path: path.to_path_buf(),
    })?;
    let tasks = parse_tasks(&text);
    debug!("Loaded {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}
