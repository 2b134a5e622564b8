//! Paginated listing of the entities usage can be reported for.
//!
//! The directory itself lives elsewhere (the admin database); the aggregator
//! only consumes one page at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One page of entity ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage {
    pub ids: Vec<String>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// External source of entity ids for one dimension.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// List up to `limit` ids starting at `cursor` (`None` for the first page).
    async fn list(&self, cursor: Option<&str>, limit: usize) -> Result<EntityPage, DirectoryError>;
}

/// Directory over a fixed list of ids. Cursors are offsets.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    ids: Vec<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl EntityDirectory for StaticDirectory {
    async fn list(&self, cursor: Option<&str>, limit: usize) -> Result<EntityPage, DirectoryError> {
        let start = match cursor {
            None => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| DirectoryError::InvalidCursor(raw.to_string()))?,
        };
        if start > self.ids.len() {
            return Err(DirectoryError::InvalidCursor(start.to_string()));
        }

        let end = start.saturating_add(limit.max(1)).min(self.ids.len());
        Ok(EntityPage {
            ids: self.ids[start..end].to_vec(),
            next_cursor: (end < self.ids.len()).then(|| end.to_string()),
        })
    }
}
