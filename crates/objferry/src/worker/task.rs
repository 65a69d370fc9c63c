use std::cmp::Reverse;

use crate::catalog::CatalogEntry;

/// All pending rows of one path, transferred by a single worker in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferGroup {
    pub path: String,
    pub entries: Vec<CatalogEntry>,
}

impl TransferGroup {
    pub fn new(first: CatalogEntry) -> Self {
        Self {
            path: first.path.clone(),
            entries: vec![first],
        }
    }

    pub fn accepts(&self, entry: &CatalogEntry) -> bool {
        self.path == entry.path
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    /// Highest sequence held by the group.
    pub fn last_sequence(&self) -> i64 {
        self.entries.iter().map(|e| e.sequence).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts versions oldest first so that the latest one lands last.
    ///
    /// Listings yield versions newest first, so among equal mtimes the
    /// higher sequence is the older version.
    pub fn into_ordered(mut self) -> Vec<CatalogEntry> {
        self.entries.sort_by(|a, b| {
            (a.is_latest, &a.mtime, Reverse(a.sequence))
                .cmp(&(b.is_latest, &b.mtime, Reverse(b.sequence)))
        });
        self.entries
    }
}
