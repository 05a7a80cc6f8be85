use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PageRecord;

/// One (user, page) join row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    pub user_id: Uuid,
    pub page_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Pages pinned by the acting user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinSet {
    pages: BTreeSet<Uuid>,
}

impl PinSet {
    pub fn contains(&self, page_id: Uuid) -> bool {
        self.pages.contains(&page_id)
    }

    pub fn insert(&mut self, page_id: Uuid) -> bool {
        self.pages.insert(page_id)
    }

    pub fn remove(&mut self, page_id: Uuid) -> bool {
        self.pages.remove(&page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.pages.iter().copied()
    }

    /// Pinned pages that still exist, folders excluded, sorted by title.
    pub fn pinned_pages<'a>(&self, records: &'a [PageRecord]) -> Vec<&'a PageRecord> {
        let mut pinned: Vec<&PageRecord> = records
            .iter()
            .filter(|r| self.contains(r.id) && !r.is_folder())
            .collect();
        pinned.sort_by_cached_key(|r| r.title.to_lowercase());
        pinned
    }
}

impl FromIterator<Uuid> for PinSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self {
            pages: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageKind, PageStatus};

    fn page(title: &str, kind: PageKind) -> PageRecord {
        PageRecord {
            id: Uuid::new_v4(),
            parent_id: None,
            title: title.to_string(),
            slug: title.to_lowercase(),
            kind,
            icon: None,
            status: PageStatus::Published,
            content_html: None,
            external_url: None,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pinned_pages_skip_folders_and_sort_by_title() {
        let records = vec![
            page("zeta", PageKind::Doc),
            page("Handbook", PageKind::Folder),
            page("alpha", PageKind::Sop),
            page("Unpinned", PageKind::Doc),
        ];
        let pins: PinSet = records[..3].iter().map(|r| r.id).collect();

        let titles: Vec<&str> = pins
            .pinned_pages(&records)
            .into_iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["alpha", "zeta"]);
    }

    #[test]
    fn pins_for_deleted_pages_are_ignored() {
        let records = vec![page("Kept", PageKind::Doc)];
        let mut pins = PinSet::default();
        pins.insert(Uuid::new_v4());
        pins.insert(records[0].id);

        assert_eq!(pins.len(), 2);
        assert_eq!(pins.pinned_pages(&records).len(), 1);
    }
}
