use std::cmp::Ordering;

use indexmap::IndexMap;
use strum::IntoEnumIterator;

use super::{ClassifiedItem, Status};
use crate::search::ItemQuery;

/// Classified items partitioned by status. Every status has a bucket, even
/// when it is empty, and buckets iterate in [`Status`] declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusGroups {
    buckets: IndexMap<Status, Vec<ClassifiedItem>>,
}

impl StatusGroups {
    pub fn get(&self, status: Status) -> &[ClassifiedItem] {
        self.buckets
            .get(&status)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Status, &[ClassifiedItem])> {
        self.buckets
            .iter()
            .map(|(status, items)| (*status, items.as_slice()))
    }

    pub fn statuses(&self) -> impl Iterator<Item = Status> + '_ {
        self.buckets.keys().copied()
    }

    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn summary(&self) -> Summary {
        Summary {
            in_use: self.get(Status::InUse).len(),
            expired: self.get(Status::Expired).len(),
            expiring: self.get(Status::Expiring).len(),
            ok: self.get(Status::Ok).len(),
        }
    }
}

impl Default for StatusGroups {
    fn default() -> Self {
        Self {
            buckets: Status::iter().map(|status| (status, Vec::new())).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub in_use: usize,
    pub expired: usize,
    pub expiring: usize,
    pub ok: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.in_use + self.expired + self.expiring + self.ok
    }

    pub fn count(&self, status: Status) -> usize {
        match status {
            Status::InUse => self.in_use,
            Status::Expired => self.expired,
            Status::Expiring => self.expiring,
            Status::Ok => self.ok,
        }
    }
}

pub fn group(items: Vec<ClassifiedItem>) -> StatusGroups {
    let mut groups = StatusGroups::default();
    for item in items {
        groups.buckets.entry(item.status).or_default().push(item);
    }
    for bucket in groups.buckets.values_mut() {
        // stable: undated items keep their input order at the tail
        bucket.sort_by(|a, b| by_alert(a.days_until_alert, b.days_until_alert));
    }
    groups
}

fn by_alert(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn filter(items: Vec<ClassifiedItem>, query: &ItemQuery) -> Vec<ClassifiedItem> {
    if query.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| query.matches(item))
        .collect()
}
