use time::{Date, OffsetDateTime};

use crate::inventory::{self, Item, RowId, StatusGroups, Summary};
use crate::search::ItemQuery;
use crate::storage::{ChangeRequest, PendingChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DataSource {
    Remote,
    Cache,
}

/// Items obtained by a refresh, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedItems {
    pub items: Vec<Item>,
    pub source: DataSource,
    /// Set when the remote could not be read and cached data is shown.
    pub advisory: Option<String>,
    pub last_updated: Option<String>,
    pub fetched_at: Option<OffsetDateTime>,
}

/// Everything a front end needs to render the inventory.
#[derive(Debug, Clone)]
pub struct InventoryView {
    pub groups: StatusGroups,
    pub summary: Summary,
    pub source: DataSource,
    pub advisory: Option<String>,
    pub last_updated: Option<String>,
    pub fetched_at: Option<OffsetDateTime>,
    pub pending: usize,
    pub today: Date,
}

impl InventoryView {
    pub fn build(
        loaded: LoadedItems,
        pending: &[PendingChange],
        query: &ItemQuery,
        today: Date,
    ) -> Self {
        let LoadedItems {
            mut items,
            source,
            advisory,
            last_updated,
            fetched_at,
        } = loaded;
        overlay_pending(&mut items, pending);
        let classified = inventory::classify_all(items, today);
        let groups = inventory::group(inventory::filter(classified, query));
        let summary = groups.summary();
        Self {
            groups,
            summary,
            source,
            advisory,
            last_updated,
            fetched_at,
            pending: pending.len(),
            today,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.source == DataSource::Cache
    }
}

/// Show queued writes as if they had already been applied. Queued adds
/// appear without a row id until the remote assigns one.
pub fn overlay_pending(items: &mut Vec<Item>, pending: &[PendingChange]) {
    for change in pending {
        match &change.request {
            ChangeRequest::Add { item } => items.push(item.to_item(RowId::UNASSIGNED)),
            ChangeRequest::Update { target, item } => {
                if let Some(existing) = items.iter_mut().find(|existing| existing.id == *target) {
                    item.apply_to(existing);
                }
            }
            ChangeRequest::Delete { target } => items.retain(|existing| existing.id != *target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{ItemDraft, Status};
    use crate::search::parse_item_query;
    use crate::storage::ChangeId;
    use time::macros::date;

    const TODAY: Date = date!(2026 - 10 - 18);

    fn pending(request: ChangeRequest) -> PendingChange {
        PendingChange {
            id: ChangeId::new(),
            request,
            created_at: OffsetDateTime::UNIX_EPOCH,
            retry_count: 0,
        }
    }

    fn loaded(items: Vec<Item>) -> LoadedItems {
        LoadedItems {
            items,
            source: DataSource::Remote,
            advisory: None,
            last_updated: None,
            fetched_at: None,
        }
    }

    #[test]
    fn pending_changes_overlay_fetched_items() {
        let mut items = vec![Item::new(RowId::new(2), "Rice"), Item::new(RowId::new(3), "Beans")];
        let changes = [
            pending(ChangeRequest::Delete {
                target: RowId::new(2),
            }),
            pending(ChangeRequest::Update {
                target: RowId::new(3),
                item: ItemDraft {
                    in_use: Some(true),
                    ..ItemDraft::default()
                },
            }),
            pending(ChangeRequest::Add {
                item: ItemDraft {
                    name: Some("Oats".into()),
                    ..ItemDraft::default()
                },
            }),
        ];
        overlay_pending(&mut items, &changes);

        let names: Vec<_> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["Beans", "Oats"]);
        assert!(items[0].in_use);
        assert_eq!(items[1].id, RowId::UNASSIGNED);
    }

    #[test]
    fn view_groups_filters_and_counts() {
        let mut old = Item::new(RowId::new(2), "Old milk");
        old.expiration_date = "2026-10-01".into();
        let mut soon = Item::new(RowId::new(3), "Yoghurt");
        soon.expiration_date = "2026-10-25".into();
        soon.alert_date = "2026-10-17".into();
        let fresh = Item::new(RowId::new(4), "Rice");

        let view = InventoryView::build(
            loaded(vec![old, soon, fresh]),
            &[],
            &ItemQuery::default(),
            TODAY,
        );
        assert_eq!(view.summary.total(), 3);
        assert_eq!(view.groups.get(Status::Expired)[0].item.name, "Old milk");
        assert_eq!(view.groups.get(Status::Expiring)[0].item.name, "Yoghurt");
        assert_eq!(view.pending, 0);
        assert!(!view.is_stale());

        let milk_only = InventoryView::build(
            loaded(vec![Item::new(RowId::new(5), "Milk"), Item::new(RowId::new(6), "Tea")]),
            &[],
            &parse_item_query("milk"),
            TODAY,
        );
        assert_eq!(milk_only.summary.total(), 1);
        assert_eq!(milk_only.groups.statuses().count(), 4);
    }
}
