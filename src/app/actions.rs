use anyhow::{bail, Result};

use crate::config::DisplayConfig;
use crate::dates;
use crate::inventory::{ItemDraft, RowId};
use crate::storage::{ChangeId, ChangeRequest, PendingQueue};

/// Turns user mutations into queued changes. Nothing here touches the
/// network.
pub struct ActionDispatcher<'a> {
    queue: &'a PendingQueue,
    display: &'a DisplayConfig,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(queue: &'a PendingQueue, display: &'a DisplayConfig) -> Self {
        Self { queue, display }
    }

    pub fn add(&self, draft: ItemDraft) -> Result<ChangeId> {
        let mut draft = normalize(draft)?;
        if let Some(window) = self.display.default_alert_window {
            let has_alert = draft.alert_date.as_deref().is_some_and(|alert| !alert.is_empty());
            if !has_alert {
                if let Some(alert) = draft
                    .expiration_date
                    .as_deref()
                    .and_then(|expiration| dates::alert_date_for(expiration, window))
                {
                    draft.alert_date = Some(dates::iso(alert));
                }
            }
        }
        Ok(self.queue.enqueue(ChangeRequest::Add { item: draft })?)
    }

    pub fn update(&self, target: RowId, draft: ItemDraft) -> Result<ChangeId> {
        let draft = normalize(draft)?;
        if draft.is_empty() {
            bail!("nothing to update for item {target}");
        }
        Ok(self.queue.enqueue(ChangeRequest::Update {
            target,
            item: draft,
        })?)
    }

    pub fn delete(&self, target: RowId) -> Result<ChangeId> {
        Ok(self.queue.enqueue(ChangeRequest::Delete { target })?)
    }
}

/// Trim names and rewrite dates as `YYYY-MM-DD` so a queued value reads back
/// the same way it was meant. An empty date clears the cell.
fn normalize(mut draft: ItemDraft) -> Result<ItemDraft> {
    if let Some(name) = draft.name.as_mut() {
        *name = name.trim().to_string();
    }
    for (label, field) in [
        ("expiration", &mut draft.expiration_date),
        ("alert", &mut draft.alert_date),
    ] {
        if let Some(text) = field.as_mut() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                text.clear();
                continue;
            }
            match dates::parse(trimmed) {
                Some(date) => *text = dates::iso(date),
                None => bail!("unrecognised {label} date '{trimmed}'"),
            }
        }
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::AlertWindow;
    use crate::storage::testing::init_storage;

    #[test]
    fn add_normalises_dates_and_derives_alert() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let display = DisplayConfig {
            default_alert_window: Some(AlertWindow::OneWeek),
            ..DisplayConfig::default()
        };
        let dispatcher = ActionDispatcher::new(&queue, &display);
        dispatcher.add(ItemDraft {
            name: Some("  Honey ".into()),
            expiration_date: Some("05.01.2027".into()),
            ..ItemDraft::default()
        })?;

        let queued = queue.dequeue_all()?;
        let draft = queued[0].request.draft().expect("add carries a draft");
        assert_eq!(draft.name.as_deref(), Some("Honey"));
        assert_eq!(draft.expiration_date.as_deref(), Some("2027-05-01"));
        assert_eq!(draft.alert_date.as_deref(), Some("2027-04-24"));
        Ok(())
    }

    #[test]
    fn rejects_unreadable_dates_and_empty_updates() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let display = DisplayConfig::default();
        let dispatcher = ActionDispatcher::new(&queue, &display);

        let bad_date = dispatcher.add(ItemDraft {
            name: Some("Tea".into()),
            expiration_date: Some("31.02.2027".into()),
            ..ItemDraft::default()
        });
        assert!(bad_date.is_err());
        assert!(dispatcher.update(RowId::new(3), ItemDraft::default()).is_err());
        assert!(dispatcher.delete(RowId::UNASSIGNED).is_err());

        dispatcher.update(
            RowId::new(3),
            ItemDraft {
                alert_date: Some("  ".into()),
                ..ItemDraft::default()
            },
        )?;
        let queued = queue.dequeue_all()?;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0].request.draft().and_then(|d| d.alert_date.as_deref()),
            Some("")
        );
        Ok(())
    }
}
