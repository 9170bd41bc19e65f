use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use time::OffsetDateTime;

use super::StorageHandle;
use crate::inventory::Item;

/// The last full fetch from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub items: Vec<Item>,
    pub fetched_at: OffsetDateTime,
    /// Remote-reported modification time, passed through verbatim.
    pub last_updated: Option<String>,
}

/// Best-effort copy of the remote inventory for offline reads. Nothing here
/// ever fails the caller: write errors are logged and dropped, read errors
/// look like an empty cache.
#[derive(Debug, Clone)]
pub struct LocalCache {
    storage: StorageHandle,
}

impl LocalCache {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    pub fn save(&self, items: &[Item], fetched_at: OffsetDateTime, last_updated: Option<&str>) {
        if let Err(err) = self.try_save(items, fetched_at, last_updated) {
            tracing::warn!(error = %format!("{err:#}"), "failed to refresh local cache");
        }
    }

    fn try_save(
        &self,
        items: &[Item],
        fetched_at: OffsetDateTime,
        last_updated: Option<&str>,
    ) -> Result<()> {
        let encoded = serde_json::to_string(items).context("encoding cached items")?;
        self.storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cache_snapshot (id, items, fetched_at, last_updated)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     items = excluded.items,
                     fetched_at = excluded.fetched_at,
                     last_updated = excluded.last_updated",
                params![encoded, fetched_at.unix_timestamp(), last_updated],
            )
            .context("writing cache snapshot")?;
            Ok(())
        })
    }

    pub fn load(&self) -> Option<CacheSnapshot> {
        match self.try_load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "ignoring unreadable local cache");
                None
            }
        }
    }

    fn try_load(&self) -> Result<Option<CacheSnapshot>> {
        let row = self.storage.with_connection(|conn| {
            conn.query_row(
                "SELECT items, fetched_at, last_updated FROM cache_snapshot WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .context("reading cache snapshot")
        })?;
        let Some((encoded, fetched_at, last_updated)) = row else {
            return Ok(None);
        };
        let items: Vec<Item> = serde_json::from_str(&encoded).context("decoding cached items")?;
        let fetched_at = OffsetDateTime::from_unix_timestamp(fetched_at)
            .context("decoding cache timestamp")?;
        Ok(Some(CacheSnapshot {
            items,
            fetched_at,
            last_updated,
        }))
    }

    pub fn last_fetched_at(&self) -> Option<OffsetDateTime> {
        let stamp = self
            .storage
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT fetched_at FROM cache_snapshot WHERE id = 1",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .context("reading cache timestamp")
            })
            .unwrap_or_else(|err| {
                tracing::warn!(error = %format!("{err:#}"), "cache timestamp unavailable");
                None
            })?;
        OffsetDateTime::from_unix_timestamp(stamp).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RowId;
    use crate::storage::testing::init_storage;
    use time::macros::datetime;

    fn sample_items() -> Vec<Item> {
        let mut rice = Item::new(RowId::new(2), "Rice");
        rice.quantity = "5 kg".into();
        rice.shop_info.insert("Rewe", "aisle 3");
        let mut beans = Item::new(RowId::new(3), "Beans");
        beans.expiration_date = "05.01.2027".into();
        beans.in_use = true;
        vec![rice, beans]
    }

    #[test]
    fn empty_cache_loads_nothing() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let cache = LocalCache::new(storage);
        assert!(cache.load().is_none());
        assert!(cache.last_fetched_at().is_none());
        Ok(())
    }

    #[test]
    fn save_replaces_the_whole_snapshot() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let cache = LocalCache::new(storage);
        let first = datetime!(2026-10-17 08:00 UTC);
        let second = datetime!(2026-10-18 09:30 UTC);

        cache.save(&sample_items(), first, Some("2026-10-17T07:59:00Z"));
        cache.save(&sample_items()[..1], second, None);

        let snapshot = cache.load().expect("snapshot present");
        assert_eq!(snapshot.items, sample_items()[..1].to_vec());
        assert_eq!(snapshot.fetched_at, second);
        assert_eq!(snapshot.last_updated, None);
        assert_eq!(cache.last_fetched_at(), Some(second));
        Ok(())
    }

    #[test]
    fn corrupt_snapshot_reads_as_missing() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cache_snapshot (id, items, fetched_at) VALUES (1, 'not json', 0)",
                [],
            )?;
            Ok(())
        })?;
        let cache = LocalCache::new(storage);
        assert!(cache.load().is_none());
        assert!(cache.last_fetched_at().is_some());
        Ok(())
    }

    #[test]
    fn write_failures_are_swallowed() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.with_connection(|conn| {
            conn.execute_batch("DROP TABLE cache_snapshot")?;
            Ok(())
        })?;
        let cache = LocalCache::new(storage);
        cache.save(&sample_items(), datetime!(2026-10-18 00:00 UTC), None);
        assert!(cache.load().is_none());
        Ok(())
    }
}
