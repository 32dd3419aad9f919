/// Process-lifetime cache of filtered listing snapshots.
///
/// One slot per `CacheKey` ever requested, never evicted. Each slot is a `OnceCell`, so
/// the first caller for a key runs the fetch while concurrent callers await that same
/// initialisation instead of issuing their own. A failed fetch leaves the slot empty
/// and the next caller tries again; a successful one (even with zero rows) is final.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::model::{CacheKey, ResultEntry};

pub type Snapshot = Arc<[ResultEntry]>;

#[derive(Default)]
pub struct ResultCache {
    slots: Mutex<HashMap<CacheKey, Arc<OnceCell<Snapshot>>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the snapshot for `key`, running `populate` if no caller has filled it yet.
    pub async fn get_or_populate<F, Fut, E>(
        &self,
        key: &CacheKey,
        populate: F,
    ) -> Result<Snapshot, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ResultEntry>, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let snapshot = slot
            .get_or_try_init(move || async move { populate().await.map(Snapshot::from) })
            .await?;
        Ok(Arc::clone(snapshot))
    }

    /// Snapshot for `key` if it has been populated.
    pub async fn get(&self, key: &CacheKey) -> Option<Snapshot> {
        let slots = self.slots.lock().await;
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of populated keys.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }
}
