//! LRU-cached rolling windows, one per characteristic, with lazy
//! hydration from the sample repository.
//!
//! The per-characteristic lock lives inside the cache entry itself and is
//! dropped along with the entry on eviction (rather than kept in a
//! separate lock table indexed by characteristic id) — this is the
//! simpler of the two valid designs and matches the intent of a cache
//! whose whole purpose is to be safely throwable away.

use super::rolling_window::RollingWindow;
use super::statistics::sigma_of_mean;
use crate::repo::{CharacteristicRepo, RepoError, SampleRepo};
use crate::types::{CharacteristicId, WindowPoint, Zone, ZoneBoundaries};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

struct CacheEntry {
    window: Arc<Mutex<RollingWindow>>,
}

pub struct WindowManager {
    sample_repo: Arc<dyn SampleRepo>,
    char_repo: Arc<dyn CharacteristicRepo>,
    capacity: usize,
    entries: RwLock<HashMap<CharacteristicId, CacheEntry>>,
    /// Most-recently-used order, most recent at the back. Kept separate
    /// from `entries` so eviction can walk it without holding a lock on
    /// any individual window.
    lru_order: RwLock<Vec<CharacteristicId>>,
}

impl WindowManager {
    pub fn new(sample_repo: Arc<dyn SampleRepo>, char_repo: Arc<dyn CharacteristicRepo>, capacity: usize) -> Self {
        Self {
            sample_repo,
            char_repo,
            capacity,
            entries: RwLock::new(HashMap::new()),
            lru_order: RwLock::new(Vec::new()),
        }
    }

    async fn touch(&self, char_id: CharacteristicId) {
        let mut order = self.lru_order.write().await;
        order.retain(|id| *id != char_id);
        order.push(char_id);
    }

    async fn evict_if_over_capacity(&self) {
        loop {
            let over_capacity = self.entries.read().await.len() > self.capacity;
            if !over_capacity {
                break;
            }
            let lru = {
                let mut order = self.lru_order.write().await;
                if order.is_empty() {
                    break;
                }
                order.remove(0)
            };
            self.entries.write().await.remove(&lru);
        }
    }

    async fn hydrate(&self, char_id: CharacteristicId) -> Result<RollingWindow, RepoError> {
        let raw = self.sample_repo.raw_history(char_id).await?;
        let mut window = RollingWindow::new();
        for sample in raw.into_iter().filter(|s| !s.excluded) {
            window.append(WindowPoint {
                sample_id: sample.sample_id,
                timestamp: sample.timestamp,
                mean: sample.mean,
                range: sample.range,
                actual_n: sample.actual_n,
                // Zone is recomputed once boundaries are set; until then,
                // hydrated historical points carry a placeholder zone that
                // is never consulted (rule evaluation only reads zones
                // assigned after boundaries exist).
                zone: Zone::ZoneCUpper,
            });
        }

        // Seed boundaries straight from the characteristic's current
        // stored limits so a cache miss never leaves a freshly hydrated
        // window unable to classify until something calls
        // `update_boundaries` separately. Reference n of 1 is arbitrary —
        // `stored_sigma` is process sigma, not sigma-of-the-mean, and
        // `classify_for_mode` rescales to each sample's own actual_n for
        // modes where that matters.
        if let Some(characteristic) = self.char_repo.get(char_id).await? {
            if let (Some(center_line), Some(sigma)) =
                (characteristic.stored_center_line, characteristic.stored_sigma)
            {
                window.set_boundaries(ZoneBoundaries::with_reference_n(center_line, sigma_of_mean(sigma, 1), 1));
            }
        }

        Ok(window)
    }

    /// Get (hydrating on first access) the shared window handle for a
    /// characteristic. Locking the returned handle serializes concurrent
    /// `process_sample` calls for the same characteristic.
    pub async fn get(&self, char_id: CharacteristicId) -> Result<Arc<Mutex<RollingWindow>>, RepoError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&char_id) {
                let window = entry.window.clone();
                drop(entries);
                self.touch(char_id).await;
                return Ok(window);
            }
        }

        let window = self.hydrate(char_id).await?;
        let handle = Arc::new(Mutex::new(window));

        let mut entries = self.entries.write().await;
        // Another task may have hydrated concurrently; prefer whichever
        // entry is already there to avoid discarding in-flight appends.
        let handle = entries
            .entry(char_id)
            .or_insert_with(|| CacheEntry { window: handle })
            .window
            .clone();
        drop(entries);

        self.touch(char_id).await;
        self.evict_if_over_capacity().await;
        Ok(handle)
    }

    /// Append a classified point to a characteristic's window, hydrating
    /// first if necessary.
    pub async fn add_sample(&self, char_id: CharacteristicId, point: WindowPoint) -> Result<(), RepoError> {
        let handle = self.get(char_id).await?;
        let mut window = handle.lock().await;
        window.append(point);
        Ok(())
    }

    /// Drop a characteristic's cached window entirely. Used after a limit
    /// recalculation, manual limit override, subgroup-mode migration, or
    /// sample exclusion invalidates cached boundaries or point data.
    pub async fn invalidate(&self, char_id: CharacteristicId) {
        self.entries.write().await.remove(&char_id);
        self.lru_order.write().await.retain(|id| *id != char_id);
    }

    pub async fn update_boundaries(
        &self,
        char_id: CharacteristicId,
        boundaries: ZoneBoundaries,
    ) -> Result<(), RepoError> {
        let handle = self.get(char_id).await?;
        let mut window = handle.lock().await;
        window.set_boundaries(boundaries);
        Ok(())
    }

    pub async fn cached_len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{InMemoryCharacteristicRepo, InMemorySampleRepo};

    fn managers(capacity: usize) -> (Arc<InMemorySampleRepo>, WindowManager) {
        let repo = Arc::new(InMemorySampleRepo::new());
        let char_repo = Arc::new(InMemoryCharacteristicRepo::new());
        let manager = WindowManager::new(repo.clone(), char_repo, capacity);
        (repo, manager)
    }

    #[tokio::test]
    async fn get_hydrates_from_repo_on_miss() {
        let (repo, manager) = managers(10);
        let char_id = CharacteristicId(1);
        repo.seed_raw(char_id, vec![1.0]).await;
        repo.seed_raw(char_id, vec![2.0]).await;

        let handle = manager.get(char_id).await.unwrap();
        assert_eq!(handle.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_cached_entry() {
        let (repo, manager) = managers(10);
        let char_id = CharacteristicId(1);
        repo.seed_raw(char_id, vec![1.0]).await;

        manager.get(char_id).await.unwrap();
        assert_eq!(manager.cached_len().await, 1);
        manager.invalidate(char_id).await;
        assert_eq!(manager.cached_len().await, 0);
    }

    #[tokio::test]
    async fn eviction_respects_capacity() {
        let (_repo, manager) = managers(2);
        manager.get(CharacteristicId(1)).await.unwrap();
        manager.get(CharacteristicId(2)).await.unwrap();
        manager.get(CharacteristicId(3)).await.unwrap();
        assert_eq!(manager.cached_len().await, 2);
    }

    #[tokio::test]
    async fn lru_eviction_spares_recently_touched_entry() {
        let (_repo, manager) = managers(2);
        manager.get(CharacteristicId(1)).await.unwrap();
        manager.get(CharacteristicId(2)).await.unwrap();
        manager.get(CharacteristicId(1)).await.unwrap(); // re-touch 1
        manager.get(CharacteristicId(3)).await.unwrap(); // evicts 2, not 1

        let entries = manager.entries.read().await;
        assert!(entries.contains_key(&CharacteristicId(1)));
        assert!(!entries.contains_key(&CharacteristicId(2)));
    }

    #[tokio::test]
    async fn hydrate_seeds_boundaries_from_stored_limits() {
        let repo = Arc::new(InMemorySampleRepo::new());
        let char_repo = Arc::new(InMemoryCharacteristicRepo::new());
        let char_id = CharacteristicId(1);
        let mut characteristic =
            crate::types::Characteristic::new(char_id, "Diameter", crate::types::SubgroupMode::NominalTolerance);
        characteristic.stored_center_line = Some(10.0);
        characteristic.stored_sigma = Some(1.0);
        char_repo.insert(characteristic).await.unwrap();

        let manager = WindowManager::new(repo, char_repo, 10);
        let handle = manager.get(char_id).await.unwrap();
        let window = handle.lock().await;
        assert_eq!(window.classify(13.5), Some(Zone::BeyondUcl));
    }
}
