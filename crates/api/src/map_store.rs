//! Resolved map configurations kept by token so tile requests can find
//! them. Least recently used configurations are forgotten first.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tilegraph_cache::MapConfigProvider;
use tilegraph_core::mapconfig::MapConfig;
use tilegraph_core::types::Timestamp;

#[derive(Debug, Clone)]
pub struct StoredMap {
    pub dbname: String,
    pub user: String,
    pub token: String,
    pub config: MapConfig,
    pub created_at: Timestamp,
}

impl MapConfigProvider for StoredMap {
    fn dbname(&self) -> &str {
        &self.dbname
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn map_config(&self) -> &MapConfig {
        &self.config
    }
}

pub struct MapStore {
    maps: Mutex<LruCache<String, Arc<StoredMap>>>,
}

impl MapStore {
    /// A store holding at most `max_items` configurations (at least one).
    pub fn new(max_items: usize) -> Self {
        let capacity = NonZeroUsize::new(max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            maps: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Keep `map` under its token. An existing entry for the token is kept
    /// and returned, so its creation time stays stable.
    pub fn insert(&self, map: StoredMap) -> Arc<StoredMap> {
        let mut maps = self.maps.lock();
        if let Some(existing) = maps.get(&map.token) {
            return Arc::clone(existing);
        }
        let map = Arc::new(map);
        maps.put(map.token.clone(), Arc::clone(&map));
        map
    }

    pub fn get(&self, token: &str) -> Option<Arc<StoredMap>> {
        self.maps.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
