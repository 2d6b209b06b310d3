use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single cached value with a time-to-live. `bypass` forces a refetch and
/// replaces the cached value, which is how the saved-playlists cache is kept
/// fresh once a playlist has been created during a run.
#[derive(Debug)]
pub struct TtlCell<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_fetch<Fut, E>(&self, bypass: bool, fetch: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !bypass {
            if let Some(value) = self.get() {
                return Ok(value);
            }
        }
        let value = fetch.await?;
        self.put(value.clone());
        Ok(value)
    }

    fn get(&self) -> Option<T> {
        let slot = self.slot.lock().expect("cache lock poisoned");
        match slot.as_ref() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    fn put(&self, value: T) {
        let mut slot = self.slot.lock().expect("cache lock poisoned");
        *slot = Some((Instant::now(), value));
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().expect("cache lock poisoned");
        *slot = None;
    }
}

/// Keyed variant of [`TtlCell`], used for per-playlist item caches.
#[derive(Debug)]
pub struct TtlMap<K, V> {
    ttl: Duration,
    map: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<Fut, E>(&self, key: &K, fetch: Fut) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch.await?;
        self.put(key.clone(), value.clone());
        Ok(value)
    }

    fn get(&self, key: &K) -> Option<V> {
        let map = self.map.lock().expect("cache lock poisoned");
        match map.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    fn put(&self, key: K, value: V) {
        let mut map = self.map.lock().expect("cache lock poisoned");
        map.insert(key, (Instant::now(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fetch_counting(counter: &mut usize, value: u32) -> Result<u32, ()> {
        *counter += 1;
        Ok(value)
    }

    #[tokio::test]
    async fn test_cell_serves_cached_value() {
        let cell = TtlCell::new(Duration::from_secs(60));
        let mut fetches = 0;
        let first = cell
            .get_or_fetch(false, fetch_counting(&mut fetches, 1))
            .await
            .unwrap();
        let second = cell
            .get_or_fetch(false, fetch_counting(&mut fetches, 2))
            .await
            .unwrap();
        assert_eq!((first, second), (1, 1));
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_cell_bypass_refetches_and_replaces() {
        let cell = TtlCell::new(Duration::from_secs(60));
        let mut fetches = 0;
        cell.get_or_fetch(false, fetch_counting(&mut fetches, 1))
            .await
            .unwrap();
        let bypassed = cell
            .get_or_fetch(true, fetch_counting(&mut fetches, 2))
            .await
            .unwrap();
        assert_eq!(bypassed, 2);
        // The bypass result replaces the cached value.
        let cached = cell
            .get_or_fetch(false, fetch_counting(&mut fetches, 3))
            .await
            .unwrap();
        assert_eq!(cached, 2);
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn test_cell_expires() {
        let cell = TtlCell::new(Duration::from_secs(0));
        let mut fetches = 0;
        cell.get_or_fetch(false, fetch_counting(&mut fetches, 1))
            .await
            .unwrap();
        cell.get_or_fetch(false, fetch_counting(&mut fetches, 2))
            .await
            .unwrap();
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn test_cell_invalidate() {
        let cell = TtlCell::new(Duration::from_secs(60));
        let mut fetches = 0;
        cell.get_or_fetch(false, fetch_counting(&mut fetches, 1))
            .await
            .unwrap();
        cell.invalidate();
        cell.get_or_fetch(false, fetch_counting(&mut fetches, 2))
            .await
            .unwrap();
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn test_map_caches_per_key() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::from_secs(60));
        let mut fetches = 0;
        map.get_or_fetch(&"a".to_string(), fetch_counting(&mut fetches, 1))
            .await
            .unwrap();
        map.get_or_fetch(&"b".to_string(), fetch_counting(&mut fetches, 2))
            .await
            .unwrap();
        let cached = map
            .get_or_fetch(&"a".to_string(), fetch_counting(&mut fetches, 3))
            .await
            .unwrap();
        assert_eq!(cached, 1);
        assert_eq!(fetches, 2);
    }
}
