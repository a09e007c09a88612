use parking_lot::RwLock;
use parley_core::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

struct Entry<T> {
    value: T,
    touched: Instant,
}

/// Volatile per-user state with a time-to-live.
///
/// Replaces process-global maps (provider cache, debate sessions, the
/// regeneration cache). An entry is visible until `ttl` has elapsed since it
/// was last written; expired entries are dropped by [`purge_expired`].
///
/// [`purge_expired`]: SessionStore::purge_expired
pub struct SessionStore<T> {
    ttl: Duration,
    entries: RwLock<HashMap<UserId, Entry<T>>>,
}

impl<T: Clone> SessionStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, entry: &Entry<T>, now: Instant) -> bool {
        now.duration_since(entry.touched) < self.ttl
    }

    /// A clone of the live value, if any.
    pub fn get(&self, user_id: UserId) -> Option<T> {
        let entries = self.entries.read();
        let now = Instant::now();
        entries
            .get(&user_id)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.value.clone())
    }

    /// Insert or replace the value, resetting its expiry.
    pub fn insert(&self, user_id: UserId, value: T) {
        self.entries.write().insert(
            user_id,
            Entry {
                value,
                touched: Instant::now(),
            },
        );
    }

    /// Mutate a live value in place, resetting its expiry.
    ///
    /// Returns `None` if there is no live value.
    pub fn update<R>(&self, user_id: UserId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        let now = Instant::now();
        match entries.get_mut(&user_id) {
            Some(entry) if now.duration_since(entry.touched) < self.ttl => {
                entry.touched = now;
                Some(f(&mut entry.value))
            }
            Some(_) => {
                entries.remove(&user_id);
                None
            }
            None => None,
        }
    }

    /// Remove and return the live value.
    pub fn remove(&self, user_id: UserId) -> Option<T> {
        let now = Instant::now();
        let entry = self.entries.write().remove(&user_id)?;
        self.is_live(&entry, now).then_some(entry.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.touched) < self.ttl);
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| self.is_live(e, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> SessionStore<T> {
    /// Spawn a background task purging expired entries every `every`.
    pub fn spawn_sweeper(self: &Arc<Self>, name: &'static str, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(store = name, removed, "Purged expired sessions");
                }
            }
        })
    }
}
