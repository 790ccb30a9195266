//! In-memory remote store for tests and dry runs.
//!
//! Objects can be added, replaced and removed between sweeps, and individual
//! days can be made to fail, which lets tests script upstream changes and
//! partial outages without a network.

use super::remote::{RemoteError, RemoteHead, RemoteObject, RemoteStore};
use crate::asset::AssetClass;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Slot = (AssetClass, NaiveDate);

#[derive(Default)]
struct State {
    objects: HashMap<Slot, RemoteObject>,
    failing: HashSet<Slot>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    heads: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `bytes` for a day. The content identifier is the blake3 hash,
    /// so replacing the bytes changes the identifier.
    pub fn put(&self, class: AssetClass, date: NaiveDate, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        let content_id = blake3::hash(&bytes).to_hex().to_string();
        self.state()
            .objects
            .insert((class, date), RemoteObject { bytes, content_id });
    }

    pub fn remove(&self, class: AssetClass, date: NaiveDate) {
        self.state().objects.remove(&(class, date));
    }

    /// Make every request for this day fail with a network error.
    pub fn fail(&self, class: AssetClass, date: NaiveDate) {
        self.state().failing.insert((class, date));
    }

    pub fn heal(&self, class: AssetClass, date: NaiveDate) {
        self.state().failing.remove(&(class, date));
    }

    pub fn content_id(&self, class: AssetClass, date: NaiveDate) -> Option<String> {
        self.state()
            .objects
            .get(&(class, date))
            .map(|o| o.content_id.clone())
    }

    /// Number of HEAD requests served so far.
    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    /// Number of GET requests served so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn check(&self, class: AssetClass, date: NaiveDate) -> Result<(), RemoteError> {
        if self.state().failing.contains(&(class, date)) {
            return Err(RemoteError::Network(format!(
                "simulated outage for {class} {date}"
            )));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    fn head(&self, class: AssetClass, date: NaiveDate) -> Result<Option<RemoteHead>, RemoteError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        self.check(class, date)?;
        Ok(self.state().objects.get(&(class, date)).map(|o| RemoteHead {
            content_id: o.content_id.clone(),
            size: Some(o.bytes.len() as u64),
        }))
    }

    fn get(
        &self,
        class: AssetClass,
        date: NaiveDate,
    ) -> Result<Option<RemoteObject>, RemoteError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check(class, date)?;
        Ok(self.state().objects.get(&(class, date)).cloned())
    }
}
