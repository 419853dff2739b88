//! Collaborator doubles with recording and failure injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::core::types::ActorRef;
use crate::error::{OverlayError, Result};
use crate::ports::{DerivedItemFactory, DerivedItemSpec, ItemRef, NotificationSink};
use crate::storage::{FlagBatch, FlagStore, MemoryFlagStore, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Notification sink that keeps every notice in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    #[must_use]
    pub fn at(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter(|notice| notice.level == level)
            .map(|notice| notice.text.clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, level: NoticeLevel, needle: &str) -> bool {
        self.at(level).iter().any(|text| text.contains(needle))
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }

    fn push(&self, level: NoticeLevel, text: &str) {
        self.notices.lock().push(Notice {
            level,
            text: text.to_string(),
        });
    }
}

impl NotificationSink for RecordingNotifier {
    fn info(&self, text: &str) {
        self.push(NoticeLevel::Info, text);
    }

    fn warn(&self, text: &str) {
        self.push(NoticeLevel::Warn, text);
    }

    fn error(&self, text: &str) {
        self.push(NoticeLevel::Error, text);
    }
}

/// In-memory item factory that can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingItemFactory {
    live: Mutex<Vec<(ItemRef, DerivedItemSpec)>>,
    discarded: Mutex<Vec<ItemRef>>,
    next_id: AtomicUsize,
    fail_create: AtomicBool,
}

impl RecordingItemFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Items created and not discarded.
    #[must_use]
    pub fn live(&self) -> Vec<(ItemRef, DerivedItemSpec)> {
        self.live.lock().clone()
    }

    #[must_use]
    pub fn discarded(&self) -> Vec<ItemRef> {
        self.discarded.lock().clone()
    }
}

impl DerivedItemFactory for RecordingItemFactory {
    fn create_derived_items(
        &self,
        _owner: &ActorRef,
        specs: &[DerivedItemSpec],
    ) -> Result<Vec<ItemRef>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OverlayError::Persistence(
                "item creation failed (injected)".to_string(),
            ));
        }
        let mut live = self.live.lock();
        let created: Vec<ItemRef> = specs
            .iter()
            .map(|spec| {
                let id = ItemRef(format!("item-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
                live.push((id.clone(), spec.clone()));
                id
            })
            .collect();
        Ok(created)
    }

    fn discard_items(&self, _owner: &ActorRef, items: &[ItemRef]) -> Result<()> {
        self.live.lock().retain(|(id, _)| !items.contains(id));
        self.discarded.lock().extend_from_slice(items);
        Ok(())
    }
}

/// Memory store whose commits can be made to fail.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryFlagStore,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
}

impl FailingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of commits that reached the inner store.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn inner(&self) -> &MemoryFlagStore {
        &self.inner
    }
}

impl FlagStore for FailingStore {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>> {
        self.inner.get(scope, key)
    }

    fn list_keys(&self, scope: &Scope, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(scope, prefix)
    }

    fn commit(&self, batch: FlagBatch) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(OverlayError::Persistence(
                "flag store unavailable (injected)".to_string(),
            ));
        }
        self.inner.commit(batch)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
