use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::HeapPage;
use crate::types::TransactionId;

/// Shared handle to a cached page. Mutations happen in place through the lock.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// What the pool may do with a frame right now.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FrameState {
    /// No uncommitted changes.
    Clean,
    /// Holds uncommitted changes of this transaction.
    DirtiedBy(TransactionId),
    /// The page latch is held for writing; treated as dirty.
    Latched,
}

/// A cache slot holding one live page.
pub(crate) struct Frame {
    pub page: PageRef,
}

impl Frame {
    pub fn new(page: HeapPage) -> Self {
        Self {
            page: Arc::new(RwLock::new(page)),
        }
    }

    /// Probes the page without blocking on its latch.
    pub fn state(&self) -> FrameState {
        match self.page.try_read() {
            None => FrameState::Latched,
            Some(page) => match page.dirtied_by() {
                None => FrameState::Clean,
                Some(tid) => FrameState::DirtiedBy(tid),
            },
        }
    }

    pub fn is_clean(&self) -> bool {
        self.state() == FrameState::Clean
    }
}
