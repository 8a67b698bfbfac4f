/// Shared crawl bookkeeping.
///
/// `visited`, `pending` and `forms` live behind one mutex so every
/// check-and-mark is a single critical section; the lock is never held across
/// an await. A `Notify` wakes idle workers when new URLs are queued.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::form::Form;

#[derive(Default)]
struct Inner {
    visited: HashSet<String>,
    pending: VecDeque<String>,
    forms: Vec<Form>,
}

pub struct CrawlState {
    inner: Mutex<Inner>,
    queued: Notify,
}

/// Why a dequeued URL was not claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    AlreadyVisited,
    BudgetExhausted,
}

impl CrawlState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            queued: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, url: String) -> bool {
        {
            let mut inner = self.lock();
            if inner.visited.contains(&url) {
                return false;
            }
            inner.pending.push_back(url);
        }
        self.queued.notify_one();
        true
    }

    /// Atomically checks the page budget and membership, then marks `url`
    /// visited.
    pub fn claim(&self, url: &str, max_pages: usize) -> Claim {
        let mut inner = self.lock();
        if inner.visited.len() >= max_pages {
            return Claim::BudgetExhausted;
        }
        if inner.visited.contains(url) {
            return Claim::AlreadyVisited;
        }
        inner.visited.insert(url.to_string());
        Claim::Claimed
    }

    pub fn try_dequeue(&self) -> Option<String> {
        self.lock().pending.pop_front()
    }

    /// Waits up to `idle` for a queued URL; `None` means the queue stayed
    /// empty for the whole window.
    pub async fn dequeue(&self, idle: Duration) -> Option<String> {
        let deadline = Instant::now() + idle;
        loop {
            let notified = self.queued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(url) = self.try_dequeue() {
                return Some(url);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_dequeue();
            }
        }
    }

    pub fn add_forms(&self, forms: Vec<Form>) {
        if forms.is_empty() {
            return;
        }
        self.lock().forms.extend(forms);
    }

    pub fn visited_len(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.lock().visited.contains(url)
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Consumes the collected state: sorted visited URLs and forms in
    /// discovery order.
    pub fn export(&self) -> (Vec<String>, Vec<Form>) {
        let mut inner = self.lock();
        let visited: BTreeSet<String> = inner.visited.drain().collect();
        let forms = std::mem::take(&mut inner.forms);
        inner.pending.clear();
        (visited.into_iter().collect(), forms)
    }
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}
