use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Where a label was first discovered. First insertion wins, so a label seen
/// by a scraper and later present in the wordlist stays attributed to
/// scraping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    Wordlist,
    Scrape,
}

struct Inner {
    order: Vec<(Arc<str>, Provenance)>,
    seen: HashSet<Arc<str>>,
}

/// Deduplicating set of candidate labels with insertion-order iteration.
///
/// Producers call `add` while a single dispatcher consumes via `next`; the
/// two sides coordinate through a `Notify`, so consumption can begin before
/// insertion is complete and labels appended late are still yielded. The
/// store never shrinks.
pub struct LabelStore {
    apex: String,
    inner: Mutex<Inner>,
    grew: Notify,
    sealed: AtomicBool,
}

impl LabelStore {
    pub fn new(apex: impl Into<String>) -> Self {
        Self {
            apex: apex.into(),
            inner: Mutex::new(Inner {
                order: Vec::new(),
                seen: HashSet::new(),
            }),
            grew: Notify::new(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Case-fold, strip a trailing dot, and insert. Returns whether the label
    /// was newly inserted. Empty labels, the apex itself, and labels with
    /// non-DNS characters are rejected.
    pub fn add(&self, raw: &str, provenance: Provenance) -> bool {
        let label = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if label.is_empty() || label == self.apex {
            return false;
        }
        let legal = label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !legal {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.seen.contains(label.as_str()) {
            return false;
        }
        let label: Arc<str> = label.into();
        inner.seen.insert(label.clone());
        inner.order.push((label, provenance));
        drop(inner);
        self.grew.notify_waiters();
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the producing side as finished. `next` calls past the end return
    /// `None` instead of waiting. Labels may still be appended after sealing;
    /// they are yielded like any other.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        self.grew.notify_waiters();
    }

    /// Yield the label at `cursor`, waiting for producers if it does not
    /// exist yet and the store is unsealed.
    pub async fn next(&self, cursor: usize) -> Option<(Arc<str>, Provenance)> {
        loop {
            let notified = self.grew.notified();
            {
                let inner = self.inner.lock().unwrap();
                if let Some((label, provenance)) = inner.order.get(cursor) {
                    return Some((label.clone(), *provenance));
                }
            }
            if self.sealed.load(Ordering::Acquire) {
                // Re-check: an add may have raced the seal.
                let inner = self.inner.lock().unwrap();
                return inner
                    .order
                    .get(cursor)
                    .map(|(label, provenance)| (label.clone(), *provenance));
            }
            notified.await;
        }
    }
}
