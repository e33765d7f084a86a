use crate::output::OutputSink;
use crate::pool::Pool;
use crate::progress::{self, Reporter, Stats};
use crate::resolve::Resolver;
use crate::scrape;
use crate::store::{LabelStore, Provenance};
use crate::tuning::Tuning;
use crate::wildcard;
use crate::wordlist;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

/// Single cancellation signal for the whole run. Triggered by Ctrl-C or by a
/// broken stdout; every long-lived task holds a subscription.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(false);
        Arc::new(Self { tx })
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Exit code for an interrupted run.
const EXIT_INTERRUPTED: i32 = 130;

/// Drives the phases: init (banner, apex check, wildcard detection) ->
/// scrape -> merge -> brute-force -> finalize. Owns all shared state for the
/// lifetime of one run.
pub struct Runner {
    apex: String,
    resolver: Arc<Resolver>,
    store: Arc<LabelStore>,
    stats: Arc<Stats>,
    tuning: Arc<Tuning>,
    reporter: Arc<Reporter>,
    sink: Arc<OutputSink>,
    shutdown: Arc<Shutdown>,
    interrupted: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(apex: String) -> Self {
        let shutdown = Shutdown::new();
        Self {
            store: Arc::new(LabelStore::new(apex.clone())),
            resolver: Arc::new(Resolver::from_system()),
            stats: Stats::new(),
            tuning: Arc::new(Tuning::new()),
            reporter: Reporter::new(),
            sink: Arc::new(OutputSink::stdout(shutdown.clone())),
            shutdown,
            interrupted: Arc::new(AtomicBool::new(false)),
            apex,
        }
    }

    pub async fn run(&self) -> Result<i32> {
        self.reporter.banner();
        self.spawn_interrupt_watch();

        // The apex must resolve before anything else is worth doing.
        self.resolver.check_apex(&self.apex).await?;

        let wildcard_ips = wildcard::detect(&self.resolver, &self.apex).await;
        if !wildcard_ips.is_empty() {
            self.reporter.info(&format!(
                "wildcard DNS detected, filtering {} address(es)",
                wildcard_ips.len()
            ));
        }

        if self.scrape_and_merge().await {
            let bar = progress::spawn_bar(
                self.reporter.clone(),
                self.stats.clone(),
                self.store.clone(),
                self.shutdown.subscribe(),
            );
            let pool = Pool::new(
                self.apex.clone(),
                self.resolver.clone(),
                self.store.clone(),
                self.tuning.clone(),
                self.stats.clone(),
                self.sink.clone(),
                wildcard_ips,
                self.reporter.clone(),
                self.shutdown.clone(),
            );
            pool.run().await;
            bar.abort();
            self.reporter.clear_bar();
        }

        // Confirmed subdomains were streamed at confirmation time; nothing
        // is re-emitted here, but the stream must be flushed.
        self.sink.flush();
        self.reporter.final_stats(&self.stats);

        if self.sink.broken() {
            // Downstream went away. If it consumed anything, that is a normal
            // pipeline teardown.
            return Ok(if self.sink.wrote_any() { 0 } else { 1 });
        }
        if self.interrupted.load(Ordering::Relaxed) {
            return Ok(EXIT_INTERRUPTED);
        }
        Ok(0)
    }

    /// Scrape phase then wordlist merge. Returns false when shutdown fired
    /// mid-scrape, in which case the brute-force phase is skipped.
    async fn scrape_and_merge(&self) -> bool {
        let words = wordlist::builtin();
        let word_set: HashSet<&str> = words.iter().copied().collect();

        let client = match scrape::http_client() {
            Ok(client) => client,
            Err(err) => {
                self.reporter
                    .info(&format!("scraping disabled, http client failed: {err:#}"));
                self.merge_wordlist(&words);
                return !self.shutdown.is_triggered();
            }
        };

        let mut shutdown_rx = self.shutdown.subscribe();
        let scraped = tokio::select! {
            _ = shutdown_rx.changed() => None,
            counts = scrape::run_scrapers(&client, &self.apex, &self.store, &word_set, &self.reporter) => {
                Some(counts)
            }
        };
        let Some((total, new)) = scraped else {
            self.store.seal();
            return false;
        };
        self.reporter.info(&format!(
            "scraping sources yielded {total} labels, of which {new} are new"
        ));
        self.merge_wordlist(&words);
        true
    }

    fn merge_wordlist(&self, words: &[&str]) {
        for word in words {
            self.store.add(word, Provenance::Wordlist);
        }
        self.store.seal();
        self.reporter.info(&format!(
            "brute-force target count: {} (+{} from scraping)",
            words.len(),
            self.store.len().saturating_sub(words.len())
        ));
    }

    fn spawn_interrupt_watch(&self) {
        let shutdown = self.shutdown.clone();
        let interrupted = self.interrupted.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Relaxed);
                shutdown.trigger();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::Shutdown;

    #[test]
    fn shutdown_latches_and_fans_out() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(*rx.borrow());
        // A late subscriber still observes the latched state.
        assert!(*shutdown.subscribe().borrow());
    }
}
