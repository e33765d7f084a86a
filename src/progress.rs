use crate::store::LabelStore;
use crate::tuning::Snapshot;
use std::io::{stderr, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Whole-run totals, shared between workers, the reporter, and the final
/// stats line.
#[derive(Default)]
pub struct Stats {
    pub attempted: AtomicU64,
    pub found: AtomicU64,
    pub scrape_found: AtomicU64,
    pub filtered: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

const BAR_WIDTH: usize = 20;
/// Bar refresh period; bounds the redraw rate at 10 Hz.
const RENDER_EVERY: Duration = Duration::from_millis(100);

struct Term {
    bar: String,
    visible: bool,
}

/// All stderr output funnels through here so `[info]`/`[tune]`/`[stats]`
/// lines never interleave with the progress bar: the bar line is cleared,
/// the message printed, and the bar redrawn under one lock.
pub struct Reporter {
    term: Mutex<Term>,
    start: Instant,
}

impl Reporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            term: Mutex::new(Term {
                bar: String::new(),
                visible: false,
            }),
            start: Instant::now(),
        })
    }

    pub fn banner(&self) {
        self.line(&format!(
            "dnsmap {} - DNS Network Mapper by {}",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_AUTHORS")
        ));
    }

    pub fn info(&self, msg: &str) {
        self.line(&format!("[info] {msg}"));
    }

    pub fn tune(&self, snap: &Snapshot, concurrency: usize, queue_depth: usize, timeout_ms: u64) {
        self.line(&format!(
            "[tune] conc={} p90={}ms success={:.0}% timeouts={:.0}% samples={} q={} timeout={}ms",
            concurrency,
            snap.p90_ms,
            snap.success_rate() * 100.0,
            snap.timeout_rate() * 100.0,
            snap.samples,
            queue_depth,
            timeout_ms
        ));
    }

    pub fn final_stats(&self, stats: &Stats) {
        let attempted = stats.attempted.load(Ordering::Relaxed);
        let elapsed = self.start.elapsed().as_secs_f64();
        let avg = if elapsed > 0.0 {
            attempted as f64 / elapsed
        } else {
            0.0
        };
        self.clear_bar();
        self.line(&format!(
            "[stats] attempted={} found={} scrape_found={} filtered={} duration={:.1}s avg={:.1}/s",
            attempted,
            stats.found.load(Ordering::Relaxed),
            stats.scrape_found.load(Ordering::Relaxed),
            stats.filtered.load(Ordering::Relaxed),
            elapsed,
            avg
        ));
    }

    fn line(&self, line: &str) {
        let term = self.term.lock().unwrap();
        let mut err = stderr();
        if term.visible {
            let _ = write!(err, "\r\x1b[2K");
        }
        let _ = writeln!(err, "{line}");
        if term.visible {
            let _ = write!(err, "{}", term.bar);
        }
        let _ = err.flush();
    }

    pub fn render_bar(&self, attempted: u64, total: u64, found: u64) {
        let rendered = render_line(attempted, total, found, self.start.elapsed());
        let mut term = self.term.lock().unwrap();
        term.bar = rendered;
        term.visible = true;
        let mut err = stderr();
        let _ = write!(err, "\r\x1b[2K{}", term.bar);
        let _ = err.flush();
    }

    pub fn clear_bar(&self) {
        let mut term = self.term.lock().unwrap();
        if term.visible {
            term.visible = false;
            term.bar.clear();
            let mut err = stderr();
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
        }
    }
}

/// Build one bar line. Total may have grown since the last render; progress
/// is clamped so it never runs backwards past 100%.
fn render_line(attempted: u64, total: u64, found: u64, elapsed: Duration) -> String {
    let percent = if total > 0 {
        (attempted as f64 / total as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        attempted as f64 / secs
    } else {
        0.0
    };
    let eta = if rate > 0.0 {
        let remaining = total.saturating_sub(attempted) as f64;
        format!("{}s", (remaining / rate).ceil() as u64)
    } else {
        "--".to_string()
    };
    format!(
        "{:5.1}% [{}{}] {}/{} found={} rate={:.0}/s eta={}",
        percent,
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        attempted,
        total,
        found,
        rate,
        eta
    )
}

/// Redraw the bar on a fixed cadence until shutdown fires or the task is
/// aborted by the orchestrator.
pub fn spawn_bar(
    reporter: Arc<Reporter>,
    stats: Arc<Stats>,
    store: Arc<LabelStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(RENDER_EVERY);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tick.tick() => {}
            }
            reporter.render_bar(
                stats.attempted.load(Ordering::Relaxed),
                store.len() as u64,
                stats.found.load(Ordering::Relaxed),
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::render_line;
    use tokio::time::Duration;

    #[test]
    fn zero_rate_shows_dashes_for_eta() {
        let line = render_line(0, 100, 0, Duration::from_secs(0));
        assert!(line.contains("eta=--"));
        assert!(line.contains("0/100"));
    }

    #[test]
    fn zero_total_renders_without_panicking() {
        let line = render_line(0, 0, 0, Duration::from_secs(1));
        assert!(line.contains("0/0"));
        assert!(line.contains("  0.0%"));
    }

    #[test]
    fn total_growth_never_overflows_the_bar() {
        // attempted raced ahead of a freshly grown total
        let line = render_line(150, 100, 3, Duration::from_secs(10));
        assert!(line.starts_with("100.0%"));
        assert!(line.contains("[####################]"));
        assert!(line.contains("eta=0s"));
    }

    #[test]
    fn carries_all_bar_fields() {
        let line = render_line(50, 200, 4, Duration::from_secs(5));
        assert!(line.contains(" 25.0%"));
        assert!(line.contains("50/200"));
        assert!(line.contains("found=4"));
        assert!(line.contains("rate=10/s"));
        assert!(line.contains("eta=15s"));
    }
}
