use crate::resolve::OutcomeKind;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Duration;

pub const CONCURRENCY_INIT: usize = 64;
pub const CONCURRENCY_MIN: usize = 8;
pub const CONCURRENCY_MAX: usize = 512;
pub const TIMEOUT_INIT_MS: u64 = 500;
pub const TIMEOUT_MIN_MS: u64 = 100;
pub const TIMEOUT_MAX_MS: u64 = 5_000;

/// Rolling window length, in probes.
const WINDOW: usize = 1_000;
/// The controller holds off until this many probes completed, or
/// `WARMUP_MAX` elapsed, whichever comes first.
pub const WARMUP_SAMPLES: u64 = 1_000;
pub const WARMUP_MAX: Duration = Duration::from_secs(5);
pub const TICK: Duration = Duration::from_secs(1);

struct Sample {
    kind: OutcomeKind,
    latency_ms: u64,
}

/// Shared tuning state: the pool reads `concurrency`/`timeout` on its hot
/// path, workers push one sample per probe, the controller consumes window
/// snapshots once per tick.
pub struct Tuning {
    concurrency: AtomicUsize,
    timeout_ms: AtomicU64,
    completed: AtomicU64,
    window: Mutex<VecDeque<Sample>>,
}

/// Aggregate view over the current window.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub resolved: u64,
    pub not_found: u64,
    pub timeouts: u64,
    pub transient: u64,
    pub samples: u64,
    pub p90_ms: u64,
}

impl Snapshot {
    pub fn success_rate(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.resolved as f64 / self.samples as f64
    }

    pub fn timeout_rate(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.timeouts as f64 / self.samples as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl Tuning {
    pub fn new() -> Self {
        Self {
            concurrency: AtomicUsize::new(CONCURRENCY_INIT),
            timeout_ms: AtomicU64::new(TIMEOUT_INIT_MS),
            completed: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(WINDOW)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Relaxed)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn apply(&self, decision: Decision) {
        self.concurrency
            .store(decision.concurrency, Ordering::Relaxed);
        self.timeout_ms.store(decision.timeout_ms, Ordering::Relaxed);
    }

    /// Record one probe outcome and its end-to-end latency.
    pub fn record(&self, kind: OutcomeKind, latency: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let mut window = self.window.lock().unwrap();
        if window.len() == WINDOW {
            window.pop_front();
        }
        window.push_back(Sample {
            kind,
            latency_ms: latency.as_millis() as u64,
        });
    }

    pub fn snapshot(&self) -> Snapshot {
        let window = self.window.lock().unwrap();
        let mut snap = Snapshot {
            resolved: 0,
            not_found: 0,
            timeouts: 0,
            transient: 0,
            samples: window.len() as u64,
            p90_ms: 0,
        };
        let mut latencies = Vec::with_capacity(window.len());
        for sample in window.iter() {
            match sample.kind {
                OutcomeKind::Resolved => snap.resolved += 1,
                OutcomeKind::NotFound => snap.not_found += 1,
                OutcomeKind::Timeout => snap.timeouts += 1,
                OutcomeKind::Transient => snap.transient += 1,
            }
            latencies.push(sample.latency_ms);
        }
        drop(window);
        if !latencies.is_empty() {
            latencies.sort_unstable();
            let idx = (latencies.len() * 9 / 10).min(latencies.len() - 1);
            snap.p90_ms = latencies[idx];
        }
        snap
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new()
    }
}

/// One controller step. Backs off on timeout pressure, expands when there is
/// latency headroom and the queue can feed the extra workers, holds
/// otherwise. Returns `None` when nothing changes.
pub fn decide(
    snap: &Snapshot,
    concurrency: usize,
    timeout_ms: u64,
    queue_depth: usize,
) -> Option<Decision> {
    if snap.samples == 0 {
        return None;
    }
    let timeout_rate = snap.timeout_rate();
    let (new_concurrency, new_timeout) = if timeout_rate > 0.05 {
        (
            ((concurrency as f64 * 0.8) as usize).max(CONCURRENCY_MIN),
            ((timeout_ms as f64 * 1.25) as u64).min(TIMEOUT_MAX_MS),
        )
    } else if timeout_rate < 0.01 && snap.p90_ms < timeout_ms / 3 {
        let shrunk = (2 * snap.p90_ms).max(TIMEOUT_MIN_MS).min(timeout_ms);
        let grown = if queue_depth > concurrency / 2 {
            ((concurrency as f64 * 1.25) as usize).min(CONCURRENCY_MAX)
        } else {
            concurrency
        };
        (grown, shrunk)
    } else {
        return None;
    };
    if new_concurrency == concurrency && new_timeout == timeout_ms {
        return None;
    }
    Some(Decision {
        concurrency: new_concurrency,
        timeout_ms: new_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::OutcomeKind;
    use tokio::time::Duration;

    fn snap(resolved: u64, timeouts: u64, samples: u64, p90_ms: u64) -> Snapshot {
        Snapshot {
            resolved,
            not_found: samples - resolved - timeouts,
            timeouts,
            transient: 0,
            samples,
            p90_ms,
        }
    }

    #[test]
    fn timeout_pressure_backs_off() {
        // 50% timeouts at 200ms latency: one step must lift T by 25% and cut
        // C by 20%.
        let d = decide(&snap(10, 500, 1000, 200), 64, 500, 100).unwrap();
        assert_eq!(d.concurrency, 51);
        assert_eq!(d.timeout_ms, 625);
    }

    #[test]
    fn slack_shrinks_timeout_and_grows_pool() {
        let d = decide(&snap(50, 0, 1000, 80), 64, 500, 64).unwrap();
        assert_eq!(d.timeout_ms, 160);
        assert_eq!(d.concurrency, 80);
    }

    #[test]
    fn slack_timeout_floor_is_100ms() {
        let d = decide(&snap(50, 0, 1000, 30), 64, 500, 64).unwrap();
        assert_eq!(d.timeout_ms, 100);
    }

    #[test]
    fn growth_requires_queue_backlog() {
        // q <= C/2: timeout still shrinks but the pool holds.
        let d = decide(&snap(50, 0, 1000, 80), 64, 500, 10).unwrap();
        assert_eq!(d.concurrency, 64);
        assert_eq!(d.timeout_ms, 160);
    }

    #[test]
    fn steady_state_holds() {
        // 2% timeouts, p90 close to T: neither rule fires.
        assert!(decide(&snap(100, 20, 1000, 400), 64, 500, 100).is_none());
    }

    #[test]
    fn empty_window_holds() {
        assert!(decide(&snap(0, 0, 0, 0), 64, 500, 0).is_none());
    }

    #[test]
    fn all_timeouts_drive_to_floor_and_ceiling() {
        let mut c = CONCURRENCY_INIT;
        let mut t = TIMEOUT_INIT_MS;
        let mut floor_tick = None;
        for tick in 1..=12 {
            if let Some(d) = decide(&snap(0, 1000, 1000, t), c, t, 0) {
                c = d.concurrency;
                t = d.timeout_ms;
            }
            if c == CONCURRENCY_MIN && floor_tick.is_none() {
                floor_tick = Some(tick);
            }
        }
        assert_eq!(c, CONCURRENCY_MIN);
        assert_eq!(t, TIMEOUT_MAX_MS);
        assert!(floor_tick.unwrap() <= 10);
    }

    #[test]
    fn bounds_always_hold() {
        // Exhaustive-ish sweep: outputs stay inside [8,512] x [100ms,5s].
        for &c in &[8usize, 9, 64, 511, 512] {
            for &t in &[100u64, 101, 500, 4999, 5000] {
                for &(to, p90, q) in &[(1000u64, 5000u64, 0usize), (0, 1, 1000)] {
                    if let Some(d) = decide(&snap(0, to, 1000, p90), c, t, q) {
                        assert!((CONCURRENCY_MIN..=CONCURRENCY_MAX).contains(&d.concurrency));
                        assert!((TIMEOUT_MIN_MS..=TIMEOUT_MAX_MS).contains(&d.timeout_ms));
                    }
                }
            }
        }
    }

    #[test]
    fn window_caps_at_1000_samples() {
        let tuning = Tuning::new();
        for _ in 0..1500 {
            tuning.record(OutcomeKind::NotFound, Duration::from_millis(10));
        }
        for _ in 0..250 {
            tuning.record(OutcomeKind::Resolved, Duration::from_millis(10));
        }
        let snap = tuning.snapshot();
        assert_eq!(snap.samples, 1000);
        assert_eq!(snap.resolved, 250);
        assert_eq!(snap.not_found, 750);
        assert_eq!(tuning.completed(), 1750);
    }

    #[test]
    fn p90_reflects_the_latency_tail() {
        let tuning = Tuning::new();
        for i in 1..=100u64 {
            tuning.record(OutcomeKind::NotFound, Duration::from_millis(i));
        }
        assert_eq!(tuning.snapshot().p90_ms, 91);
    }
}
