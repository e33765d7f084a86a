use crate::output::OutputSink;
use crate::progress::{Reporter, Stats};
use crate::resolve::{Outcome, Resolver};
use crate::runner::Shutdown;
use crate::store::{LabelStore, Provenance};
use crate::tuning::{self, decide, Tuning};
use crate::wildcard;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep, Duration, Instant};

/// Bounded work channel: 2x the initial concurrency, enough to keep workers
/// fed while still exerting backpressure on the dispatcher.
const WORK_QUEUE_CAP: usize = 2 * tuning::CONCURRENCY_INIT;
/// How often the supervisor reconciles the worker count with the target.
const SUPERVISE_EVERY: Duration = Duration::from_millis(250);

struct Job {
    label: Arc<str>,
    provenance: Provenance,
}

/// Everything a worker touches, shared once per run.
struct PoolCtx {
    apex: String,
    resolver: Arc<Resolver>,
    tuning: Arc<Tuning>,
    stats: Arc<Stats>,
    sink: Arc<OutputSink>,
    wildcard_ips: HashSet<IpAddr>,
    work_rx: Mutex<mpsc::Receiver<Job>>,
    active: AtomicUsize,
}

/// Variable-width DNS probing pool. A single dispatcher walks the label
/// store in insertion order into a bounded channel; workers pull from it and
/// probe with the controller's current timeout. The live worker count tracks
/// the controller's target: surplus workers retire after their current
/// probe, deficits are filled by the supervisor up to the hard ceiling.
pub struct Pool {
    apex: String,
    resolver: Arc<Resolver>,
    store: Arc<LabelStore>,
    tuning: Arc<Tuning>,
    stats: Arc<Stats>,
    sink: Arc<OutputSink>,
    wildcard_ips: HashSet<IpAddr>,
    reporter: Arc<Reporter>,
    shutdown: Arc<Shutdown>,
}

impl Pool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        apex: String,
        resolver: Arc<Resolver>,
        store: Arc<LabelStore>,
        tuning: Arc<Tuning>,
        stats: Arc<Stats>,
        sink: Arc<OutputSink>,
        wildcard_ips: HashSet<IpAddr>,
        reporter: Arc<Reporter>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            apex,
            resolver,
            store,
            tuning,
            stats,
            sink,
            wildcard_ips,
            reporter,
            shutdown,
        }
    }

    /// Run the brute-force phase until input exhaustion or shutdown. All
    /// spawned tasks are joined or aborted before returning.
    pub async fn run(&self) {
        let (work_tx, work_rx) = mpsc::channel::<Job>(WORK_QUEUE_CAP);
        let weak_tx = work_tx.downgrade();
        let ctx = Arc::new(PoolCtx {
            apex: self.apex.clone(),
            resolver: self.resolver.clone(),
            tuning: self.tuning.clone(),
            stats: self.stats.clone(),
            sink: self.sink.clone(),
            wildcard_ips: self.wildcard_ips.clone(),
            work_rx: Mutex::new(work_rx),
            active: AtomicUsize::new(0),
        });
        let drained = Arc::new(AtomicBool::new(false));
        // Worker liveness: every worker holds a clone of this sender; the
        // channel yields None once the supervisor and all workers are gone.
        let (live_tx, mut live_rx) = mpsc::channel::<()>(1);

        let dispatcher = tokio::spawn(dispatch(
            self.store.clone(),
            work_tx,
            drained.clone(),
            self.shutdown.subscribe(),
        ));
        let controller = tokio::spawn(control(
            self.tuning.clone(),
            weak_tx,
            self.reporter.clone(),
            self.shutdown.subscribe(),
        ));
        let supervisor = tokio::spawn(supervise(
            ctx,
            drained,
            live_tx,
            self.shutdown.clone(),
        ));

        let _ = live_rx.recv().await;
        let _ = dispatcher.await;
        let _ = supervisor.await;
        controller.abort();
    }
}

/// Feed the store's labels into the work channel in insertion order. The
/// channel's bound provides backpressure; dropping the sender on exit is
/// what ultimately drains and stops the workers.
async fn dispatch(
    store: Arc<LabelStore>,
    work_tx: mpsc::Sender<Job>,
    drained: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut cursor = 0usize;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let item = tokio::select! {
            _ = shutdown_rx.changed() => break,
            item = store.next(cursor) => item,
        };
        let Some((label, provenance)) = item else {
            break;
        };
        cursor += 1;
        let sent = tokio::select! {
            _ = shutdown_rx.changed() => break,
            sent = work_tx.send(Job { label, provenance }) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
    drained.store(true, Ordering::Release);
}

/// Keep the live worker count converging on the controller's target. The
/// initial batch is spawned before the idle check so a dispatcher that
/// drains a small store instantly cannot strand queued jobs.
async fn supervise(
    ctx: Arc<PoolCtx>,
    drained: Arc<AtomicBool>,
    live_tx: mpsc::Sender<()>,
    shutdown: Arc<Shutdown>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    spawn_up_to_target(&ctx, &shutdown_rx, &live_tx);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = sleep(SUPERVISE_EVERY) => {}
        }
        let idle = ctx.active.load(Ordering::Acquire) == 0;
        if idle && (drained.load(Ordering::Acquire) || *shutdown_rx.borrow()) {
            break;
        }
        spawn_up_to_target(&ctx, &shutdown_rx, &live_tx);
    }
}

fn spawn_up_to_target(
    ctx: &Arc<PoolCtx>,
    shutdown_rx: &watch::Receiver<bool>,
    live_tx: &mpsc::Sender<()>,
) {
    let target = ctx.tuning.concurrency().min(tuning::CONCURRENCY_MAX);
    while ctx.active.load(Ordering::Acquire) < target && !*shutdown_rx.borrow() {
        ctx.active.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(worker(ctx.clone(), shutdown_rx.clone(), live_tx.clone()));
    }
}

/// One worker: pull a job, probe it, repeat. Retires when the pool is above
/// the controller's target (after finishing the probe in hand) or when the
/// work channel closes.
async fn worker(ctx: Arc<PoolCtx>, mut shutdown_rx: watch::Receiver<bool>, _live: mpsc::Sender<()>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        // Graceful downscale: the CAS both elects this worker to retire and
        // performs its bookkeeping, so exactly one worker leaves per surplus
        // slot.
        let target = ctx.tuning.concurrency();
        let current = ctx.active.load(Ordering::Acquire);
        if current > target
            && ctx
                .active
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return;
        }
        let job = {
            let mut work_rx = ctx.work_rx.lock().await;
            tokio::select! {
                _ = shutdown_rx.changed() => None,
                job = work_rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };
        probe_one(&ctx, job).await;
    }
    ctx.active.fetch_sub(1, Ordering::AcqRel);
}

/// Single-probe contract: one lookup, one latency sample, `attempted`
/// incremented exactly once, stdout emission only for a fresh wildcard-free
/// resolution. No retries; timeouts and transients only feed the controller.
async fn probe_one(ctx: &PoolCtx, job: Job) {
    let fqdn = format!("{}.{}", job.label, ctx.apex);
    let (outcome, latency) = ctx.resolver.probe(&fqdn, ctx.tuning.timeout()).await;
    ctx.tuning.record(outcome.kind(), latency);
    ctx.stats.attempted.fetch_add(1, Ordering::Relaxed);
    if let Outcome::Resolved(addrs) = outcome {
        if wildcard::is_wildcard(&addrs, &ctx.wildcard_ips) {
            ctx.stats.filtered.fetch_add(1, Ordering::Relaxed);
        } else if ctx.sink.emit(&fqdn) {
            ctx.stats.found.fetch_add(1, Ordering::Relaxed);
            if job.provenance == Provenance::Scrape {
                ctx.stats.scrape_found.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// The tuning loop: hold through warm-up, then inspect the rolling window
/// once a second and apply the decision policy. Emits a `[tune]` line after
/// every adjustment.
async fn control(
    tuning: Arc<Tuning>,
    weak_tx: mpsc::WeakSender<Job>,
    reporter: Arc<Reporter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let started = Instant::now();
    while tuning.completed() < tuning::WARMUP_SAMPLES && started.elapsed() < tuning::WARMUP_MAX {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = sleep(Duration::from_millis(100)) => {}
        }
    }
    let mut tick = interval(tuning::TICK);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tick.tick() => {}
        }
        let snap = tuning.snapshot();
        if snap.samples == 0 {
            continue;
        }
        let queue_depth = match weak_tx.upgrade() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        };
        let concurrency = tuning.concurrency();
        let timeout_ms = tuning.timeout_ms();
        if let Some(decision) = decide(&snap, concurrency, timeout_ms, queue_depth) {
            tuning.apply(decision);
            reporter.tune(&snap, decision.concurrency, queue_depth, decision.timeout_ms);
        }
    }
}
