//! The periodic tick that integrates every other component, plus the
//! startup sequence that runs once before the first tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use comfy_table::Table;

use crate::app_error::AppError;
use crate::config::{Config, DaemonArgs};
use crate::control::{admission, lifecycle, mode};
use crate::engine::Engine;
use crate::host::{self, CpuTimes};
use crate::telemetry::{Fanout, Record};
use crate::worker::{self, WorkerDescriptor, WorkerState};

fn as_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn as_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Split `repo[:tag]`. A colon whose right-hand side contains a `/` is a
/// registry port, not a tag separator, so the whole string is the repo
/// and the tag defaults to `latest`.
fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.is_empty() && !tag.contains('/') => {
            (repo.to_owned(), tag.to_owned())
        }
        _ => (image.to_owned(), "latest".to_owned()),
    }
}

#[cfg(unix)]
fn ensure_dir_0700(path: &std::path::Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path)
        .map_err(|e| AppError::Sentinel(format!("{}: {e}", path.display())))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| AppError::Sentinel(format!("{}: {e}", path.display())))
}

/// Process-wide runtime state, touched only from the tick.
struct RuntimeState {
    start_time: i64,
    last_update_time: i64,
    last_confup_time: i64,
    last_kill_time: i64,
    overhead_first_time: i64,
    last_sample: CpuTimes,
    efficiency: f64,
    has_image: bool,
    force_kill: bool,
    do_main_loop: bool,
}

impl RuntimeState {
    fn new(now: i64) -> Self {
        Self {
            start_time: now,
            last_update_time: 0,
            last_confup_time: now,
            last_kill_time: 0,
            overhead_first_time: 0,
            last_sample: host::cpu_times(),
            efficiency: 100.0,
            has_image: false,
            force_kill: false,
            do_main_loop: true,
        }
    }
}

/// A worker enriched with the fields only an `inspect` call carries:
/// PID and parsed start/finish timestamps.
struct WorkerSnapshot {
    started_at: Option<i64>,
    finished_at: Option<i64>,
    pid: i64,
}

/// The daemon: owns the engine handle, the telemetry fanout, the
/// hot-reloadable config, and the runtime state, and drives one tick at
/// a time. Single-threaded: no field here is ever shared across an
/// `.await` boundary with another task.
pub struct Daemon {
    args: DaemonArgs,
    engine: Engine,
    sink: Fanout,
    config: Config,
    hostname: String,
    state: RuntimeState,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Startup sequence, run once before the first tick: clear a stale
    /// `force-stop` sentinel left by a previous run, create the run/log
    /// directories with `0700`, load the config, reconcile sinks, pull
    /// the configured image, and run one lifecycle pass.
    pub async fn init(args: DaemonArgs, shutdown: Arc<AtomicBool>) -> Result<Self, AppError> {
        ensure_dir_0700(&args.rundir)?;
        ensure_dir_0700(&args.logdir)?;
        mode::clear_stale_force_stop(&args.rundir)?;

        let hostname = host::short_hostname();
        let engine = Engine::connect(&args.socket, hostname.clone())?;
        engine.ping().await?;

        let mut sink = Fanout::new();
        let config = Config::load(&args.confdir, &Config::default());
        sink.reconcile(&config.influxdb_url);

        let now = host::utc_time();
        let mut state = RuntimeState::new(now);

        let (repo, tag) = split_image(&config.docker_image);
        match engine.pull(&repo, &tag, &sink).await {
            Ok(()) => {
                state.has_image = true;
                state.last_update_time = now;
            }
            Err(e) => {
                e.disp();
                state.has_image = false;
            }
        }

        let mut daemon = Self {
            args,
            engine,
            sink,
            config,
            hostname,
            state,
            shutdown,
        };
        daemon.reap_workers(now).await;
        Ok(daemon)
    }

    pub fn should_continue(&self) -> bool {
        self.state.do_main_loop && !self.shutdown.load(Ordering::SeqCst)
    }

    async fn list_workers(&self) -> Vec<WorkerDescriptor> {
        match self.engine.list(true, &self.sink).await {
            Ok(summaries) => worker::from_summaries(&summaries),
            Err(e) => {
                e.disp();
                Vec::new()
            }
        }
    }

    /// Inspect one worker for its PID and parsed timestamps. Inspect
    /// failures and parse failures both just yield an empty snapshot,
    /// logged and skipped per the "inspect parse failure" error policy.
    async fn snapshot_worker(&self, worker: &WorkerDescriptor) -> WorkerSnapshot {
        match self.engine.inspect(&worker.id, &self.sink).await {
            Ok(resp) => {
                let state = resp.state.as_ref();
                let pid = state.and_then(|s| s.pid).unwrap_or(0);
                let started_at = state
                    .and_then(|s| s.started_at.as_deref())
                    .and_then(lifecycle::parse_engine_timestamp);
                let finished_at = state
                    .and_then(|s| s.finished_at.as_deref())
                    .and_then(lifecycle::parse_engine_timestamp);
                WorkerSnapshot {
                    started_at,
                    finished_at,
                    pid,
                }
            }
            Err(e) => {
                e.disp();
                WorkerSnapshot {
                    started_at: None,
                    finished_at: None,
                    pid: 0,
                }
            }
        }
    }

    /// Overhead eviction: remove the youngest Running worker, stamping
    /// `last_kill_time` and emitting the same `container{killed=true}`
    /// telemetry shape the lifecycle manager uses for TTL eviction.
    async fn evict_youngest_running(&mut self, workers: &[WorkerDescriptor], now: i64) {
        let mut running: Vec<WorkerDescriptor> = workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .cloned()
            .collect();
        worker::sort_youngest_first(&mut running);
        let Some(target) = running.first() else {
            return;
        };
        let snap = self.snapshot_worker(target).await;
        let uptime = snap.started_at.map_or(0, |s| now - s);
        match self.engine.remove(&target.id, true, &self.sink).await {
            Ok(()) => {
                self.state.last_kill_time = now;
                self.sink.emit(
                    Record::new("container")
                        .tag("hostname", self.hostname.clone())
                        .tag("started", "true")
                        .tag("killed", "true")
                        .field("uptime", uptime),
                );
            }
            Err(e) => e.disp(),
        }
    }

    /// Reap every terminated/evicted worker and log a table of what was
    /// seen. Returns the workers that were kept.
    async fn reap_workers(&mut self, now: i64) -> Vec<WorkerDescriptor> {
        let workers = self.list_workers().await;
        let max_ttl = as_i64(self.config.max_ttl);
        let mut remaining = Vec::new();
        let mut rows = Vec::with_capacity(workers.len());
        for w in workers {
            let snap = self.snapshot_worker(&w).await;
            let action = lifecycle::evaluate_reap(
                &w,
                now,
                max_ttl,
                self.state.force_kill,
                snap.started_at,
                snap.finished_at,
            );
            rows.push((w.clone(), snap.pid));
            match action {
                lifecycle::ReapAction::Keep => remaining.push(w),
                lifecycle::ReapAction::Remove { telemetry } => {
                    match self.engine.remove(&w.id, true, &self.sink).await {
                        Ok(()) => {
                            if let Some(record) = telemetry {
                                self.sink
                                    .emit(record.tag("hostname", self.hostname.clone()));
                            }
                        }
                        Err(e) => e.disp(),
                    }
                }
            }
        }
        self.log_worker_table(&rows);
        remaining
    }

    fn log_worker_table(&self, rows: &[(WorkerDescriptor, i64)]) {
        if rows.is_empty() {
            return;
        }
        let mut table = Table::new();
        table.set_header(vec!["#", "id", "status", "name", "pid"]);
        for (index, (worker, pid)) in rows.iter().enumerate() {
            table.add_row(vec![
                (index + 1).to_string(),
                worker.short_id().to_owned(),
                format!("{:?}", worker.state),
                worker.name.clone(),
                pid.to_string(),
            ]);
        }
        tracing::debug!("\n{table}");
    }

    /// One tick of the control loop.
    pub async fn tick(&mut self) {
        let now = host::utc_time();
        let ncpus = host::cpu_count();

        // 1. efficiency
        let sample = host::cpu_times();
        let efficiency = admission::compute_efficiency(self.state.last_sample, sample, ncpus);
        self.state.last_sample = sample;
        self.state.efficiency = efficiency;
        tracing::debug!(efficiency, idle = 100.0 - efficiency, "sampled cpu efficiency");

        // 2. daemon uptime telemetry
        let uptime = now - self.state.start_time;
        self.sink.emit(
            Record::new("daemon")
                .tag("hostname", self.hostname.clone())
                .field("uptime", uptime),
        );

        // 3. sentinel flags
        let draining = mode::is_draining(&self.args.rundir);
        let drain_stop_requested = mode::is_drain_stop(&self.args.rundir);
        let force_stop_signaled = mode::is_force_stop(&self.args.rundir);
        self.state.force_kill = force_stop_signaled;
        if draining {
            tracing::info!("draining: no new workers will be started this tick");
        }
        if force_stop_signaled {
            tracing::info!("force-stop observed: evicting every worker this tick");
        }

        // 4. overhead controller (may evict one worker)
        let pre_overhead = self.list_workers().await;
        let running_before = u32::try_from(worker::count_running(&pre_overhead)).unwrap_or(0);
        let threshold = admission::threshold(
            self.config.cpus_per_dock,
            running_before,
            self.config.max_docks_cap(),
            ncpus,
        );
        match admission::evaluate_overhead(
            efficiency,
            threshold,
            as_u64(self.state.overhead_first_time),
            as_u64(now),
            self.config.grace_kill,
        ) {
            admission::OverheadVerdict::Clear => self.state.overhead_first_time = 0,
            admission::OverheadVerdict::Accruing => {
                if self.state.overhead_first_time == 0 {
                    self.state.overhead_first_time = now;
                }
            }
            admission::OverheadVerdict::Evict => {
                self.evict_youngest_running(&pre_overhead, now).await;
            }
        }

        // 5. config reload
        let prev_image = self.config.docker_image.clone();
        let prev_influx = self.config.influxdb_url.clone();
        if now - self.state.last_confup_time >= as_i64(self.config.updateconfig) {
            self.config = Config::load(&self.args.confdir, &self.config);
            self.state.last_confup_time = now;
        }

        // 6. image refresh
        let image_changed = prev_image != self.config.docker_image;
        let image_expired = now - self.state.last_update_time >= as_i64(self.config.image_expiration);
        if !self.state.has_image || image_changed || image_expired {
            let (repo, tag) = split_image(&self.config.docker_image);
            match self.engine.pull(&repo, &tag, &self.sink).await {
                Ok(()) => {
                    self.state.has_image = true;
                    self.state.last_update_time = now;
                }
                Err(e) => {
                    e.disp();
                    self.state.has_image = false;
                }
            }
        }

        // 7. sink reconciliation
        if prev_influx.symmetric_difference(&self.config.influxdb_url).next().is_some() {
            self.sink.reconcile(&self.config.influxdb_url);
        }

        // 8. authoritative running count + telemetry
        let workers = self.list_workers().await;
        let running = u32::try_from(worker::count_running(&workers)).unwrap_or(0);
        self.sink.emit(
            Record::new("measurement")
                .tag("hostname", self.hostname.clone())
                .field("cpu_eff", efficiency),
        );
        self.sink.emit(
            Record::new("daemon")
                .tag("hostname", self.hostname.clone())
                .field("containers", i64::from(running))
                .field("status", if draining { "draining" } else { "active" }),
        );

        // 9. admission / spawn burst
        let grace_spawn_elapsed = now - self.state.last_kill_time > as_i64(self.config.grace_spawn);
        if self.state.has_image && !draining && !self.state.force_kill && grace_spawn_elapsed {
            let idle_pct = 100.0 - efficiency;
            let fitting = admission::fitting(idle_pct, ncpus, self.config.cpus_per_dock);
            let to_launch = admission::launchable(
                fitting,
                self.config.max_docks_cap(),
                running,
                self.config.docks_per_loop,
            );
            for _ in 0..to_launch {
                let worker = lifecycle::build_spec(&self.config, &self.hostname);
                if let Err(e) = lifecycle::spawn(&self.engine, worker, &self.sink).await {
                    e.disp();
                    break;
                }
            }
        }

        // 10 + 11. lifecycle reap pass and table dump
        self.reap_workers(now).await;

        // 12. force-stop is consumed within the tick that observed it
        if force_stop_signaled {
            if let Err(e) = mode::clear_force_stop(&self.args.rundir) {
                e.disp();
            }
            self.state.force_kill = false;
        }

        // 13. drain-stop convergence, checked against the running count
        // observed at step 8, before this tick's reap pass ran
        if running == 0 && draining && drain_stop_requested {
            if let Err(e) = mode::clear_drain_stop(&self.args.rundir) {
                e.disp();
            }
            self.state.do_main_loop = false;
            tracing::info!("drain converged with no running workers, exiting");
        }
    }

    /// Sleep `main_sleep` seconds, waking every second to re-check
    /// `do_main_loop` and the `force-stop` sentinel so an operator-issued
    /// kill wakes the loop within ~1s instead of waiting out the sleep.
    pub async fn sleep_interruptible(&self) {
        for _ in 0..self.config.main_sleep.max(1) {
            if !self.should_continue() {
                return;
            }
            if mode::is_force_stop(&self.args.rundir) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_with_tag() {
        assert_eq!(
            split_image("busybox:1.36"),
            ("busybox".to_owned(), "1.36".to_owned())
        );
    }

    #[test]
    fn test_split_image_without_tag_defaults_latest() {
        assert_eq!(
            split_image("busybox"),
            ("busybox".to_owned(), "latest".to_owned())
        );
    }

    #[test]
    fn test_split_image_registry_port_is_not_a_tag() {
        assert_eq!(
            split_image("myregistry:5000/busybox"),
            ("myregistry:5000/busybox".to_owned(), "latest".to_owned())
        );
    }

    #[test]
    fn test_split_image_registry_port_with_explicit_tag() {
        assert_eq!(
            split_image("myregistry:5000/busybox:1.36"),
            ("myregistry:5000/busybox".to_owned(), "1.36".to_owned())
        );
    }

    #[test]
    fn test_as_i64_and_as_u64_roundtrip() {
        assert_eq!(as_i64(42), 42);
        assert_eq!(as_u64(42), 42);
        assert_eq!(as_u64(-1), 0);
    }
}
