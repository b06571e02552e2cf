//! Builds worker specs, creates/starts new workers, and reaps terminated
//! or evicted ones.

use bollard::models::{ContainerCreateBody, DeviceMapping, HostConfig};
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

use crate::app_error::AppError;
use crate::config::{Capability, Config, Device};
use crate::engine::Engine;
use crate::host;
use crate::telemetry::{Fanout, Record};
use crate::worker::{NAME_PREFIX, WorkerDescriptor, WorkerState};

/// A freshly minted, not-yet-created worker identity.
pub struct NewWorker {
    pub name: String,
    pub spec: ContainerCreateBody,
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        .take(6)
        .map(char::from)
        .collect()
}

fn partition_capabilities(capabilities: &[Capability]) -> (Vec<String>, Vec<String>) {
    let mut add = Vec::new();
    let mut drop = Vec::new();
    for cap in capabilities {
        match cap {
            Capability::Add(name) => add.push(name.clone()),
            Capability::Drop(name) => drop.push(name.clone()),
        }
    }
    (add, drop)
}

fn rewrite_devices(devices: &[Device]) -> Vec<DeviceMapping> {
    devices
        .iter()
        .map(|d| DeviceMapping {
            path_on_host: Some(d.host.clone()),
            path_in_container: Some(d.container.clone()),
            cgroup_permissions: Some(d.perms.clone()),
        })
        .collect()
}

/// Build the spec for a brand new worker, following the configuration
/// table: CFS quota/period from `cpus_per_dock`, binds rewritten to
/// `rw,shared,Z`, security opts applied only when AppArmor is enabled,
/// and combined memory+swap limit per the engine's convention.
pub fn build_spec(config: &Config, hostname: &str) -> NewWorker {
    let suffix = random_suffix();
    let name = format!("{NAME_PREFIX}-{suffix}");
    let container_hostname = format!(
        "plancton-{}-{}",
        &hostname[..hostname.len().min(40)],
        Uuid::new_v4()
    );
    let (cap_add, cap_drop) = partition_capabilities(&config.capabilities);
    let binds: Vec<String> = config
        .binds
        .iter()
        .map(|b| format!("{b}:rw,shared,Z"))
        .collect();
    let security_opt = if host::apparmor_enabled() {
        config.security_opts.clone()
    } else {
        Vec::new()
    };

    let host_config = HostConfig {
        cpu_quota: Some((config.cpus_per_dock * 100_000.0) as i64),
        cpu_period: Some(100_000),
        network_mode: Some("bridge".to_owned()),
        security_opt: Some(security_opt),
        binds: Some(binds),
        memory: Some(i64::try_from(config.max_dock_mem).unwrap_or(i64::MAX)),
        memory_swap: Some(
            i64::try_from(config.max_dock_mem + config.max_dock_swap).unwrap_or(i64::MAX),
        ),
        privileged: Some(config.docker_privileged),
        devices: Some(rewrite_devices(&config.devices)),
        cap_add: Some(cap_add),
        cap_drop: Some(cap_drop),
        ..Default::default()
    };

    let spec = ContainerCreateBody {
        cmd: Some(config.docker_cmd.clone()),
        image: Some(config.docker_image.clone()),
        hostname: Some(container_hostname),
        user: Some(config.user_group.clone()),
        host_config: Some(host_config),
        ..Default::default()
    };

    NewWorker { name, spec }
}

/// Create, start, and inspect a new worker for its PID. A zero PID after
/// inspect is treated as a failed launch.
pub async fn spawn(
    engine: &Engine,
    worker: NewWorker,
    sink: &Fanout,
) -> Result<String, AppError> {
    let id = engine.create(worker.spec, &worker.name, sink).await?;
    engine.start(&id, sink).await?;
    let inspected = engine.inspect(&id, sink).await?;
    let pid = inspected
        .state
        .as_ref()
        .and_then(|s| s.pid)
        .unwrap_or(0);
    if pid == 0 {
        return Err(AppError::EngineSemantic(format!(
            "container {id} did not start (pid is 0)"
        )));
    }
    Ok(id)
}

/// Parse an engine timestamp truncated to the first 19 characters
/// (`YYYY-MM-DDTHH:MM:SS`), treated as naive UTC.
pub fn parse_engine_timestamp(raw: &str) -> Option<i64> {
    let truncated = raw.get(..19)?;
    format!("{truncated}Z").parse::<jiff::Timestamp>().ok().map(|t| t.as_second())
}

/// One reap decision for a single worker, alongside the telemetry (if any)
/// the truth table says to emit.
pub enum ReapAction {
    Keep,
    Remove { telemetry: Option<Record> },
}

/// Decide what to do with one worker this tick. `now` and `max_ttl` drive
/// TTL eviction; `force_kill` overrides it; `started_at`/`finished_at` come
/// from a separate inspect call the caller makes only when needed.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_reap(
    worker: &WorkerDescriptor,
    now: i64,
    max_ttl: i64,
    force_kill: bool,
    started_at: Option<i64>,
    finished_at: Option<i64>,
) -> ReapAction {
    match worker.state {
        WorkerState::Running => {
            let uptime = started_at.map_or(0, |s| now - s);
            if uptime > max_ttl || force_kill {
                let telemetry = Some(
                    Record::new("container")
                        .tag("started", "true")
                        .tag("killed", "true")
                        .field("uptime", uptime),
                );
                ReapAction::Remove { telemetry }
            } else {
                ReapAction::Keep
            }
        }
        WorkerState::Exited => {
            let uptime = match (started_at, finished_at) {
                (Some(s), Some(f)) => f - s,
                _ => 0,
            };
            let telemetry = Some(
                Record::new("container")
                    .tag("started", "true")
                    .tag("killed", "false")
                    .field("uptime", uptime),
            );
            ReapAction::Remove { telemetry }
        }
        WorkerState::Created => {
            let telemetry = Some(
                Record::new("container")
                    .tag("started", "false")
                    .tag("killed", "false")
                    .field("uptime", 0_i64),
            );
            ReapAction::Remove { telemetry }
        }
        WorkerState::Other => ReapAction::Remove { telemetry: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_is_six_lowercase_alnum() {
        let s = random_suffix();
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_partition_capabilities() {
        let caps = vec![
            Capability::Add("SYS_ADMIN".to_owned()),
            Capability::Drop("NET_RAW".to_owned()),
        ];
        let (add, drop) = partition_capabilities(&caps);
        assert_eq!(add, vec!["SYS_ADMIN".to_owned()]);
        assert_eq!(drop, vec!["NET_RAW".to_owned()]);
    }

    #[test]
    fn test_build_spec_cpu_quota_from_cpus_per_dock() {
        let mut config = Config::default();
        config.cpus_per_dock = 0.5;
        let worker = build_spec(&config, "myhost");
        let host_config = worker.spec.host_config.unwrap();
        assert_eq!(host_config.cpu_quota, Some(50_000));
        assert_eq!(host_config.cpu_period, Some(100_000));
    }

    #[test]
    fn test_build_spec_memory_swap_is_combined() {
        let mut config = Config::default();
        config.max_dock_mem = 1_000_000_000;
        config.max_dock_swap = 500_000_000;
        let worker = build_spec(&config, "myhost");
        let host_config = worker.spec.host_config.unwrap();
        assert_eq!(host_config.memory, Some(1_000_000_000));
        assert_eq!(host_config.memory_swap, Some(1_500_000_000));
    }

    #[test]
    fn test_build_spec_binds_rewritten() {
        let mut config = Config::default();
        config.binds = vec!["/data".to_owned()];
        let worker = build_spec(&config, "myhost");
        let host_config = worker.spec.host_config.unwrap();
        assert_eq!(host_config.binds, Some(vec!["/data:rw,shared,Z".to_owned()]));
    }

    #[test]
    fn test_build_spec_name_has_worker_prefix() {
        let config = Config::default();
        let worker = build_spec(&config, "myhost");
        assert!(worker.name.starts_with(NAME_PREFIX));
    }

    #[test]
    fn test_parse_engine_timestamp_truncates_fractional_and_zone() {
        let ts = parse_engine_timestamp("2024-01-15T10:30:00.123456789Z").unwrap();
        let ts2 = parse_engine_timestamp("2024-01-15T10:30:00.999Z").unwrap();
        assert_eq!(ts, ts2);
    }

    fn running_worker() -> WorkerDescriptor {
        WorkerDescriptor {
            id: "abc".into(),
            name: "plancton-worker-abc".into(),
            state: WorkerState::Running,
            created: 0,
        }
    }

    #[test]
    fn test_evaluate_reap_running_under_ttl_keeps() {
        let worker = running_worker();
        let action = evaluate_reap(&worker, 1_000, 3_600, false, Some(900), None);
        assert!(matches!(action, ReapAction::Keep));
    }

    #[test]
    fn test_evaluate_reap_running_over_ttl_removes() {
        let worker = running_worker();
        let action = evaluate_reap(&worker, 10_000, 3_600, false, Some(0), None);
        assert!(matches!(action, ReapAction::Remove { telemetry: Some(_) }));
    }

    #[test]
    fn test_evaluate_reap_force_kill_overrides_ttl() {
        let worker = running_worker();
        let action = evaluate_reap(&worker, 1_000, 3_600, true, Some(999), None);
        assert!(matches!(action, ReapAction::Remove { telemetry: Some(_) }));
    }

    #[test]
    fn test_evaluate_reap_exited_computes_uptime() {
        let worker = WorkerDescriptor {
            state: WorkerState::Exited,
            ..running_worker()
        };
        let action = evaluate_reap(&worker, 1_000, 3_600, false, Some(100), Some(160));
        match action {
            ReapAction::Remove { telemetry: Some(r) } => {
                assert!(r.fields.iter().any(|(k, _)| *k == "uptime"));
            }
            _ => panic!("expected removal with telemetry"),
        }
    }

    #[test]
    fn test_evaluate_reap_created_removes_with_zero_uptime() {
        let worker = WorkerDescriptor {
            state: WorkerState::Created,
            ..running_worker()
        };
        let action = evaluate_reap(&worker, 1_000, 3_600, false, None, None);
        assert!(matches!(action, ReapAction::Remove { telemetry: Some(_) }));
    }

    #[test]
    fn test_evaluate_reap_other_removes_silently() {
        let worker = WorkerDescriptor {
            state: WorkerState::Other,
            ..running_worker()
        };
        let action = evaluate_reap(&worker, 1_000, 3_600, false, None, None);
        assert!(matches!(action, ReapAction::Remove { telemetry: None }));
    }
}
