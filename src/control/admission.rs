//! CPU efficiency accounting, the launch-arithmetic for how many new
//! workers may start this tick, and sustained-overhead eviction.

use crate::host::CpuTimes;

/// `efficiency = (Δup·ncpus − Δidle)·100 / (Δup·ncpus)`, clamped to
/// `[0, 100]`; a zero delta-uptime (two samples in the same kernel tick)
/// defaults to fully busy rather than dividing by zero.
pub fn compute_efficiency(previous: CpuTimes, current: CpuTimes, ncpus: u32) -> f64 {
    let delta_up = current.uptime - previous.uptime;
    let delta_idle = current.idle - previous.idle;
    let denom = delta_up * f64::from(ncpus);
    if denom <= 0.0 {
        return 100.0;
    }
    ((denom - delta_idle) * 100.0 / denom).clamp(0.0, 100.0)
}

/// `floor(idle · 0.95 · ncpus / (cpus_per_dock · 100))`; `cpus_per_dock=0`
/// degenerates to 0 additional fitting workers rather than dividing by zero.
pub fn fitting(idle_pct: f64, ncpus: u32, cpus_per_dock: f64) -> u32 {
    if cpus_per_dock <= 0.0 {
        return 0;
    }
    let value = (idle_pct * 0.95 * f64::from(ncpus) / (cpus_per_dock * 100.0)).floor();
    if value <= 0.0 {
        0
    } else {
        value as u32
    }
}

/// `min(fitting, max(max_docks − running, 0), docks_per_loop)`.
pub fn launchable(fitting: u32, max_docks: u32, running: u32, docks_per_loop: u32) -> u32 {
    let headroom = max_docks.saturating_sub(running);
    fitting.min(headroom).min(docks_per_loop)
}

/// `100 · cpus_per_dock · min(running, max_docks) / ncpus`.
pub fn threshold(cpus_per_dock: f64, running: u32, max_docks: u32, ncpus: u32) -> f64 {
    if ncpus == 0 {
        return 0.0;
    }
    let capped_running = running.min(max_docks);
    100.0 * cpus_per_dock * f64::from(capped_running) / f64::from(ncpus)
}

/// Result of one overhead-controller evaluation for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverheadVerdict {
    /// Not over threshold; `overhead_first_time` should read 0.
    Clear,
    /// Over threshold, but not yet for `grace_kill` seconds.
    Accruing,
    /// Over threshold for at least `grace_kill` seconds: evict one worker.
    Evict,
}

/// Evaluate the overhead condition for this tick and say what the lifecycle
/// manager should do. `overhead_first_time` is 0 when not currently over
/// threshold; the caller owns updating it based on the returned verdict.
pub fn evaluate_overhead(
    efficiency: f64,
    threshold: f64,
    overhead_first_time: u64,
    now: u64,
    grace_kill: u64,
) -> OverheadVerdict {
    if threshold <= 0.0 || efficiency <= threshold + 10.0 {
        return OverheadVerdict::Clear;
    }
    let first_time = if overhead_first_time == 0 {
        now
    } else {
        overhead_first_time
    };
    if now.saturating_sub(first_time) > grace_kill {
        OverheadVerdict::Evict
    } else {
        OverheadVerdict::Accruing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_efficiency_typical() {
        let prev = CpuTimes { uptime: 100.0, idle: 380.0 };
        let cur = CpuTimes { uptime: 110.0, idle: 418.0 };
        // 4 cpus, delta_up=10 -> denom=40, delta_idle=38 -> (40-38)*100/40=5
        let eff = compute_efficiency(prev, cur, 4);
        assert!((eff - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_efficiency_zero_delta_defaults_full() {
        let sample = CpuTimes { uptime: 100.0, idle: 380.0 };
        assert_eq!(compute_efficiency(sample, sample, 4), 100.0);
    }

    #[test]
    fn test_compute_efficiency_clamped() {
        let prev = CpuTimes { uptime: 0.0, idle: 0.0 };
        let cur = CpuTimes { uptime: 10.0, idle: -5.0 };
        assert_eq!(compute_efficiency(prev, cur, 4), 100.0);
    }

    #[test]
    fn test_fitting_idle_host() {
        assert_eq!(fitting(95.0, 4, 1.0), 3);
    }

    #[test]
    fn test_fitting_zero_cpus_per_dock() {
        assert_eq!(fitting(95.0, 4, 0.0), 0);
    }

    #[test]
    fn test_launchable_caps_by_all_three() {
        assert_eq!(launchable(3, 2, 0, 4), 2);
        assert_eq!(launchable(3, 2, 2, 4), 0);
        assert_eq!(launchable(10, 10, 0, 4), 4);
    }

    #[test]
    fn test_threshold_zero_max_docks_is_zero() {
        assert_eq!(threshold(1.0, 2, 0, 4), 0.0);
    }

    #[test]
    fn test_threshold_typical() {
        assert_eq!(threshold(1.0, 2, 2, 4), 50.0);
    }

    #[test]
    fn test_overhead_clear_when_under_threshold() {
        let verdict = evaluate_overhead(50.0, 50.0, 0, 1000, 120);
        assert_eq!(verdict, OverheadVerdict::Clear);
    }

    #[test]
    fn test_overhead_accrues_then_evicts() {
        let first = evaluate_overhead(80.0, 50.0, 0, 1000, 120);
        assert_eq!(first, OverheadVerdict::Accruing);
        let still_accruing = evaluate_overhead(80.0, 50.0, 1000, 1100, 120);
        assert_eq!(still_accruing, OverheadVerdict::Accruing);
        let evict = evaluate_overhead(80.0, 50.0, 1000, 1121, 120);
        assert_eq!(evict, OverheadVerdict::Evict);
    }

    #[test]
    fn test_overhead_zero_threshold_never_evicts() {
        let verdict = evaluate_overhead(99.0, 0.0, 0, 1_000_000, 1);
        assert_eq!(verdict, OverheadVerdict::Clear);
    }
}
