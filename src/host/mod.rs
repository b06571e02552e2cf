//! Kernel-exposed CPU/memory counters used by the admission and overhead
//! controller.
#![allow(unsafe_code)]

use std::fs;

/// Sum of per-cpu idle time, paired with system uptime, from `/proc/uptime`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub uptime: f64,
    pub idle: f64,
}

/// Number of online logical CPUs, via `SC_NPROCESSORS_ONLN`.
pub fn cpu_count() -> u32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    u32::try_from(n.max(1)).unwrap_or(1)
}

/// Total physical memory in bytes: `SC_PAGE_SIZE * SC_PHYS_PAGES`.
pub fn mem_bytes() -> u64 {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) }.max(0);
    let phys_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) }.max(0);
    u64::try_from(page_size).unwrap_or(0) * u64::try_from(phys_pages).unwrap_or(0)
}

/// `SwapTotal` from `/proc/meminfo`, kilobytes converted to bytes.
///
/// Missing file, missing key, or malformed line all yield `0`.
pub fn swap_bytes() -> u64 {
    let Ok(contents) = fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("SwapTotal:") {
            let kb = rest
                .trim()
                .split(' ')
                .next()
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb * 1024;
            }
        }
    }
    0
}

/// Parse the two floats in `/proc/uptime`: uptime seconds and idle-time
/// seconds summed across all CPUs.
pub fn cpu_times() -> CpuTimes {
    let Ok(contents) = fs::read_to_string("/proc/uptime") else {
        return CpuTimes {
            uptime: 0.0,
            idle: 0.0,
        };
    };
    let mut parts = contents.trim().split(' ');
    let uptime = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let idle = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
    CpuTimes { uptime, idle }
}

/// Whether AppArmor is enabled on this host.
///
/// Absent parameter file means AppArmor isn't compiled in, not an error.
pub fn apparmor_enabled() -> bool {
    fs::read_to_string("/sys/module/apparmor/parameters/enabled")
        .map(|s| s.trim() == "Y")
        .unwrap_or(false)
}

/// Current seconds-since-epoch in UTC.
///
/// A prior revision derived this via `mktime(utcnow().timetuple())`, which
/// runs `mktime` (a *local*-time function) on a UTC-decomposed tuple and so
/// offsets the result by the host's local-time delta on any non-UTC host.
/// That was a bug, not a contract: this reads the epoch directly and treats
/// it as UTC throughout, which is the only sound way to keep `uptime`
/// calculations consistent (see DESIGN.md for the rationale).
pub fn utc_time() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// The short hostname: the first label before any `.`.
pub fn short_hostname() -> String {
    let full = hostname_raw();
    full.split('.').next().unwrap_or(&full).to_owned()
}

fn hostname_raw() -> String {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if ret != 0 {
        return "localhost".to_owned();
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_count_at_least_one() {
        assert!(cpu_count() >= 1);
    }

    #[test]
    fn test_mem_bytes_nonzero_on_real_host() {
        assert!(mem_bytes() > 0);
    }

    #[test]
    fn test_apparmor_enabled_no_panic() {
        let _ = apparmor_enabled();
    }

    #[test]
    fn test_short_hostname_no_dot() {
        assert!(!short_hostname().contains('.') || short_hostname().is_empty());
    }

    #[test]
    fn test_utc_time_monotonic_ish() {
        let a = utc_time();
        let b = utc_time();
        assert!(b >= a);
    }
}
