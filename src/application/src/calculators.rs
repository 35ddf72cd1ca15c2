//! Pure calculators (C1). No side effects, no I/O; every function here
//! accepts primitives and returns a number. Division guards follow the
//! invariant that any metric field may legitimately be zero.

use domain::{CapacityBreakdown, LimitingFactor};

/// Little's Law rearranged: workers = arrival-rate * avg-job-duration.
/// Fractional; callers round up.
pub fn rate_law(arrival_rate: f64, avg_job_time_sec: f64) -> f64 {
    if arrival_rate <= 0.0 || avg_job_time_sec <= 0.0 {
        0.0
    } else {
        arrival_rate * avg_job_time_sec
    }
}

/// Workers needed to prevent an SLA breach, with progressive urgency keyed
/// on oldest-job age rather than on predicted pickup time (a directly
/// measured quantity is trusted over a model output that can lie under rate
/// shifts).
pub fn backlog_drain(
    backlog: u64,
    oldest_job_age_sec: u64,
    sla_target_sec: u32,
    avg_job_time_sec: f64,
    breach_threshold: f64,
) -> f64 {
    if backlog == 0 || avg_job_time_sec <= 0.0 {
        return 0.0;
    }
    let backlog = backlog as f64;
    let sla = sla_target_sec as f64;

    if oldest_job_age_sec == 0 {
        return backlog / (sla / avg_job_time_sec).max(1.0);
    }

    let oldest = oldest_job_age_sec as f64;
    let progress = (oldest / sla).min(1.5);
    if progress < breach_threshold {
        return 0.0;
    }

    let time_until_breach = sla - oldest;
    let base = if time_until_breach > 0.0 {
        backlog / (time_until_breach / avg_job_time_sec).max(1.0)
    } else {
        backlog / avg_job_time_sec.max(0.1)
    };

    let multiplier = if progress >= 1.0 {
        3.0
    } else if progress >= 0.9 {
        2.0
    } else if progress >= 0.8 {
        1.5
    } else {
        // progress >= breach_threshold, guaranteed by the early return above
        1.2
    };

    base * multiplier
}

/// Resource-derived half of the capacity calculator. `max_by_config` folds a
/// third bound into `final_max` so the three-way min documented on
/// `CapacityBreakdown` holds as a pure function of its inputs; the live
/// engine pipeline calls this with `i64::MAX` (config bound not yet known to
/// be binding) and applies the per-queue config bound afterwards, so a
/// config-limited tick is reported distinctly from a resource-limited one.
#[derive(Debug, Clone, Copy)]
pub struct CapacityInputs {
    pub total_cores: u32,
    pub reserve_cores: u32,
    pub max_cpu_percent: f64,
    pub current_cpu_percent: f64,
    pub total_memory_mb: u64,
    pub max_mem_percent: f64,
    pub current_mem_percent: f64,
    pub worker_mem_estimate_mb: u64,
}

pub fn capacity_breakdown(
    inputs: &CapacityInputs,
    current_workers: u32,
    max_by_config: i64,
) -> CapacityBreakdown {
    let usable_cores = inputs.total_cores.saturating_sub(inputs.reserve_cores).max(1) as f64;
    let additional_by_cpu =
        (usable_cores * (inputs.max_cpu_percent - inputs.current_cpu_percent).max(0.0) / 100.0)
            .floor() as i64;
    let max_by_cpu = current_workers as i64 + additional_by_cpu;

    let additional_by_memory = if inputs.worker_mem_estimate_mb > 0 {
        (inputs.total_memory_mb as f64
            * (inputs.max_mem_percent - inputs.current_mem_percent).max(0.0)
            / inputs.worker_mem_estimate_mb as f64)
            .floor() as i64
    } else {
        0
    };
    let max_by_memory = current_workers as i64 + additional_by_memory;

    let final_max = max_by_cpu.min(max_by_memory).min(max_by_config).max(0);

    let limiting_factor = if max_by_config <= max_by_cpu && max_by_config <= max_by_memory {
        LimitingFactor::Config
    } else if max_by_cpu <= max_by_memory {
        LimitingFactor::Cpu
    } else {
        LimitingFactor::Memory
    };

    CapacityBreakdown {
        max_by_cpu,
        max_by_memory,
        max_by_config,
        final_max,
        limiting_factor,
    }
}

/// Conservative fallback used when the resource source has failed.
pub fn capacity_unavailable() -> CapacityBreakdown {
    CapacityBreakdown {
        max_by_cpu: 5,
        max_by_memory: 5,
        max_by_config: i64::MAX,
        final_max: 5,
        limiting_factor: LimitingFactor::Unavailable,
    }
}
