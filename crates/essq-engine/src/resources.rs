//! Core, memory and wall-time derivation shared by every backend.

use chrono::{DateTime, Local};
use essq_core::config::JobDefaults;
use essq_core::model::{MemoryScope, ResourceRequest, TimeFormat};

const DEFAULT_MAX_JOB_TIME_HRS: f64 = 120.0;
const MAX_JOB_TIME_HRS: f64 = 9999.0;
const SAFETY_MARGIN: f64 = 1.1;
const CLAMPED_SAFETY_MARGIN: f64 = 1.05;

/// What a host advertises about one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostCapacity {
    pub cpus: Option<u32>,
    pub memory_gb: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedResources {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    /// Memory for the submit script in MB, per core where the scheduler wants that.
    pub submit_memory_mb: u64,
    /// Memory was cut down to the node ceiling.
    pub clamped: bool,
}

impl HostCapacity {
    pub fn memory_ceiling_gb(&self, fraction: f64) -> Option<f64> {
        self.memory_gb.map(|m| m * fraction)
    }
}

pub fn derive_resources(
    request: &ResourceRequest,
    defaults: &JobDefaults,
    capacity: HostCapacity,
    scope: MemoryScope,
) -> DerivedResources {
    let cpu_cores = match request.cpu_cores {
        Some(cores) => cores.max(1),
        None => match capacity.cpus {
            Some(max) if defaults.cpu_cores > max => max.max(1),
            _ => defaults.cpu_cores,
        },
    };

    let mut memory_gb = request.memory_gb.unwrap_or(defaults.memory_gb);
    let mut clamped = false;
    if let Some(ceiling) = capacity.memory_ceiling_gb(defaults.max_node_memory_fraction) {
        if memory_gb > ceiling {
            tracing::warn!(
                "Requested memory ({:.2} GB) exceeds {:.0}% of the node memory, using {:.2} GB.",
                memory_gb,
                defaults.max_node_memory_fraction * 100.0,
                ceiling
            );
            memory_gb = ceiling;
            clamped = true;
        }
    }

    DerivedResources {
        cpu_cores,
        memory_gb,
        submit_memory_mb: submit_memory_mb(memory_gb, cpu_cores, clamped, scope),
        clamped,
    }
}

/// Submit-script memory in whole MB, with the safety margin applied.
pub fn submit_memory_mb(memory_gb: f64, cpu_cores: u32, clamped: bool, scope: MemoryScope) -> u64 {
    let margin = if clamped {
        CLAMPED_SAFETY_MARGIN
    } else {
        SAFETY_MARGIN
    };
    let total_mb = memory_gb * 1024.0 * margin;
    (match scope {
        MemoryScope::PerNode => total_mb.ceil(),
        MemoryScope::PerCore => (total_mb / f64::from(cpu_cores.max(1))).ceil(),
    }) as u64
}

/// Replaces a wall time outside (0, 9999] hours with the 120 hour default.
pub fn sanitize_max_job_time(hours: f64) -> f64 {
    if hours <= 0.0 || hours > MAX_JOB_TIME_HRS || !hours.is_finite() {
        DEFAULT_MAX_JOB_TIME_HRS
    } else {
        hours
    }
}

/// Formats a wall time as `D-H:MM:SS` or `H:M:SS`.
pub fn format_max_job_time(hours: f64, format: TimeFormat) -> String {
    let total_secs = (sanitize_max_job_time(hours) * 3600.0).round() as u64;
    let (h, rem) = (total_secs / 3600, total_secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    match format {
        TimeFormat::Days => format!("{}-{}:{:02}:{:02}", h / 24, h % 24, m, s),
        TimeFormat::Hours => format!("{}:{}:{:02}", h, m, s),
    }
}

/// The shorter wall time requested after a time-limit eviction.
pub fn shortened_max_job_time(hours: f64) -> f64 {
    (hours - 24.0).max(1.0)
}

/// Whole seconds between upload and completion, rounding up past half a second.
pub fn determine_run_time(
    initial: Option<DateTime<Local>>,
    final_time: Option<DateTime<Local>>,
) -> Option<i64> {
    let delta = final_time? - initial?;
    let secs = delta.num_seconds();
    let micros = (delta - chrono::Duration::seconds(secs))
        .num_microseconds()
        .unwrap_or(0);
    Some(if micros > 500_000 { secs + 1 } else { secs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn defaults() -> JobDefaults {
        JobDefaults::default()
    }

    #[test]
    fn test_default_cores_clamped_to_host() {
        let capacity = HostCapacity {
            cpus: Some(4),
            memory_gb: None,
        };
        let derived = derive_resources(&ResourceRequest::default(), &defaults(), capacity, MemoryScope::PerNode);
        assert_eq!(derived.cpu_cores, 4);
        assert_eq!(derived.memory_gb, 14.0);
        assert!(!derived.clamped);
    }

    #[test]
    fn test_requested_cores_kept() {
        let request = ResourceRequest {
            cpu_cores: Some(16),
            ..Default::default()
        };
        let derived = derive_resources(&request, &defaults(), HostCapacity::default(), MemoryScope::PerNode);
        assert_eq!(derived.cpu_cores, 16);
    }

    #[test]
    fn test_memory_margin_per_node() {
        let request = ResourceRequest {
            cpu_cores: Some(8),
            memory_gb: Some(10.0),
            ..Default::default()
        };
        let derived = derive_resources(&request, &defaults(), HostCapacity::default(), MemoryScope::PerNode);
        assert_eq!(derived.submit_memory_mb, 11264);
    }

    #[test]
    fn test_memory_margin_per_core() {
        let request = ResourceRequest {
            cpu_cores: Some(8),
            memory_gb: Some(10.0),
            ..Default::default()
        };
        let derived = derive_resources(&request, &defaults(), HostCapacity::default(), MemoryScope::PerCore);
        assert_eq!(derived.submit_memory_mb, 1408);
    }

    #[test]
    fn test_memory_clamped_to_node_fraction() {
        let request = ResourceRequest {
            cpu_cores: Some(8),
            memory_gb: Some(200.0),
            ..Default::default()
        };
        let capacity = HostCapacity {
            cpus: Some(48),
            memory_gb: Some(100.0),
        };
        let derived = derive_resources(&request, &defaults(), capacity, MemoryScope::PerNode);
        assert!(derived.clamped);
        assert!((derived.memory_gb - 80.0).abs() < 1e-9);
        assert_eq!(derived.submit_memory_mb, 86016);
    }

    #[test]
    fn test_format_days() {
        assert_eq!(format_max_job_time(121.0, TimeFormat::Days), "5-1:00:00");
        assert_eq!(format_max_job_time(120.0, TimeFormat::Days), "5-0:00:00");
        assert_eq!(format_max_job_time(1.5, TimeFormat::Days), "0-1:30:00");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_max_job_time(120.0, TimeFormat::Hours), "120:0:00");
        assert_eq!(format_max_job_time(2.25, TimeFormat::Hours), "2:15:00");
    }

    #[test]
    fn test_out_of_range_time_defaults() {
        assert_eq!(format_max_job_time(0.0, TimeFormat::Hours), "120:0:00");
        assert_eq!(format_max_job_time(-3.0, TimeFormat::Days), "5-0:00:00");
        assert_eq!(format_max_job_time(10000.0, TimeFormat::Hours), "120:0:00");
        assert_eq!(format_max_job_time(9999.0, TimeFormat::Hours), "9999:0:00");
    }

    #[test]
    fn test_shortened_time_floors_at_one_hour() {
        assert_eq!(shortened_max_job_time(120.0), 96.0);
        assert_eq!(shortened_max_job_time(25.0), 1.0);
        assert_eq!(shortened_max_job_time(5.0), 1.0);
    }

    #[test]
    fn test_run_time_rounding() {
        let start = Local::now();
        assert_eq!(
            determine_run_time(Some(start), Some(start + Duration::milliseconds(10_600))),
            Some(11)
        );
        assert_eq!(
            determine_run_time(Some(start), Some(start + Duration::milliseconds(10_400))),
            Some(10)
        );
        assert_eq!(determine_run_time(None, Some(start)), None);
        assert_eq!(determine_run_time(Some(start), None), None);
    }
}
