use std::time::Instant;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// One reading of the child's resource usage. `None` means the reading
/// failed and the previous value should be kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: Option<f64>,
    pub memory_used: Option<u64>,
    pub io: Option<IoSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoSample {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bandwidth_in: f64,
    pub bandwidth_out: f64,
}

/// Converts cumulative counters into per-second rates. The first reading
/// only establishes a baseline.
#[derive(Debug, Default)]
pub struct IoRateTracker {
    last: Option<(u64, u64, Instant)>,
}

impl IoRateTracker {
    pub fn update(&mut self, bytes_in: u64, bytes_out: u64, now: Instant) -> IoSample {
        let mut sample = IoSample {
            bytes_in,
            bytes_out,
            ..Default::default()
        };

        if let Some((last_in, last_out, last_time)) = self.last {
            let elapsed = now.saturating_duration_since(last_time).as_secs_f64();
            if elapsed > 0.0 {
                sample.bandwidth_in = bytes_in.saturating_sub(last_in) as f64 / elapsed;
                sample.bandwidth_out = bytes_out.saturating_sub(last_out) as f64 / elapsed;
            }
        }

        self.last = Some((bytes_in, bytes_out, now));
        sample
    }
}

pub struct StatsSampler {
    system: System,
    pid: Pid,
    io: IoRateTracker,
}

impl StatsSampler {
    pub fn new(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
            io: IoRateTracker::default(),
        }
    }

    pub fn sample(&mut self) -> ResourceSample {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_disk_usage(),
        );

        let Some(process) = self.system.process(self.pid) else {
            return ResourceSample::default();
        };

        let cpu = process.cpu_usage() as f64;
        // disk counters stand in for traffic; per-process socket counters
        // are not portable
        let disk = process.disk_usage();
        ResourceSample {
            cpu_percent: cpu.is_finite().then_some(cpu),
            memory_used: Some(process.memory()),
            io: Some(self.io.update(
                disk.total_read_bytes,
                disk.total_written_bytes,
                Instant::now(),
            )),
        }
    }
}

/// Parses a JVM heap flag value such as `4G`, `512M` or `1048576K`.
/// A bare number is taken as bytes; anything unparsable yields zero.
pub fn parse_heap_size(value: &str) -> u64 {
    let value = value.trim();
    let Some(last) = value.chars().last() else {
        return 0;
    };

    let (digits, unit) = match last.to_ascii_uppercase() {
        'K' => (&value[..value.len() - 1], KB),
        'M' => (&value[..value.len() - 1], MB),
        'G' => (&value[..value.len() - 1], GB),
        _ => (value, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n.saturating_mul(unit))
        .unwrap_or(0)
}
