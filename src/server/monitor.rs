use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time;

/// Latest resource usage of a running server.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// CPU usage in percent of one core
    pub cpu: f32,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    #[serde(rename = "uptimeSec")]
    pub uptime_secs: u64,
    #[serde(rename = "playerCount")]
    pub player_count: usize,
}

/// One sysinfo reading for a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu: f32,
    pub memory_bytes: u64,
}

impl ResourceSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Samples CPU and memory of a single process.
///
/// CPU usage is computed between consecutive refreshes, so the first
/// sample of a new sampler always reports 0%.
pub struct ResourceSampler {
    system: System,
    pid: Pid,
}

impl ResourceSampler {
    pub fn new(pid: u32) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
        }
    }

    /// Refresh and read the process; `None` once it is gone.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.system.process(self.pid).map(|process| ResourceSample {
            cpu: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }
}

/// Start a resource poll for `pid` that calls `on_sample` every `interval`.
///
/// The poll runs independently of the process's output and stops on its
/// own when the process disappears; the returned handle lets the owner
/// abort it sooner.
pub fn spawn_stats_poll<F, Fut>(pid: u32, interval: Duration, on_sample: F) -> JoinHandle<()>
where
    F: Fn(ResourceSample) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut sampler = ResourceSampler::new(pid);
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match sampler.sample() {
                Some(sample) => on_sample(sample).await,
                None => {
                    tracing::debug!(pid, "Process gone, stopping stats poll");
                    break;
                }
            }
        }
    })
}
