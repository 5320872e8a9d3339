use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Periodic resource logger that runs beside a district task. It observes
/// only; nothing depends on its output.
pub struct ResourceMonitor;

pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl ResourceMonitor {
    pub fn spawn(label: impl Into<String>, interval: Duration) -> MonitorHandle {
        let label = label.into();
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ticks += 1;
                        match resident_memory_kb().await {
                            Some(kb) => info!("[{}] resident memory: {:.1} MB", label, kb as f64 / 1024.0),
                            None => debug!("[{}] resident memory unavailable", label),
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("[{}] monitor stopped after {} samples", label, ticks);
            ticks
        });

        MonitorHandle { stop, task }
    }
}

impl MonitorHandle {
    /// Signals the monitor and waits for it to finish. Returns the number of
    /// samples taken.
    pub async fn stop(self) -> u64 {
        let _ = self.stop.send(true);
        self.task.await.unwrap_or(0)
    }
}

async fn resident_memory_kb() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}
