use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

const MB: u64 = 1024 * 1024;

/// One memory reading. `rss_mb` is this process's resident set; the other
/// two are system-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub rss_mb: u64,
    pub total_mb: u64,
    pub avail_mb: u64,
}

/// Reusable sysinfo handle. Refreshing only the memory figures and this
/// process keeps each sample cheap enough for progress ticks.
pub struct MemoryProbe {
    sys: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()));
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("process memory unavailable: {}", e);
                None
            }
        };
        Self { sys, pid }
    }

    pub fn sample(&mut self) -> MemoryStats {
        self.sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        let rss = self.pid.and_then(|pid| {
            self.sys.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::nothing().with_memory(),
            );
            self.sys.process(pid).map(|p| p.memory())
        });
        MemoryStats {
            rss_mb: rss.unwrap_or(0) / MB,
            total_mb: self.sys.total_memory() / MB,
            avail_mb: self.sys.available_memory() / MB,
        }
    }
}

impl Default for MemoryProbe {
    fn default() -> Self { Self::new() }
}
