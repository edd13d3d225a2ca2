use std::collections::HashSet;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Host-local process discovery. Pruning and child-kill decisions go through
/// this trait so tests can substitute a deterministic view of the host.
pub trait ProcessProbe: Send + Sync {
    /// Whether any process with this pid exists on the host.
    fn pid_alive(&self, pid: u32) -> bool;

    /// Pids of worker processes on this host, i.e. processes running the
    /// same executable as this one.
    fn worker_pids(&self) -> HashSet<u32>;
}

/// Probe backed by the operating system: kill-0 for liveness, the process
/// table for enumeration.
pub struct SystemProcesses {
    exe_name: String,
}

impl SystemProcesses {
    pub fn new() -> Self {
        let exe_name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
            .unwrap_or_else(|| "resque".to_string());
        Self { exe_name }
    }

    pub fn with_exe_name(exe_name: impl Into<String>) -> Self {
        Self {
            exe_name: exe_name.into(),
        }
    }

    fn name_matches(&self, comm: &str) -> bool {
        // /proc comm is truncated to 15 bytes.
        let comm = comm.trim();
        let truncated: String = self.exe_name.chars().take(15).collect();
        comm == self.exe_name || comm == truncated
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcesses {
    fn pid_alive(&self, pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            // The pid exists but belongs to another user.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    fn worker_pids(&self) -> HashSet<u32> {
        let mut pids = HashSet::new();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return pids;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|name| name.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
                continue;
            };
            if self.name_matches(&comm) {
                pids.insert(pid);
            }
        }
        pids
    }

    #[cfg(not(target_os = "linux"))]
    fn worker_pids(&self) -> HashSet<u32> {
        let mut pids = HashSet::new();
        let Ok(output) = std::process::Command::new("ps")
            .args(["-Ao", "pid=,comm="])
            .output()
        else {
            return pids;
        };
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut fields = line.split_whitespace();
            let Some(pid) = fields.next().and_then(|value| value.parse::<u32>().ok()) else {
                continue;
            };
            let Some(comm) = fields.next() else {
                continue;
            };
            let comm = comm.rsplit('/').next().unwrap_or(comm);
            if self.name_matches(comm) {
                pids.insert(pid);
            }
        }
        pids
    }
}
