//! Virtualization driver abstraction.
//!
//! The shutdown step only needs two operations from a backend: a forced stop
//! and a running-state query. Both are keyed by [`VmId`].

use crate::config::VmId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Control operations of a virtualization backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Request a forced stop of the VM.
    async fn stop(&self, id: &VmId) -> Result<()>;

    /// Check whether the VM is still running.
    async fn is_running(&self, id: &VmId) -> Result<bool>;
}

/// Driver for VMs that run as host processes.
///
/// Each VM is tracked by the PID of its hypervisor process. Stopping sends
/// SIGTERM; the running check sends signal 0 to the PID.
#[derive(Debug, Default)]
pub struct ProcessDriver {
    pids: RwLock<HashMap<VmId, libc::pid_t>>,
}

impl ProcessDriver {
    /// Create a driver with no registered VMs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the VM `id` as the process `pid`.
    pub fn register(&self, id: VmId, pid: libc::pid_t) {
        tracing::debug!(vm = %id, pid, "registered vm process");
        self.pids.write().insert(id, pid);
    }

    fn pid(&self, id: &VmId) -> Result<libc::pid_t> {
        self.pids
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| Error::VmNotFound(id.to_string()))
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    async fn stop(&self, id: &VmId) -> Result<()> {
        let pid = self.pid(id)?;
        tracing::debug!(vm = %id, pid, "sending SIGTERM");

        // SAFETY: kill has no memory-safety preconditions.
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Process already gone
            tracing::debug!(vm = %id, pid, "process already exited");
            return Ok(());
        }
        Err(Error::driver(format!("failed to signal pid {}: {}", pid, err)))
    }

    async fn is_running(&self, id: &VmId) -> Result<bool> {
        let pid = self.pid(id)?;

        // SAFETY: signal 0 only checks for existence and permissions.
        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return Ok(true);
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            // Exists but owned by someone else
            Some(libc::EPERM) => Ok(true),
            _ => Err(Error::driver(format!("failed to check pid {}: {}", pid, err))),
        }
    }
}
