//! Port allocation for automation servers.
//!
//! Ports are probed by binding them at call time. Nothing holds the port
//! between allocation and the server binding it, so another process can still
//! grab it in between.

use crate::error::RunError;
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;

/// Hands out free local ports within caller-supplied ranges.
pub struct PortAllocator {
    /// Ports already handed out by this allocator.
    used_ports: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            used_ports: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate `count` distinct free ports in `[min, max]`.
    ///
    /// The range is validated before any port is probed. Ports this allocator
    /// already handed out are never returned again, so the REST and bootstrap
    /// allocations of one run cannot overlap.
    pub fn allocate(&self, count: usize, min: u16, max: u16) -> Result<Vec<u16>, RunError> {
        validate_range(count, min, max)?;

        let mut used = self.used_ports.lock().unwrap_or_else(|e| e.into_inner());
        let mut ports = Vec::with_capacity(count);
        for port in min..=max {
            if ports.len() == count {
                break;
            }
            if used.contains(&port) || !is_port_free(port) {
                continue;
            }
            ports.push(port);
        }

        if ports.len() < count {
            return Err(RunError::PortRange(format!(
                "only {} of {} ports free in {}-{}",
                ports.len(),
                count,
                min,
                max
            )));
        }

        used.extend(ports.iter().copied());
        Ok(ports)
    }

}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_range(count: usize, min: u16, max: u16) -> Result<(), RunError> {
    if min > max {
        return Err(RunError::PortRange(format!("min {} > max {}", min, max)));
    }
    if usize::from(max - min) < count {
        return Err(RunError::PortRange(format!(
            "{}-{} is too small for {} ports",
            min, max, count
        )));
    }
    Ok(())
}

/// A port is free if we can bind it on all interfaces right now.
pub(crate) fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
