//! Systemd service integration
//!
//! Implements the sd-notify datagram protocol so the daemon can run as a
//! `Type=notify` unit. Every function is a no-op when `NOTIFY_SOCKET` is not
//! set.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use tracing::{debug, info};

fn notify(message: &str) -> Result<bool> {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
        return Ok(false);
    };

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send {} notification to systemd", message))?;
    Ok(true)
}

/// Notify systemd that the watcher is running
pub fn notify_ready() -> Result<()> {
    if notify("READY=1")? {
        info!("Notified systemd: service ready");
    }
    Ok(())
}

/// Notify systemd that shutdown has begun
pub fn notify_stopping() -> Result<()> {
    if notify("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if notify(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

/// Sends lifecycle notifications only when running in service mode
#[derive(Debug, Clone, Copy)]
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(service_mode: bool) -> Self {
        Self {
            enabled: service_mode,
        }
    }

    pub fn ready(&self) -> Result<()> {
        if self.enabled { notify_ready() } else { Ok(()) }
    }

    pub fn status(&self, status: &str) -> Result<()> {
        if self.enabled {
            notify_status(status)
        } else {
            Ok(())
        }
    }

    pub fn stopping(&self) -> Result<()> {
        if self.enabled {
            notify_stopping()
        } else {
            Ok(())
        }
    }
}
