use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::client::SmtpConnection;

/// Bounds concurrent connections and keeps idle ones for reuse.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    permits: Arc<Semaphore>,
    idle: Mutex<HashMap<(String, u16), Vec<SmtpConnection>>>,
    idle_timeout: Duration,
}

impl ConnectionPool {
    pub(crate) fn new(size: usize, idle_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.clamp(1, Semaphore::MAX_PERMITS))),
            idle: Mutex::default(),
            idle_timeout,
        }
    }

    /// Wait for a connection slot. `None` once the pool has been drained.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Take an idle connection to `host:port` that has not outlived the idle
    /// timeout. Stale connections are dropped.
    pub(crate) async fn checkout(&self, host: &str, port: u16) -> Option<SmtpConnection> {
        let mut idle = self.idle.lock().await;
        let connections = idle.get_mut(&(host.to_string(), port))?;

        while let Some(connection) = connections.pop() {
            if connection.idle_for() < self.idle_timeout {
                return Some(connection);
            }
        }

        None
    }

    /// Return a connection for reuse; it is closed instead when reuse is off.
    pub(crate) async fn checkin(&self, host: &str, port: u16, connection: SmtpConnection) {
        if self.idle_timeout.is_zero() {
            connection.quit().await;
            return;
        }

        self.idle
            .lock()
            .await
            .entry((host.to_string(), port))
            .or_default()
            .push(connection);
    }

    /// Close every idle connection and refuse new ones.
    pub(crate) async fn drain(&self) {
        self.permits.close();
        let idle = std::mem::take(&mut *self.idle.lock().await);
        for connection in idle.into_values().flatten() {
            connection.quit().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
