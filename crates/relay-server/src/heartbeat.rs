//! Application-level heartbeat for a single connection.
//!
//! Every `ping_interval` the monitor queues a `PING` event and waits up to
//! `pong_timeout` for [`HeartbeatHandle::on_pong`]. A missed pong fires the
//! timeout callback exactly once and ends the monitor. The ping is queued
//! without waiting, so a client that stops reading is still evicted.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_proto::ServerEvent;
use tokio::sync::Notify;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HeartbeatConfig;
use crate::connection::{ConnectionId, OutboundSender};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The client did not answer a ping in time.
    TimedOut,
    /// The monitor was stopped.
    Cancelled,
    /// The connection's outbound queue closed.
    ConnectionGone,
}

/// Handle to a running heartbeat monitor.
#[derive(Debug)]
pub struct HeartbeatHandle {
    pong: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<HeartbeatOutcome>>>,
}

impl HeartbeatHandle {
    /// Starts a monitor.
    ///
    /// `on_timeout` runs on the monitor task when a pong is missed; it is never
    /// called after [`Self::stop`].
    pub fn spawn<F>(
        config: HeartbeatConfig,
        connection_id: ConnectionId,
        outbound: OutboundSender,
        on_timeout: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let pong = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            config,
            connection_id,
            outbound,
            pong.clone(),
            cancel.clone(),
            on_timeout,
        ));
        Self {
            pong,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Reports liveness from the client. Only counts while a pong is awaited.
    pub fn on_pong(&self) {
        self.pong.notify_waiters();
    }

    /// Stops the monitor. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Check if the monitor has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the monitor task to finish, if it has not been taken by [`Self::stop`].
    pub async fn join(&self) -> Option<HeartbeatOutcome> {
        let task = self.task.lock().take()?;
        task.await.ok()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_heartbeat<F>(
    config: HeartbeatConfig,
    connection_id: ConnectionId,
    outbound: OutboundSender,
    pong: Arc<Notify>,
    cancel: CancellationToken,
    on_timeout: F,
) -> HeartbeatOutcome
where
    F: FnOnce() + Send + 'static,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            () = time::sleep(config.ping_interval) => {}
        }

        // Register before sending so a fast pong cannot slip past.
        let pong_received = pong.notified();
        tokio::pin!(pong_received);

        // A full queue counts as a missed ping; the pong countdown still runs.
        match outbound.try_send(ServerEvent::ping()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %connection_id, "outbound queue full, ping dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %connection_id, "outbound closed, heartbeat exiting");
                return HeartbeatOutcome::ConnectionGone;
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            () = &mut pong_received => {
                debug!(connection_id = %connection_id, "pong received");
            }
            () = time::sleep(config.pong_timeout) => {
                if cancel.is_cancelled() {
                    return HeartbeatOutcome::Cancelled;
                }
                warn!(
                    connection_id = %connection_id,
                    timeout_ms = config.pong_timeout.as_millis() as u64,
                    "heartbeat timed out"
                );
                cancel.cancel();
                on_timeout();
                return HeartbeatOutcome::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::connection::outbound_channel;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig::new()
            .with_ping_interval(Duration::from_secs(30))
            .with_pong_timeout(Duration::from_secs(10))
    }

    fn counter() -> (Arc<AtomicU32>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = fired.clone();
        (fired, move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_ping_after_interval() {
        let (tx, mut rx) = outbound_channel(8);
        let (_fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Ping { .. })));
        hb.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_pong() {
        let (tx, mut rx) = outbound_channel(8);
        let (fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        let outcome = hb.join().await;
        assert_eq!(outcome, Some(HeartbeatOutcome::TimedOut));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Ping { .. })));
        assert!(hb.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_connection_alive() {
        let (tx, mut rx) = outbound_channel(8);
        let (fired, on_timeout) = counter();
        let hb = Arc::new(HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout));

        for _ in 0..5 {
            assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
            time::sleep(Duration::from_secs(5)).await;
            hb.on_pong();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!hb.is_stopped());
        hb.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pong_does_not_count() {
        let (tx, mut rx) = outbound_channel(8);
        let (fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        // Pong before any ping was sent.
        time::sleep(Duration::from_secs(1)).await;
        hb.on_pong();

        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
        assert_eq!(hb.join().await, Some(HeartbeatOutcome::TimedOut));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_timeout() {
        let (tx, mut rx) = outbound_channel(8);
        let (fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
        hb.stop();
        hb.stop();

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_outbound_closes() {
        let (tx, rx) = outbound_channel(8);
        drop(rx);
        let (fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        assert_eq!(hb.join().await, Some(HeartbeatOutcome::ConnectionGone));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_outbound_queue_still_times_out() {
        let (tx, mut rx) = outbound_channel(1);
        tx.try_send(ServerEvent::pong()).unwrap();
        let (fired, on_timeout) = counter();
        let hb = HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout);

        let started = time::Instant::now();
        assert_eq!(hb.join().await, Some(HeartbeatOutcome::TimedOut));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Only the event that filled the queue; the ping was dropped.
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Pong { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_monitor() {
        let (tx, mut rx) = outbound_channel(8);
        let (fired, on_timeout) = counter();
        drop(HeartbeatHandle::spawn(config(), ConnectionId::new(), tx, on_timeout));

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(rx.recv().await.is_none());
    }
}
