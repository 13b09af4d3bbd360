//! Background maintenance loops.
//!
//! Two periodic tasks run beside the transport:
//!
//! - the heartbeat loop probes every session and disconnects those that
//!   missed the previous probe, and
//! - the housekeeping loop prunes stale responder positions, compacts idle
//!   rate-limit windows and pushes the periodic cache snapshots.
//!
//! Both stop when their [`CancellationToken`] is cancelled. A tick that is
//! missed because the runtime was busy is skipped, not replayed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;

/// Run `step` every `period` until `shutdown` fires. The first run happens
/// one full period after start.
async fn every(
    period: Duration,
    shutdown: CancellationToken,
    name: &'static str,
    mut step: impl FnMut(),
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(task = name, "maintenance loop shutting down");
                break;
            }
            _ = interval.tick() => step(),
        }
    }
}

/// Probe sessions every heartbeat interval.
pub fn run_heartbeat(broker: Arc<Broker>, shutdown: CancellationToken) -> impl Future<Output = ()> {
    let period = broker.config().heartbeat.interval();
    every(period, shutdown, "heartbeat", move || {
        let dropped = broker.heartbeat_sweep();
        if dropped > 0 {
            tracing::info!(dropped, "sessions timed out");
        }
    })
}

/// Prune, compact and snapshot every housekeeping interval.
pub fn run_housekeeping(
    broker: Arc<Broker>,
    shutdown: CancellationToken,
) -> impl Future<Output = ()> {
    let period = broker.config().session.housekeeping_interval();
    every(period, shutdown, "housekeeping", move || {
        let report = broker.housekeeping();
        tracing::debug!(
            stale_responders = report.stale_responders,
            idle_rate_keys = report.idle_rate_keys,
            sessions = broker.sessions().len(),
            "housekeeping pass complete"
        );
    })
}

/// Spawn both loops on the current runtime.
pub fn spawn_maintenance(
    broker: &Arc<Broker>,
    shutdown: &CancellationToken,
) -> [JoinHandle<()>; 2] {
    [
        tokio::spawn(run_heartbeat(Arc::clone(broker), shutdown.clone())),
        tokio::spawn(run_housekeeping(Arc::clone(broker), shutdown.clone())),
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use beacon_types::Role;

    use super::*;
    use crate::config::BrokerConfig;
    use crate::session::SessionSignal;
    use crate::test_support::identity;

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::in_memory(BrokerConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_dropped_after_two_intervals() {
        let broker = broker();
        let period = broker.config().heartbeat.interval();
        let mut handle = broker.connect(identity("quiet", Role::Citizen));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(Arc::clone(&broker), shutdown.clone()));

        tokio::time::sleep(period + Duration::from_millis(10)).await;
        assert!(broker.sessions().contains(handle.id));

        tokio::time::sleep(period).await;
        assert!(!broker.sessions().contains(handle.id));

        let mut saw_probe = false;
        let mut closed = None;
        while let Ok(signal) = handle.outbound.try_recv() {
            match signal {
                SessionSignal::Probe => saw_probe = true,
                SessionSignal::Close(reason) => closed = Some(reason),
                SessionSignal::Deliver(_) => {}
            }
        }
        assert!(saw_probe);
        assert_eq!(closed, Some(beacon_types::DisconnectReason::HeartbeatTimeout));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answered_probes_keep_session_alive() {
        let broker = broker();
        let period = broker.config().heartbeat.interval();
        let handle = broker.connect(identity("chatty", Role::Operator));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(Arc::clone(&broker), shutdown.clone()));

        tokio::time::sleep(period / 2).await;
        for _ in 0..4 {
            tokio::time::sleep(period).await;
            broker.sessions().acknowledge_probe(handle.id);
        }
        assert!(broker.sessions().contains(handle.id));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_both_loops() {
        let broker = broker();
        let shutdown = CancellationToken::new();
        let handles = spawn_maintenance(&broker, &shutdown);
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
