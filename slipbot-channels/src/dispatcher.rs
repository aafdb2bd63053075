//! Inbound message dispatch and periodic conversation sweeping.
//!
//! Every contact gets its own worker task fed by its own queue, so a contact's
//! messages are handled one at a time in arrival order while other contacts
//! proceed concurrently. Lanes are keyed by the normalized contact number.
//!
//! A worker that stays idle for `idle_timeout` reports how many messages it
//! has handled. The dispatcher closes the lane only when that count matches
//! what it routed, so a retiring worker never races a fresh one. When the
//! inbound queue closes, every lane is closed and the dispatcher waits for its
//! workers to finish what is queued.

use crate::conversation::ConversationEngine;
use crate::message::ChannelMessage;
use slipbot_common::PhoneMatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// How long a per-contact worker waits for more messages before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct Lane {
    worker: u64,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    routed: u64,
}

/// Sent by a worker that has been idle for a full timeout.
#[derive(Debug)]
struct Idle {
    contact: String,
    worker: u64,
    handled: u64,
}

pub struct ConversationDispatcher {
    engine: Arc<ConversationEngine>,
    idle_timeout: Duration,
}

impl ConversationDispatcher {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self {
            engine,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Consume `rx` until every sender is dropped.
    ///
    /// The returned task completes once all workers have drained their
    /// queues. Aborting it aborts the workers too.
    pub fn spawn(self, mut rx: mpsc::Receiver<ChannelMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("conversation dispatcher started");

            let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<Idle>();
            let mut lanes: HashMap<String, Lane> = HashMap::new();
            let mut workers = JoinSet::new();
            let mut next_worker = 0u64;

            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        if message.is_group() {
                            tracing::debug!(chat_id = %message.chat_id, "dropping group message");
                            continue;
                        }
                        let contact = PhoneMatcher::normalize(&message.sender);
                        let Some(message) = route(&mut lanes, &contact, message) else {
                            continue;
                        };
                        next_worker += 1;
                        let tx = self.spawn_worker(
                            &mut workers,
                            contact.clone(),
                            next_worker,
                            idle_tx.clone(),
                        );
                        if tx.send(message).is_err() {
                            tracing::error!(contact = %contact, "new conversation worker closed immediately");
                            continue;
                        }
                        lanes.insert(contact, Lane { worker: next_worker, tx, routed: 1 });
                    }
                    Some(idle) = idle_rx.recv() => retire(&mut lanes, idle),
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        log_worker_exit(joined);
                    }
                }
            }

            let open_lanes = lanes.len();
            lanes.clear();
            while let Some(joined) = workers.join_next().await {
                log_worker_exit(joined);
            }

            tracing::info!(open_lanes, "conversation dispatcher stopped");
        })
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        contact: String,
        worker: u64,
        idle_tx: mpsc::UnboundedSender<Idle>,
    ) -> mpsc::UnboundedSender<ChannelMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelMessage>();
        let engine = Arc::clone(&self.engine);
        let idle_timeout = self.idle_timeout;

        workers.spawn(async move {
            let mut handled = 0u64;
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(message)) => {
                        engine.handle_message(&message).await;
                        handled += 1;
                    }
                    // Lane closed by the dispatcher
                    Ok(None) => break,
                    Err(_) => {
                        let _ = idle_tx.send(Idle {
                            contact: contact.clone(),
                            worker,
                            handled,
                        });
                    }
                }
            }
            tracing::debug!(contact = %contact, handled, "conversation worker retired");
        });

        tx
    }
}

/// Queue `message` on the contact's open lane, or hand it back when a new
/// worker is needed.
fn route(
    lanes: &mut HashMap<String, Lane>,
    contact: &str,
    message: ChannelMessage,
) -> Option<ChannelMessage> {
    let lane = lanes.get_mut(contact)?;
    match lane.tx.send(message) {
        Ok(()) => {
            lane.routed += 1;
            None
        }
        // Worker died without its lane being closed
        Err(mpsc::error::SendError(message)) => Some(message),
    }
}

/// Close an idle worker's lane unless messages are still in flight to it.
fn retire(lanes: &mut HashMap<String, Lane>, idle: Idle) {
    let caught_up = lanes
        .get(&idle.contact)
        .is_some_and(|lane| lane.worker == idle.worker && lane.routed == idle.handled);
    if caught_up {
        lanes.remove(&idle.contact);
    }
}

fn log_worker_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "conversation worker panicked");
        }
    }
}

/// Periodically drop stale conversations.
pub fn spawn_sweeper(engine: Arc<ConversationEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = engine.sweep_expired().await;
            if removed > 0 {
                tracing::info!(removed, "stale conversations swept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(worker: u64, routed: u64) -> Lane {
        Lane {
            worker,
            tx: mpsc::unbounded_channel().0,
            routed,
        }
    }

    fn idle(contact: &str, worker: u64, handled: u64) -> Idle {
        Idle {
            contact: contact.to_string(),
            worker,
            handled,
        }
    }

    #[test]
    fn test_retire_closes_caught_up_lane() {
        let mut lanes = HashMap::from([("919900000001".to_string(), lane(1, 3))]);
        retire(&mut lanes, idle("919900000001", 1, 3));
        assert!(lanes.is_empty());
    }

    #[test]
    fn test_retire_keeps_lane_with_messages_in_flight() {
        let mut lanes = HashMap::from([("919900000001".to_string(), lane(1, 4))]);
        retire(&mut lanes, idle("919900000001", 1, 3));
        assert_eq!(lanes["919900000001"].routed, 4);
    }

    #[test]
    fn test_retire_ignores_report_from_replaced_worker() {
        let mut lanes = HashMap::from([("919900000001".to_string(), lane(2, 1))]);
        retire(&mut lanes, idle("919900000001", 1, 1));
        assert_eq!(lanes["919900000001"].worker, 2);

        retire(&mut lanes, idle("919800000000", 2, 1));
        assert_eq!(lanes.len(), 1);
    }

    #[test]
    fn test_route_hands_back_message_for_unknown_or_dead_lane() {
        let mut lanes = HashMap::new();
        let message = ChannelMessage::direct_text("whatsapp", "919900000001", "sobha");
        let message = route(&mut lanes, "919900000001", message).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        lanes.insert(
            "919900000001".to_string(),
            Lane {
                worker: 1,
                tx,
                routed: 1,
            },
        );
        assert!(route(&mut lanes, "919900000001", message).is_some());
        assert_eq!(lanes["919900000001"].routed, 1);
    }

    #[tokio::test]
    async fn test_route_counts_queued_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut lanes = HashMap::from([(
            "919900000001".to_string(),
            Lane {
                worker: 1,
                tx,
                routed: 1,
            },
        )]);

        let message = ChannelMessage::direct_text("whatsapp", "+91 99000 00001", "E001");
        assert!(route(&mut lanes, "919900000001", message).is_none());
        assert_eq!(lanes["919900000001"].routed, 2);
        assert_eq!(rx.recv().await.map(|m| m.sender), Some("+91 99000 00001".to_string()));
    }
}
