//! Review-event hub — fan-out to live subscribers.
//!
//! One spawned loop owns the subscriber registry; register, unregister and
//! publish all arrive as messages on a single command channel, so registry
//! mutation has one linear history and delivery order matches publish order.
//! Each subscriber drains its own bounded queue: a subscriber that stops
//! reading is disconnected once its queue fills, rather than stalling the
//! loop or its peers. Events are not replayed; a subscriber only sees what
//! was published after its registration.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::ReviewEvent;

/// Per-subscriber outbound queue depth before disconnection.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 64;

const COMMAND_QUEUE: usize = 256;

enum HubCommand {
    Register {
        id: Uuid,
        tx: mpsc::Sender<ReviewEvent>,
    },
    Unregister {
        id: Uuid,
    },
    Publish {
        event: ReviewEvent,
    },
}

/// Cheaply cloneable handle to the broadcast loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    queue_depth: usize,
}

impl Hub {
    /// Spawn the broadcast loop and return its handle. Must be called from
    /// within a tokio runtime.
    pub fn spawn() -> Self {
        Self::with_queue_depth(DEFAULT_SUBSCRIBER_QUEUE)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(run_loop(rx));
        Self {
            commands,
            queue_depth,
        }
    }

    /// Register a new subscriber. Events published after this call arrive on
    /// the returned subscription in publish order, exactly once each.
    pub async fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        // A gone loop just yields an immediately-ended subscription.
        let _ = self.commands.send(HubCommand::Register { id, tx }).await;
        Subscription {
            id,
            events: rx,
            commands: self.commands.clone(),
        }
    }

    /// Publish to every subscriber registered at this moment. Delivery
    /// failures are local to the affected subscriber and never surface here.
    pub async fn publish(&self, event: ReviewEvent) {
        if self
            .commands
            .send(HubCommand::Publish { event })
            .await
            .is_err()
        {
            warn!("hub loop is gone; dropping event");
        }
    }
}

/// A live registration. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: Uuid,
    events: mpsc::Receiver<ReviewEvent>,
    commands: mpsc::Sender<HubCommand>,
}

impl Subscription {
    /// Next event, or `None` once the registration ended — hub shutdown, or
    /// this subscriber was disconnected for falling behind.
    pub async fn recv(&mut self) -> Option<ReviewEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best effort: if the command queue is full the loop will notice the
        // closed queue on its next publish and drop the entry then.
        let _ = self.commands.try_send(HubCommand::Unregister { id: self.id });
    }
}

async fn run_loop(mut commands: mpsc::Receiver<HubCommand>) {
    let mut subscribers: HashMap<Uuid, mpsc::Sender<ReviewEvent>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, tx } => {
                subscribers.insert(id, tx);
                debug!(subscriber = %id, total = subscribers.len(), "subscriber registered");
            }
            HubCommand::Unregister { id } => {
                if subscribers.remove(&id).is_some() {
                    debug!(subscriber = %id, total = subscribers.len(), "subscriber unregistered");
                }
            }
            HubCommand::Publish { event } => {
                let mut dropped = Vec::new();
                for (id, tx) in &subscribers {
                    match tx.try_send(event.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(subscriber = %id, "outbound queue full; disconnecting subscriber");
                            dropped.push(*id);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            dropped.push(*id);
                        }
                    }
                }
                for id in dropped {
                    subscribers.remove(&id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run_id: Uuid) -> ReviewEvent {
        ReviewEvent::ChatIngested {
            run_id,
            chat_id: Uuid::new_v4(),
        }
    }

    fn run_of(event: &ReviewEvent) -> Uuid {
        match event {
            ReviewEvent::ChatIngested { run_id, .. } => *run_id,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_to_every_registered_subscriber_in_order() {
        let hub = Hub::spawn();
        let mut a = hub.subscribe().await;
        let mut b = hub.subscribe().await;

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        hub.publish(event(first)).await;
        hub.publish(event(second)).await;

        for subscriber in [&mut a, &mut b] {
            assert_eq!(run_of(&subscriber.recv().await.unwrap()), first);
            assert_eq!(run_of(&subscriber.recv().await.unwrap()), second);
        }
    }

    #[tokio::test]
    async fn late_subscribers_get_no_replay() {
        let hub = Hub::spawn();
        let mut early = hub.subscribe().await;

        let before = Uuid::new_v4();
        hub.publish(event(before)).await;

        // Registration goes through the same command queue as the publish
        // above, so it lands strictly after it.
        let mut late = hub.subscribe().await;
        let after = Uuid::new_v4();
        hub.publish(event(after)).await;

        assert_eq!(run_of(&early.recv().await.unwrap()), before);
        assert_eq!(run_of(&early.recv().await.unwrap()), after);
        assert_eq!(run_of(&late.recv().await.unwrap()), after);
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_without_stalling_peers() {
        let hub = Hub::with_queue_depth(2);
        let mut slow = hub.subscribe().await;
        let mut fast = hub.subscribe().await;

        let runs: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        // The fast subscriber keeps draining; the slow one never reads and
        // overflows its two-slot queue on the third publish.
        for run in &runs {
            hub.publish(event(*run)).await;
            assert_eq!(run_of(&fast.recv().await.unwrap()), *run);
        }

        // The slow one got the two buffered events, then was disconnected.
        assert_eq!(run_of(&slow.recv().await.unwrap()), runs[0]);
        assert_eq!(run_of(&slow.recv().await.unwrap()), runs[1]);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let hub = Hub::spawn();
        let mut kept = hub.subscribe().await;
        let gone = hub.subscribe().await;
        drop(gone);

        let run = Uuid::new_v4();
        hub.publish(event(run)).await;
        assert_eq!(run_of(&kept.recv().await.unwrap()), run);
    }
}
