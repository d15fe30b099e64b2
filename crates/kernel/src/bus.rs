use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::KernelEvent;

/// Ordered fan-out of a session's events.
///
/// `publish` hands the event to every current subscriber, in subscription
/// order, before it returns. Subscriber registration and the bounded history
/// share one lock, so a replaying subscriber sees history followed by live
/// events with no gap and no duplicate.
pub struct EventBus {
    state: Mutex<BusState>,
}

struct BusState {
    subscribers: Vec<mpsc::UnboundedSender<KernelEvent>>,
    history: VecDeque<KernelEvent>,
    history_capacity: usize,
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                subscribers: Vec::new(),
                history: VecDeque::new(),
                history_capacity,
            }),
        }
    }

    pub fn publish(&self, event: KernelEvent) {
        let mut state = self.lock();

        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());

        if state.history_capacity > 0 {
            if state.history.len() == state.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(event);
        }
    }

    /// Registers a subscriber. With `replay`, the retained history is
    /// delivered ahead of any event published afterwards.
    pub fn subscribe(&self, replay: bool) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();

        if replay {
            for event in state.history.iter() {
                let _ = sender.send(event.clone());
            }
        }
        state.subscribers.push(sender);

        Subscription { receiver }
    }

    pub fn history(&self) -> Vec<KernelEvent> {
        self.lock().history.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Publishing never panics while holding the lock, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes on the next
/// publish.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<KernelEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the session is gone and
    /// everything delivered has been read.
    pub async fn recv(&mut self) -> Option<KernelEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<KernelEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
