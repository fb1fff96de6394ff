use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::model::PlaybackEvent;

/// Fan-out of playback events to every subscriber.
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// broadcast.
#[derive(Clone, Default)]
pub struct PlaybackEventBus {
    subscribers: Arc<Mutex<Vec<Sender<PlaybackEvent>>>>,
}

impl PlaybackEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded::<PlaybackEvent>();
        {
            let mut subscribers = self.subscribers.lock().expect("Event bus mutex poisoned");
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: PlaybackEvent) {
        let mut subscribers = self.subscribers.lock().expect("Event bus mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("Event bus mutex poisoned")
            .len()
    }
}
