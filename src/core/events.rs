// src/core/events.rs

use crate::models::{Distribution, Platforms, Scope};
use std::sync::mpsc::{self, Receiver, Sender};

/// Notifications emitted synchronously after the state they describe has changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent {
    TitleChanged(String),
    DistributionChanged(Distribution),
    PlatformsChanged(Platforms),
    ScopeChanged(Scope),
}

/// A list of subscribers. Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventChannel {
    subscribers: Vec<Sender<SettingsEvent>>,
}

impl EventChannel {
    pub fn subscribe(&mut self) -> Receiver<SettingsEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: SettingsEvent) {
        log::trace!("Emitting {:?} to {} subscribers.", event, self.subscribers.len());
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_live_subscribers_only() {
        let mut channel = EventChannel::default();
        let rx = channel.subscribe();
        let dropped = channel.subscribe();
        drop(dropped);

        channel.emit(SettingsEvent::TitleChanged("A".into()));
        assert_eq!(rx.try_recv().unwrap(), SettingsEvent::TitleChanged("A".into()));
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.subscribers.len(), 1);
    }
}
