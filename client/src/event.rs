//! Session notifications.

use tokio::sync::mpsc;

use crate::error::SessionError;

/// A notification emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The session became ready (emitted on every successful (re)connect).
    Connected,
    /// The connection was lost or torn down.
    Disconnected,
    /// A reconnect attempt has been scheduled.
    Reconnecting { attempt: u32 },
    /// The session became ready for the first time.
    Ready,
    Error(SessionError),
    /// The session was shut down. Always the last event.
    Ended,
}

/// A subscription to session notifications.
///
/// Receives every event emitted after the subscription was created. The
/// stream ends after [`Event::Ended`] once the session is fully torn down.
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Return an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of events to every live subscriber.
#[derive(Default)]
pub(crate) struct Notifier {
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

impl Notifier {
    pub fn subscribe(&mut self) -> Events {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        Events::new(rx)
    }

    pub fn add(&mut self, tx: mpsc::UnboundedSender<Event>) {
        self.subscribers.push(tx);
    }

    pub fn emit(&mut self, event: Event) {
        tracing::trace!(?event, "emit");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_subscriber() {
        let mut notifier = Notifier::default();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        notifier.emit(Event::Ready);
        notifier.emit(Event::Reconnecting { attempt: 3 });
        assert_eq!(a.try_recv(), Some(Event::Ready));
        assert_eq!(a.try_recv(), Some(Event::Reconnecting { attempt: 3 }));
        assert_eq!(b.try_recv(), Some(Event::Ready));
        assert_eq!(b.try_recv(), Some(Event::Reconnecting { attempt: 3 }));
        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut notifier = Notifier::default();
        let dropped = notifier.subscribe();
        let mut kept = notifier.subscribe();
        drop(dropped);
        notifier.emit(Event::Connected);
        assert_eq!(notifier.subscribers.len(), 1);
        assert_eq!(kept.try_recv(), Some(Event::Connected));
    }
}
