//! In-memory delivery of encoded messages between shareholders.
//!
//! Each shareholder owns the receiving half of an unbounded channel and the [Relay] holds every
//! sending half. Messages from a given sender are delivered in the order they were sent.

use bytes::Bytes;
use futures::channel::mpsc;
use tracing::{debug, warn};

/// An item in a shareholder's inbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// An encoded, signed message.
    Deliver(Bytes),
    /// Stops the shareholder's consumer loop.
    Stop,
}

/// Delivers messages to every shareholder.
#[derive(Clone, Debug)]
pub struct Relay {
    senders: Vec<mpsc::UnboundedSender<Envelope>>,
}

impl Relay {
    /// Creates a relay for `n` shareholders, returning the inbox of each.
    pub fn new(n: u32) -> (Self, Vec<mpsc::UnboundedReceiver<Envelope>>) {
        let (senders, receivers) = (0..n).map(|_| mpsc::unbounded()).unzip();
        (Self { senders }, receivers)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    fn deliver(&self, recipient: u32, envelope: Envelope) {
        let Some(sender) = self.senders.get(recipient as usize) else {
            warn!(recipient, "unknown recipient");
            return;
        };
        if sender.unbounded_send(envelope).is_err() {
            debug!(recipient, "inbox closed");
        }
    }

    /// Delivers a message to a single shareholder.
    pub fn send(&self, recipient: u32, message: Bytes) {
        self.deliver(recipient, Envelope::Deliver(message));
    }

    /// Delivers a message to every shareholder (including the sender).
    pub fn broadcast(&self, message: Bytes) {
        for recipient in 0..self.senders.len() as u32 {
            self.deliver(recipient, Envelope::Deliver(message.clone()));
        }
    }

    /// Asks every shareholder to stop.
    pub fn stop(&self) {
        for recipient in 0..self.senders.len() as u32 {
            self.deliver(recipient, Envelope::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;

    #[test_traced]
    fn test_fifo() {
        let (relay, mut inboxes) = Relay::new(3);
        relay.broadcast(Bytes::from_static(b"a"));
        relay.send(1, Bytes::from_static(b"b"));
        relay.broadcast(Bytes::from_static(b"c"));

        let drained = inboxes
            .iter_mut()
            .map(|inbox| {
                let mut messages = Vec::new();
                while let Ok(Some(Envelope::Deliver(message))) = inbox.try_next() {
                    messages.push(message);
                }
                messages
            })
            .collect::<Vec<_>>();
        assert_eq!(drained[0], vec![Bytes::from_static(b"a"), Bytes::from_static(b"c")]);
        assert_eq!(
            drained[1],
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
    }

    #[test_traced]
    fn test_closed_inbox() {
        let (relay, mut inboxes) = Relay::new(2);
        inboxes.pop();
        relay.broadcast(Bytes::from_static(b"a"));
        relay.send(7, Bytes::from_static(b"b"));
        relay.stop();
        assert_eq!(
            inboxes[0].try_next().unwrap(),
            Some(Envelope::Deliver(Bytes::from_static(b"a")))
        );
        assert_eq!(inboxes[0].try_next().unwrap(), Some(Envelope::Stop));
    }
}
