use std::collections::VecDeque;

use bytes::Bytes;

use crate::transport::{ReplyCallback, Transport};

/// A command waiting for the session to become ready.
pub(crate) struct QueuedCommand {
    pub args: Vec<Bytes>,
    pub reply: ReplyCallback,
}

/// FIFO backlog of commands issued while the session is not ready.
///
/// Drained exactly once per ready transition. Entries are never re-queued.
#[derive(Default)]
pub(crate) struct CommandQueue {
    entries: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub fn push(&mut self, args: Vec<Bytes>, reply: ReplyCallback) {
        self.entries.push_back(QueuedCommand { args, reply });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send every queued command to the transport in submission order.
    /// Returns the number of commands sent.
    pub fn drain_into<T: Transport>(&mut self, transport: &mut T) -> usize {
        let count = self.entries.len();
        for cmd in self.entries.drain(..) {
            transport.send(cmd.args, cmd.reply);
        }
        count
    }

    /// Drop every queued command without sending it. Returns how many were
    /// discarded. Their callbacks are dropped uninvoked.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}
