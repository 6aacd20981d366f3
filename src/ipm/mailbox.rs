// corebridge — Mailbox Channel
//
// The hardware mailbox moves one record at a time between the cores and
// raises a receive interrupt on the far side. `Mailbox` is that capability;
// `Loopback` is the in-process pair used when both cores run as tasks on one
// chip, or on a development host.

use std::sync::{Arc, RwLock, Weak};

use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, Message};

/// Receive callback. Runs in the sender's context (the interrupt stand-in),
/// so it must stay short: copy the record and return.
pub type ReceiveCallback = Arc<dyn Fn(Message) + Send + Sync>;

pub trait Mailbox: Send + Sync {
    /// Transmit one record to the peer core.
    fn send(&self, msg: &Message) -> Result<()>;

    /// Route incoming records for `channel` (or every channel when `None`)
    /// to `callback`. Later registrations for the same channel win.
    fn register_callback(&self, channel: Option<ChannelId>, callback: ReceiveCallback);
}

#[derive(Default)]
struct CallbackTable {
    entries: RwLock<Vec<(Option<ChannelId>, ReceiveCallback)>>,
}

impl CallbackTable {
    fn register(&self, channel: Option<ChannelId>, callback: ReceiveCallback) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(c, _)| *c != channel);
        entries.push((channel, callback));
    }

    fn lookup(&self, channel: ChannelId) -> Option<ReceiveCallback> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|(c, _)| *c == Some(channel))
            .or_else(|| entries.iter().find(|(c, _)| c.is_none()))
            .map(|(_, cb)| Arc::clone(cb))
    }
}

/// One end of an in-process mailbox.
pub struct Loopback {
    name: &'static str,
    local: Arc<CallbackTable>,
    peer: Weak<CallbackTable>,
}

impl Loopback {
    /// Create two connected endpoints.
    pub fn pair(a: &'static str, b: &'static str) -> (Loopback, Loopback) {
        let table_a = Arc::new(CallbackTable::default());
        let table_b = Arc::new(CallbackTable::default());
        let end_a = Loopback {
            name: a,
            local: Arc::clone(&table_a),
            peer: Arc::downgrade(&table_b),
        };
        let end_b = Loopback {
            name: b,
            local: table_b,
            peer: Arc::downgrade(&table_a),
        };
        (end_a, end_b)
    }
}

impl Mailbox for Loopback {
    fn send(&self, msg: &Message) -> Result<()> {
        let peer = self.peer.upgrade().ok_or(IpmError::MailboxClosed)?;
        match peer.lookup(msg.channel()) {
            Some(callback) => {
                log::trace!("{}: send {:?} op {}", self.name, msg.channel(), msg.operation);
                callback(msg.clone());
            }
            None => {
                // Hardware behaves the same: the record lands with nobody listening.
                log::warn!("{}: no receiver for {:?}, record dropped", self.name, msg.channel());
            }
        }
        Ok(())
    }

    fn register_callback(&self, channel: Option<ChannelId>, callback: ReceiveCallback) {
        self.local.register(channel, callback);
    }
}
