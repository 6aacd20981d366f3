// corebridge — Synchronous Call Facility (host core)
//
// A call site sends one `SyncRequest` at a time and parks the caller until
// the reply carrying the same `CallToken` arrives, or the timeout elapses.
// The receive path hands replies to `complete()`; anything that is not the
// awaited reply is returned to the caller of `complete()` as an event.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::TICK_DURATION;
use crate::error::{IpmError, Result};
use crate::ipm::mailbox::Mailbox;
use crate::ipm::message::{CallToken, Message, MessageKind};

#[derive(Default)]
struct ReplySlot {
    awaiting: Option<CallToken>,
    reply: Option<Message>,
}

pub struct CallSite {
    mailbox: Arc<dyn Mailbox>,
    /// Held for the whole call: one request in flight per site.
    serial: Mutex<()>,
    slot: Mutex<ReplySlot>,
    signal: Condvar,
    next_token: AtomicU32,
    tick: Duration,
}

impl CallSite {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            serial: Mutex::new(()),
            slot: Mutex::new(ReplySlot::default()),
            signal: Condvar::new(),
            next_token: AtomicU32::new(1),
            tick: TICK_DURATION,
        }
    }

    /// Override the length of one timeout tick.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn slot(&self) -> MutexGuard<'_, ReplySlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send `request` as a synchronous request and return the handle that
    /// resolves to its reply. Blocks while another call on this site is open.
    pub fn begin(&self, mut request: Message) -> Result<PendingCall<'_>> {
        let serial = self.serial.lock().unwrap_or_else(|e| e.into_inner());
        let token = CallToken(self.next_token.fetch_add(1, Ordering::Relaxed));

        {
            let mut slot = self.slot();
            slot.awaiting = Some(token);
            slot.reply = None;
        }

        request.kind = MessageKind::SyncRequest;
        request.token = Some(token);
        request.error = Default::default();

        let pending = PendingCall {
            site: self,
            token,
            _serial: serial,
        };
        self.mailbox.send(&request)?;
        Ok(pending)
    }

    /// Send `request` and wait up to `timeout_ticks` for its reply.
    pub fn call(&self, request: Message, timeout_ticks: u32) -> Result<Message> {
        self.begin(request)?.wait(timeout_ticks)
    }

    /// Receive-path hook. Returns the message back when it is not a reply to
    /// the call in flight, so the caller can treat it as an event.
    pub fn complete(&self, msg: Message) -> Option<Message> {
        let token = match (msg.is_reply(), msg.token) {
            (true, Some(token)) => token,
            _ => return Some(msg),
        };

        let mut slot = self.slot();
        if slot.awaiting == Some(token) {
            slot.reply = Some(msg);
            self.signal.notify_all();
        } else {
            log::warn!(
                "discarding stale {:?} reply (token {}, awaiting {:?})",
                msg.channel(),
                token.0,
                slot.awaiting
            );
        }
        None
    }

    fn abandon(&self, token: CallToken) {
        let mut slot = self.slot();
        if slot.awaiting == Some(token) {
            slot.awaiting = None;
            slot.reply = None;
        }
    }
}

/// A synchronous request on the wire, waiting for its reply.
pub struct PendingCall<'a> {
    site: &'a CallSite,
    token: CallToken,
    _serial: MutexGuard<'a, ()>,
}

impl PendingCall<'_> {
    pub fn token(&self) -> CallToken {
        self.token
    }

    /// Block until the reply arrives or `timeout_ticks` elapse.
    ///
    /// A timeout only abandons the wait; the peer may still act on the
    /// request. Its late reply is discarded by the call site.
    pub fn wait(self, timeout_ticks: u32) -> Result<Message> {
        let timeout = self.site.tick * timeout_ticks;
        let reply = {
            let slot = self.site.slot();
            let (mut slot, _) = self
                .site
                .signal
                .wait_timeout_while(slot, timeout, |s| s.reply.is_none())
                .unwrap_or_else(|e| e.into_inner());
            slot.awaiting = None;
            slot.reply.take()
        };

        match reply {
            None => {
                log::error!("ipm timed out after {} ticks (token {})", timeout_ticks, self.token.0);
                Err(IpmError::Timeout { ticks: timeout_ticks })
            }
            Some(reply) if reply.kind == MessageKind::ErrorReply => {
                Err(IpmError::Remote { code: reply.error })
            }
            Some(reply) => Ok(reply),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.site.abandon(self.token);
    }
}
