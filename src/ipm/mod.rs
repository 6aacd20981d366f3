//! Inter-processor messaging: the record format, the mailbox capability, the
//! compute core's inbound slot queue and the host core's synchronous calls.

pub mod mailbox;
pub mod message;
pub mod queue;
pub mod sync_call;

pub use mailbox::{Loopback, Mailbox, ReceiveCallback};
pub use message::{CallToken, ChannelId, Message, MessageKind, Payload};
pub use queue::{InboundQueue, SlotQueue};
pub use sync_call::{CallSite, PendingCall};
