// corebridge — Inbound Slot Queue
//
// Fixed pool of message slots shared between the mailbox receive callback
// (producer, interrupt context) and the compute worker (consumer). Producers
// claim the first free slot from the head; the consumer walks every slot in
// index order and frees each one after its handler has replied. This is a
// slot pool, not a ring: ordering across slots follows which slot was free.

use std::sync::{Mutex, MutexGuard};

use crate::config::QUEUE_SIZE;
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, Message};

#[derive(Debug, Clone, Default)]
enum Slot {
    /// `DONE` sentinel.
    #[default]
    Free,
    Pending(Message),
}

pub struct SlotQueue<const N: usize> {
    slots: Mutex<[Slot; N]>,
}

/// The queue size used by the compute core.
pub type InboundQueue = SlotQueue<QUEUE_SIZE>;

impl<const N: usize> SlotQueue<N> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| Slot::Free)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [Slot; N]> {
        // A panicking handler never holds this lock, so the data is intact.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `msg` into the first free slot. Returns the slot index.
    ///
    /// When every slot is taken the message is dropped: no reply can be
    /// produced without a slot, so a synchronous caller only sees a timeout.
    pub fn enqueue(&self, msg: &Message) -> Result<usize> {
        let mut slots = self.lock();
        match slots.iter().position(|s| matches!(s, Slot::Free)) {
            Some(index) => {
                slots[index] = Slot::Pending(msg.clone());
                Ok(index)
            }
            None => {
                log::error!("inbound queue full, skipping {:?} message", msg.channel());
                Err(IpmError::QueueFull)
            }
        }
    }

    /// Process every pending slot in index order, then free it.
    ///
    /// The lock is released while `process` runs so the receive callback can
    /// keep claiming other slots. Returns the number of messages handled.
    pub fn drain<F>(&self, mut process: F) -> usize
    where
        F: FnMut(Message),
    {
        let mut handled = 0;
        for index in 0..N {
            let msg = match &self.lock()[index] {
                Slot::Pending(msg) => msg.clone(),
                Slot::Free => continue,
            };
            process(msg);
            self.lock()[index] = Slot::Free;
            handled += 1;
        }
        handled
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| matches!(s, Slot::Pending(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Channel held by each slot, `ChannelId::Done` for free slots.
    pub fn snapshot(&self) -> [ChannelId; N] {
        let slots = self.lock();
        std::array::from_fn(|i| match &slots[i] {
            Slot::Pending(msg) => msg.channel(),
            Slot::Free => ChannelId::Done,
        })
    }
}

impl<const N: usize> Default for SlotQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipm::message::{AioData, AioOp, SensorChannel, SensorData, SensorOp};

    fn aio(pin: u32) -> Message {
        Message::request(AioOp::PinRead, AioData { pin, value: 0 })
    }

    #[test]
    fn enqueue_up_to_capacity_retains_everything() {
        let queue = InboundQueue::new();
        for pin in 0..QUEUE_SIZE as u32 {
            assert_eq!(queue.enqueue(&aio(pin)).unwrap(), pin as usize);
        }
        assert!(queue.is_full());

        let mut pins = Vec::new();
        let handled = queue.drain(|msg| pins.push(msg.aio().unwrap().pin));
        assert_eq!(handled, QUEUE_SIZE);
        assert_eq!(pins, (0..QUEUE_SIZE as u32).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_leaves_contents_unchanged() {
        let queue = SlotQueue::<3>::new();
        for pin in 0..3 {
            queue.enqueue(&aio(pin)).unwrap();
        }
        let before = queue.snapshot();

        let extra = Message::request(SensorOp::Init, SensorData::new(SensorChannel::Temp, "bmi160"));
        assert_eq!(queue.enqueue(&extra), Err(IpmError::QueueFull));
        assert_eq!(queue.snapshot(), before);

        let mut seen = Vec::new();
        queue.drain(|msg| seen.push(msg.channel()));
        assert_eq!(seen, vec![ChannelId::Aio; 3]);
    }

    #[test]
    fn freed_slot_is_reused_from_the_head() {
        let queue = SlotQueue::<4>::new();
        queue.enqueue(&aio(1)).unwrap();
        queue.drain(|_| {});
        assert_eq!(queue.enqueue(&aio(2)).unwrap(), 0);
        assert_eq!(queue.enqueue(&aio(3)).unwrap(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_skips_free_gaps() {
        let queue = SlotQueue::<4>::new();
        queue.enqueue(&aio(1)).unwrap();
        queue.enqueue(&aio(2)).unwrap();
        queue.enqueue(&aio(3)).unwrap();

        // Free the middle slot only.
        queue.lock()[1] = Slot::Free;

        let mut pins = Vec::new();
        queue.drain(|msg| pins.push(msg.aio().unwrap().pin));
        assert_eq!(pins, vec![1, 3]);
    }

    #[test]
    fn producer_can_enqueue_while_draining() {
        let queue = SlotQueue::<2>::new();
        queue.enqueue(&aio(1)).unwrap();

        let mut late = None;
        queue.drain(|_| {
            if late.is_none() {
                late = Some(queue.enqueue(&aio(2)));
            }
        });
        assert_eq!(late, Some(Ok(1)));
        assert_eq!(queue.len(), 0);
    }
}
