// corebridge — Compute Core Task
//
// Round-robin worker of the sensor core. Every tick it:
//   1. drains the inbound slot queue, replying to each request,
//   2. services raised sensor triggers (events + sample pipeline),
//   3. polls temperature/light on the sensor gate,
//   4. refreshes AIO subscriptions every `aio_update_interval` ticks,
// then sleeps for one tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::*;
use crate::drivers::Devices;
use crate::handlers::Dispatcher;
use crate::ipm::{InboundQueue, Mailbox, Message};
use crate::pme::PatternClassifier;

pub struct ComputeCore {
    queue: Arc<InboundQueue>,
    mailbox: Arc<dyn Mailbox>,
    dispatcher: Dispatcher,
    tick: u32,
}

fn send(mailbox: &dyn Mailbox, msg: &Message) {
    if let Err(e) = mailbox.send(msg) {
        log::error!("failed to send {:?} op {}: {}", msg.channel(), msg.operation, e);
    }
}

impl ComputeCore {
    pub fn new(
        config: &CoreConfig,
        mailbox: Arc<dyn Mailbox>,
        devices: Devices,
        engine: Box<dyn PatternClassifier>,
    ) -> Self {
        Self {
            queue: Arc::new(InboundQueue::new()),
            mailbox,
            dispatcher: Dispatcher::new(config, devices, engine),
            tick: 0,
        }
    }

    /// Route every incoming record into the slot queue. The callback only
    /// copies; all processing happens on the worker.
    pub fn attach(&self) {
        let queue = Arc::clone(&self.queue);
        self.mailbox.register_callback(
            None,
            Arc::new(move |msg: Message| {
                // A full queue drops the record; the sender times out.
                let _ = queue.enqueue(&msg);
            }),
        );
        log::info!("compute core listening ({} queue slots)", QUEUE_SIZE);
    }

    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    pub fn dispatcher(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    /// One pass of the worker loop. Returns the number of requests handled.
    pub fn run_once(&mut self) -> usize {
        let mailbox = self.mailbox.as_ref();
        let dispatcher = &mut self.dispatcher;
        let handled = self.queue.drain(|msg| {
            let reply = dispatcher.dispatch(msg);
            send(mailbox, &reply);
        });

        for event in self.dispatcher.poll(self.tick) {
            send(self.mailbox.as_ref(), &event);
        }

        self.tick = self.tick.wrapping_add(SLEEP_TICKS);
        handled
    }
}

/// Worker loop; returns once `shutdown` is raised. The core must already be
/// attached so nothing sent before the thread starts is lost.
pub fn compute_task(mut core: ComputeCore, shutdown: Arc<AtomicBool>) {
    log::info!("Compute task started");

    while !shutdown.load(Ordering::Relaxed) {
        core.run_once();
        thread::sleep(TICK_DURATION * SLEEP_TICKS);
    }
    log::info!("Compute task stopped after {} ticks", core.tick_count());
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::drivers::sim::SimBoard;
    use crate::drivers::SensorValue;
    use crate::error::ErrorCode;
    use crate::ipm::message::{
        AioData, AioOp, ClassifierData, ClassifierOp, MessageKind, SensorChannel, SensorData,
        SensorOp,
    };
    use crate::ipm::Loopback;
    use crate::pme::SoftClassifier;

    struct Rig {
        board: SimBoard,
        host: Loopback,
        core: ComputeCore,
        inbox: Arc<Mutex<Vec<Message>>>,
    }

    fn rig() -> Rig {
        let (host, compute) = Loopback::pair("host", "compute");
        let board = SimBoard::new();
        let core = ComputeCore::new(
            &CoreConfig::default(),
            Arc::new(compute),
            Devices::new(Box::new(board.clone())),
            Box::new(SoftClassifier::new()),
        );
        core.attach();

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        host.register_callback(None, Arc::new(move |msg: Message| sink.lock().unwrap().push(msg)));
        Rig { board, host, core, inbox }
    }

    impl Rig {
        fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.inbox.lock().unwrap())
        }
    }

    fn sensor(op: SensorOp, channel: SensorChannel) -> Message {
        let mut data = SensorData::new(channel, IMU_DEVICE_NAME);
        data.frequency = 100;
        Message::request(op, data)
    }

    #[test]
    fn every_queued_request_gets_one_reply() {
        let mut rig = rig();
        for pin in 9..=14 {
            rig.host
                .send(&Message::request(AioOp::Open, AioData { pin, value: 0 }))
                .unwrap();
        }
        assert_eq!(rig.core.run_once(), 6);

        let replies = rig.take();
        assert_eq!(replies.len(), 6);
        assert!(replies.iter().all(|r| r.kind == MessageKind::Reply));
        assert!(rig.core.queue().is_empty());
    }

    #[test]
    fn overflow_produces_no_reply() {
        let mut rig = rig();
        for _ in 0..QUEUE_SIZE + 2 {
            rig.host
                .send(&Message::request(ClassifierOp::Init, ClassifierData::default()))
                .unwrap();
        }
        assert_eq!(rig.core.run_once(), QUEUE_SIZE);
        assert_eq!(rig.take().len(), QUEUE_SIZE);
    }

    #[test]
    fn failures_are_replied_with_their_code() {
        let mut rig = rig();
        rig.host.send(&sensor(SensorOp::Start, SensorChannel::AccelXyz)).unwrap();
        rig.core.run_once();
        let replies = rig.take();
        assert_eq!(replies[0].kind, MessageKind::ErrorReply);
        assert_eq!(replies[0].error, ErrorCode::OperationFailed);
    }

    #[test]
    fn triggered_readings_become_events() {
        let mut rig = rig();
        rig.host.send(&sensor(SensorOp::Init, SensorChannel::AccelXyz)).unwrap();
        rig.host.send(&sensor(SensorOp::Start, SensorChannel::AccelXyz)).unwrap();
        rig.core.run_once();
        assert_eq!(rig.take().len(), 2);

        rig.board.set_accel([SensorValue::new(2, 0); 3]);
        assert!(rig.board.fire(SensorChannel::AccelXyz));
        rig.core.run_once();

        let events = rig.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MessageKind::Request);
        assert_eq!(events[0].operation, u32::from(SensorOp::EventReadingChange));
    }

    #[test]
    fn accelerometer_drives_imu_learning() {
        let mut rig = rig();
        rig.host.send(&sensor(SensorOp::Init, SensorChannel::AccelXyz)).unwrap();
        rig.host.send(&sensor(SensorOp::Start, SensorChannel::AccelXyz)).unwrap();
        let learn = ClassifierData { category: 5, ..ClassifierData::default() };
        rig.host.send(&Message::request(ClassifierOp::LearnImu, learn)).unwrap();
        rig.core.run_once();

        for i in 0..682 {
            rig.board.set_accel([SensorValue::new((i % 7) as i32, 0); 3]);
            rig.board.fire(SensorChannel::AccelXyz);
            rig.core.run_once();
        }

        let classifier = rig.core.dispatcher().classifier().unwrap();
        assert_eq!(classifier.engine().committed_count(), 1);
        assert_eq!(classifier.mode(), crate::pipeline::PipelineMode::Idle);
    }
}
