// corebridge — Host Core Task
//
// The coordinator side of the mailbox. Commands become synchronous requests
// through one call site; everything else that arrives is an event and is
// forwarded to the host task over an mpsc channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use crate::config::*;
use crate::error::Result;
use crate::events::HostEvent;
use crate::ipm::message::{ClassifierData, ClassifierOp, SensorChannel, SensorData, SensorOp};
use crate::ipm::{CallSite, Mailbox, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Init,
    Start,
    Stop,
    /// Toggle logging of accelerometer readings.
    Print,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierCommand {
    Init,
    LearnTest { vector: [u8; 4], category: u16 },
    ClassifyTest { vector: [u8; 4] },
    Learn { category: u16 },
    Classify,
    Read,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    PrintReadings(bool),
    Category(u16),
    Neurons(usize),
}

pub struct HostCore {
    site: Arc<CallSite>,
    print_readings: Arc<AtomicBool>,
    timeout_ticks: u32,
}

impl HostCore {
    /// Hook the receive path of `mailbox`: replies complete the call in
    /// flight, every other record goes to `events`.
    pub fn attach(mailbox: Arc<dyn Mailbox>, events: Sender<HostEvent>) -> Self {
        Self::with_site(Arc::new(CallSite::new(Arc::clone(&mailbox))), mailbox, events)
    }

    pub fn with_site(site: Arc<CallSite>, mailbox: Arc<dyn Mailbox>, events: Sender<HostEvent>) -> Self {
        let print_readings = Arc::new(AtomicBool::new(false));

        let receiver = Arc::clone(&site);
        let print = Arc::clone(&print_readings);
        mailbox.register_callback(
            None,
            Arc::new(move |msg: Message| {
                let Some(event) = receiver.complete(msg) else { return };
                let event = HostEvent::from(event);
                if let HostEvent::Reading { channel: SensorChannel::AccelXyz, .. } = &event {
                    if print.load(Ordering::Relaxed) {
                        log::info!("{}", event.describe());
                    }
                }
                if let HostEvent::Unsupported(msg) = &event {
                    log::warn!("unsupported message received ({:?})", msg.channel());
                }
                // The host task may be gone during shutdown.
                let _ = events.send(event);
            }),
        );

        Self {
            site,
            print_readings,
            timeout_ticks: IPM_TIMEOUT_TICKS,
        }
    }

    pub fn with_timeout(mut self, ticks: u32) -> Self {
        self.timeout_ticks = ticks;
        self
    }

    pub fn printing(&self) -> bool {
        self.print_readings.load(Ordering::Relaxed)
    }

    /// Send `request` and wait for its reply.
    pub fn call(&self, request: Message) -> Result<Message> {
        let channel = request.channel();
        self.site
            .call(request, self.timeout_ticks)
            .inspect_err(|e| log::error!("{:?} request failed: {}", channel, e))
    }

    pub fn sensor(&self, command: SensorCommand) -> Result<Outcome> {
        let mut data = SensorData::new(SensorChannel::AccelXyz, IMU_DEVICE_NAME);
        let op = match command {
            SensorCommand::Init => SensorOp::Init,
            SensorCommand::Start => {
                data.frequency = DEFAULT_SAMPLING_FREQ;
                SensorOp::Start
            }
            SensorCommand::Stop => SensorOp::Stop,
            SensorCommand::Print => {
                let now = !self.print_readings.fetch_xor(true, Ordering::Relaxed);
                return Ok(Outcome::PrintReadings(now));
            }
        };
        self.call(Message::request(op, data))?;
        Ok(Outcome::Done)
    }

    pub fn classifier(&self, command: ClassifierCommand) -> Result<Outcome> {
        let (op, data) = match command {
            ClassifierCommand::Init => (ClassifierOp::Init, ClassifierData::default()),
            ClassifierCommand::LearnTest { vector, category } => {
                (ClassifierOp::LearnTest, ClassifierData::with_vector(&vector, category))
            }
            ClassifierCommand::ClassifyTest { vector } => {
                (ClassifierOp::ClassifyTest, ClassifierData::with_vector(&vector, 0))
            }
            ClassifierCommand::Learn { category } => (
                ClassifierOp::LearnImu,
                ClassifierData { category, ..ClassifierData::default() },
            ),
            ClassifierCommand::Classify => (ClassifierOp::ClassifyImu, ClassifierData::default()),
            ClassifierCommand::Read => (ClassifierOp::ReadNeurons, ClassifierData::default()),
            ClassifierCommand::Stop => (ClassifierOp::Stop, ClassifierData::default()),
        };

        let reply = self.call(Message::request(op, data))?;
        let data = reply.classifier().cloned().unwrap_or_default();
        Ok(match op {
            ClassifierOp::ClassifyTest => {
                log::info!("classify category={}", data.category);
                Outcome::Category(data.category)
            }
            ClassifierOp::LearnTest | ClassifierOp::ReadNeurons => Outcome::Neurons(data.count),
            _ => Outcome::Done,
        })
    }
}

/// Host event loop: bring the sensor core up, then log events until the
/// compute side hangs up.
pub fn host_task(host: HostCore, events: Receiver<HostEvent>) {
    log::info!("Host task started");

    let boot = [
        ("sensor init", host.sensor(SensorCommand::Init)),
        ("pme init", host.classifier(ClassifierCommand::Init)),
        ("sensor start", host.sensor(SensorCommand::Start)),
    ];
    for (step, result) in boot {
        if let Err(e) = result {
            log::error!("{} failed: {}", step, e);
        }
    }

    for event in events {
        match event {
            HostEvent::Reading { channel: SensorChannel::AccelXyz, .. } => {}
            other => log::debug!("{}", other.describe()),
        }
    }
    log::warn!("Event channel closed, exiting host task");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::error::{ErrorCode, IpmError};
    use crate::ipm::message::MessageKind;
    use crate::ipm::Loopback;

    /// Host wired to a peer that answers inline through `respond`.
    fn rig<F>(respond: F) -> (HostCore, Receiver<HostEvent>, Arc<Loopback>)
    where
        F: Fn(&Loopback, Message) + Send + Sync + 'static,
    {
        let (host_end, compute_end) = Loopback::pair("host", "compute");
        let host_end: Arc<dyn Mailbox> = Arc::new(host_end);
        let compute_end = Arc::new(compute_end);
        let peer = Arc::clone(&compute_end);
        compute_end.register_callback(None, Arc::new(move |msg: Message| respond(peer.as_ref(), msg)));

        let (tx, rx) = mpsc::channel();
        let site = Arc::new(CallSite::new(Arc::clone(&host_end)).with_tick(Duration::from_millis(1)));
        let host = HostCore::with_site(site, host_end, tx).with_timeout(20);
        (host, rx, compute_end)
    }

    fn echo(peer: &Loopback, mut msg: Message) {
        if let crate::ipm::Payload::Classifier(data) = &mut msg.payload {
            data.category = 7;
            data.count = 2;
        }
        msg.mark_reply();
        peer.send(&msg).unwrap();
    }

    #[test]
    fn start_uses_default_frequency() {
        let (host, _rx, _peer) = rig(|peer, mut msg| {
            assert_eq!(msg.kind, MessageKind::SyncRequest);
            assert_eq!(msg.sensor().unwrap().frequency, DEFAULT_SAMPLING_FREQ);
            assert_eq!(msg.sensor().unwrap().controller, IMU_DEVICE_NAME);
            msg.mark_reply();
            peer.send(&msg).unwrap();
        });
        assert_eq!(host.sensor(SensorCommand::Start).unwrap(), Outcome::Done);
    }

    #[test]
    fn print_toggles_without_a_request() {
        let (host, _rx, _peer) = rig(|_, _| panic!("print must stay local"));
        assert_eq!(host.sensor(SensorCommand::Print).unwrap(), Outcome::PrintReadings(true));
        assert!(host.printing());
        assert_eq!(host.sensor(SensorCommand::Print).unwrap(), Outcome::PrintReadings(false));
    }

    #[test]
    fn classify_test_returns_the_category() {
        let (host, _rx, _peer) = rig(echo);
        let outcome = host
            .classifier(ClassifierCommand::ClassifyTest { vector: [1, 2, 3, 4] })
            .unwrap();
        assert_eq!(outcome, Outcome::Category(7));
        assert_eq!(host.classifier(ClassifierCommand::Read).unwrap(), Outcome::Neurons(2));
    }

    #[test]
    fn silent_peer_times_out() {
        let (host, _rx, _peer) = rig(|_, _| {});
        let err = host.classifier(ClassifierCommand::Init).unwrap_err();
        assert_eq!(err, IpmError::Timeout { ticks: 20 });
        assert_eq!(err.code(), ErrorCode::OperationFailed);
    }

    #[test]
    fn unsolicited_records_reach_the_event_channel() {
        let (host, rx, peer) = rig(echo);
        let mut data = SensorData::new(SensorChannel::Temp, IMU_DEVICE_NAME);
        data.reading = crate::ipm::message::SensorReading::Scalar(21.5);
        peer.send(&Message::request(SensorOp::EventReadingChange, data)).unwrap();

        match rx.try_recv().unwrap() {
            HostEvent::Reading { channel, .. } => assert_eq!(channel, SensorChannel::Temp),
            other => panic!("unexpected event {:?}", other),
        }
        drop(host);
    }
}
