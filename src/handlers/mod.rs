// corebridge — Message Dispatcher (compute core)
//
// Routes each queued message to the handler of its channel and turns the
// handler's result into the reply record. Every request gets exactly one
// reply: success, or an error reply carrying the wire code. Channels left
// out of `CoreConfig::channels` have no handler and answer NOT_SUPPORTED.

pub mod aio;
pub mod classifier;
pub mod i2c;
pub mod lcd;
pub mod sensor;

use crate::config::CoreConfig;
use crate::drivers::Devices;
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, Message, Payload};
use crate::pme::PatternClassifier;

pub use aio::AioHandler;
pub use classifier::ClassifierHandler;
pub use i2c::I2cHandler;
pub use lcd::LcdHandler;
pub use sensor::SensorHandler;

/// Decode a raw operation code for `channel`.
pub(crate) fn decode<Op>(channel: ChannelId, operation: u32) -> Result<Op>
where
    Op: TryFrom<u32, Error = u32>,
{
    Op::try_from(operation).map_err(|operation| {
        log::error!("unsupported {:?} message type {}", channel, operation);
        IpmError::NotSupported { channel, operation }
    })
}

pub struct Dispatcher {
    devices: Devices,
    aio: Option<AioHandler>,
    i2c: Option<I2cHandler>,
    lcd: Option<LcdHandler>,
    sensor: Option<SensorHandler>,
    classifier: Option<ClassifierHandler>,
    aio_update_interval: u32,
}

impl Dispatcher {
    pub fn new(config: &CoreConfig, devices: Devices, engine: Box<dyn PatternClassifier>) -> Self {
        let enabled = |channel| config.has_channel(channel);
        Self {
            devices,
            aio: enabled(ChannelId::Aio).then(AioHandler::default),
            i2c: enabled(ChannelId::I2c).then(I2cHandler::default),
            lcd: enabled(ChannelId::Lcd).then(LcdHandler::default),
            sensor: enabled(ChannelId::Sensor).then(|| SensorHandler::new(config)),
            classifier: enabled(ChannelId::Classifier).then(|| ClassifierHandler::new(engine)),
            aio_update_interval: config.aio_update_interval.max(1),
        }
    }

    pub fn devices(&mut self) -> &mut Devices {
        &mut self.devices
    }

    pub fn classifier(&self) -> Option<&ClassifierHandler> {
        self.classifier.as_ref()
    }

    /// Process one request and return its reply.
    pub fn dispatch(&mut self, mut msg: Message) -> Message {
        let channel = msg.channel();
        let operation = msg.operation;
        let token = msg.token;
        let devices = &mut self.devices;

        let result = match &mut msg.payload {
            Payload::Aio(data) => match self.aio.as_mut() {
                Some(handler) => handler.handle(operation, token, data, devices),
                None => Err(IpmError::ChannelNotRegistered(channel)),
            },
            Payload::I2c(data) => match self.i2c.as_mut() {
                Some(handler) => handler.handle(operation, data, devices),
                None => Err(IpmError::ChannelNotRegistered(channel)),
            },
            Payload::Lcd(data) => match self.lcd.as_mut() {
                Some(handler) => handler.handle(operation, data, devices),
                None => Err(IpmError::ChannelNotRegistered(channel)),
            },
            Payload::Sensor(data) => match self.sensor.as_mut() {
                Some(handler) => handler.handle(operation, data, devices),
                None => Err(IpmError::ChannelNotRegistered(channel)),
            },
            Payload::Classifier(data) => match self.classifier.as_mut() {
                Some(handler) => handler.handle(operation, data),
                None => Err(IpmError::ChannelNotRegistered(channel)),
            },
        };

        match result {
            Ok(()) => {
                log::debug!("{:?} op {} ok", channel, operation);
                msg.mark_reply();
            }
            Err(e) => {
                if matches!(e, IpmError::ChannelNotRegistered(_)) {
                    log::error!("unsupported ipm message id {:?}", channel);
                } else {
                    log::warn!("{:?} op {} failed: {}", channel, operation, e);
                }
                msg.mark_error(e.code());
            }
        }
        msg
    }

    /// Periodic work for `tick`: sensor triggers, the sample pipeline, polled
    /// channels and AIO subscriptions. Returns the events to send.
    pub fn poll(&mut self, tick: u32) -> Vec<Message> {
        let mut events = Vec::new();

        if let Some(sensor) = self.sensor.as_mut() {
            let serviced = sensor.service_triggers(&mut self.devices);
            if let Some(classifier) = self.classifier.as_mut() {
                for triple in serviced.raw_accel {
                    classifier.feed(triple);
                }
            }
            events.extend(serviced.events.into_iter().map(SensorHandler::event));
            events.extend(
                sensor
                    .poll(tick, &mut self.devices)
                    .into_iter()
                    .map(SensorHandler::event),
            );
        }

        if tick % self.aio_update_interval == 0 {
            if let Some(aio) = self.aio.as_mut() {
                events.extend(aio.updates(&mut self.devices));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::SimBoard;
    use crate::error::ErrorCode;
    use crate::ipm::message::{
        AioData, AioOp, ClassifierData, ClassifierOp, LcdData, LcdOp, MessageKind,
    };
    use crate::pme::SoftClassifier;

    fn dispatcher(config: &CoreConfig) -> (SimBoard, Dispatcher) {
        let board = SimBoard::new();
        let devices = Devices::new(Box::new(board.clone()));
        let dispatcher = Dispatcher::new(config, devices, Box::new(SoftClassifier::new()));
        (board, dispatcher)
    }

    #[test]
    fn success_reply_has_no_error() {
        let (board, mut dispatcher) = dispatcher(&CoreConfig::default());
        board.set_pin(12, 777);
        let reply = dispatcher.dispatch(Message::request(AioOp::PinRead, AioData { pin: 12, value: 0 }));
        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.error, ErrorCode::None);
        assert_eq!(reply.aio().unwrap().value, 777);
    }

    #[test]
    fn unregistered_channel_is_not_supported() {
        let config = CoreConfig::with_channels(&[ChannelId::Aio]);
        let (_board, mut dispatcher) = dispatcher(&config);
        let reply = dispatcher.dispatch(Message::request(LcdOp::Init, LcdData::default()));
        assert_eq!(reply.kind, MessageKind::ErrorReply);
        assert_eq!(reply.error, ErrorCode::NotSupported);
    }

    #[test]
    fn unknown_operation_is_not_supported() {
        let (_board, mut dispatcher) = dispatcher(&CoreConfig::default());
        let reply = dispatcher.dispatch(Message::request(0x42u32, ClassifierData::default()));
        assert_eq!(reply.error, ErrorCode::NotSupported);
    }

    #[test]
    fn handler_errors_become_error_replies() {
        let (_board, mut dispatcher) = dispatcher(&CoreConfig::default());
        let reply = dispatcher.dispatch(Message::request(AioOp::PinRead, AioData { pin: 3, value: 0 }));
        assert_eq!(reply.kind, MessageKind::ErrorReply);
        assert_eq!(reply.error, ErrorCode::InvalidParameter);
    }

    #[test]
    fn reply_keeps_call_token() {
        let (_board, mut dispatcher) = dispatcher(&CoreConfig::default());
        let mut request = Message::request(ClassifierOp::Init, ClassifierData::default());
        request.kind = MessageKind::SyncRequest;
        request.token = Some(crate::ipm::message::CallToken(9));
        let reply = dispatcher.dispatch(request);
        assert_eq!(reply.token, Some(crate::ipm::message::CallToken(9)));
        assert!(reply.is_reply());
    }

    #[test]
    fn aio_updates_run_on_their_interval() {
        let (board, mut dispatcher) = dispatcher(&CoreConfig::default());
        dispatcher.dispatch(Message::request(AioOp::PinSubscribe, AioData { pin: 9, value: 0 }));
        board.set_pin(9, 100);

        assert!(dispatcher.poll(1).is_empty());
        let events = dispatcher.poll(200);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, u32::from(AioOp::PinEventValueChange));
    }
}
