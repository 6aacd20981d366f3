// corebridge — Host-Side Events
//
// Unsolicited records from the compute core, decoded for the host task.

use crate::ipm::message::{
    AioOp, CallToken, Message, Payload, SensorChannel, SensorOp, SensorReading,
};

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A sensor channel reported a changed reading.
    Reading {
        channel: SensorChannel,
        controller: String,
        /// ADC pin for light readings, 0 otherwise.
        pin: u32,
        reading: SensorReading,
    },
    /// A subscribed analog pin changed value.
    PinValueChange {
        pin: u32,
        value: u32,
        token: Option<CallToken>,
    },
    /// Anything the host has no use for.
    Unsupported(Message),
}

impl From<Message> for HostEvent {
    fn from(msg: Message) -> Self {
        let operation = msg.operation;
        match &msg.payload {
            Payload::Sensor(data) if operation == u32::from(SensorOp::EventReadingChange) => {
                HostEvent::Reading {
                    channel: data.channel,
                    controller: data.controller.clone(),
                    pin: data.pin,
                    reading: data.reading,
                }
            }
            Payload::Aio(data) if operation == u32::from(AioOp::PinEventValueChange) => {
                HostEvent::PinValueChange {
                    pin: data.pin,
                    value: data.value,
                    token: msg.token,
                }
            }
            _ => HostEvent::Unsupported(msg),
        }
    }
}

impl HostEvent {
    /// One-line rendering used by the reading printer.
    pub fn describe(&self) -> String {
        match self {
            HostEvent::Reading { reading: SensorReading::Xyz { x, y, z }, .. } => {
                format!("sensor val={:.6} {:.6} {:.6}", x, y, z)
            }
            HostEvent::Reading { channel, reading: SensorReading::Scalar(v), .. } => {
                format!("{:?} val={:.6}", channel, v)
            }
            HostEvent::PinValueChange { pin, value, .. } => format!("pin {} value={}", pin, value),
            HostEvent::Unsupported(msg) => {
                format!("unsupported {:?} message op {}", msg.channel(), msg.operation)
            }
        }
    }
}
