// corebridge — Analog I/O Handler

use crate::config::{aio_pin_index, AIO_PIN_COUNT, AIO_PIN_MIN};
use crate::drivers::Devices;
use crate::error::{IpmError, Result};
use crate::ipm::message::{AioData, AioOp, CallToken, ChannelId, Message};

use super::decode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Subscription {
    /// Token of the subscribe request, echoed in value-change events.
    token: Option<CallToken>,
}

#[derive(Debug, Default)]
pub struct AioHandler {
    subscriptions: [Option<Subscription>; AIO_PIN_COUNT],
    last_values: [u32; AIO_PIN_COUNT],
}

impl AioHandler {
    pub fn handle(
        &mut self,
        operation: u32,
        token: Option<CallToken>,
        data: &mut AioData,
        devices: &mut Devices,
    ) -> Result<()> {
        let Some(index) = aio_pin_index(data.pin) else {
            log::error!("pin #{} out of range", data.pin);
            return Err(IpmError::InvalidParameter(format!("pin {} out of range", data.pin)));
        };

        let mut value = 0;
        match decode::<AioOp>(ChannelId::Aio, operation)? {
            AioOp::Open | AioOp::PinAbort | AioOp::PinClose => {}
            AioOp::PinRead => value = devices.read_pin(data.pin)?,
            AioOp::PinSubscribe => self.subscriptions[index] = Some(Subscription { token }),
            AioOp::PinUnsubscribe => self.subscriptions[index] = None,
            AioOp::PinEventValueChange => {
                return Err(IpmError::NotSupported { channel: ChannelId::Aio, operation })
            }
        }
        data.value = value;
        Ok(())
    }

    pub fn is_subscribed(&self, pin: u32) -> bool {
        aio_pin_index(pin).is_some_and(|i| self.subscriptions[i].is_some())
    }

    /// Read subscribed pins and build value-change events for the ones that
    /// moved since the last update.
    pub fn updates(&mut self, devices: &mut Devices) -> Vec<Message> {
        let mut events = Vec::new();
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            let Some(subscription) = subscription else { continue };
            let pin = AIO_PIN_MIN + index as u32;
            let value = match devices.read_pin(pin) {
                Ok(value) => value,
                Err(e) => {
                    log::error!("couldn't read from pin {}: {}", pin, e);
                    continue;
                }
            };
            if value != self.last_values[index] {
                let mut event = Message::request(AioOp::PinEventValueChange, AioData { pin, value });
                event.token = subscription.token;
                events.push(event);
            }
            self.last_values[index] = value;
        }
        events
    }
}
