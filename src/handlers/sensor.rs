// corebridge — Sensor Handler
//
// SENSOR requests name the driver they are meant for. IMU channels must be
// addressed to the BMI160, light to the ADC; anything else is NOT_SUPPORTED.

use crate::config::{CoreConfig, ADC_DEVICE_NAME, IMU_DEVICE_NAME};
use crate::drivers::Devices;
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, Message, SensorChannel, SensorData, SensorOp};
use crate::sensors::{SensorManager, Serviced, TriggerState};

use super::decode;

/// Controller names are compared on the driver name's length only, so
/// `bmi160@0` still reaches the BMI160.
fn addressed_to(controller: &str, driver: &str) -> bool {
    controller.as_bytes().starts_with(driver.as_bytes())
}

pub struct SensorHandler {
    manager: SensorManager,
}

impl SensorHandler {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            manager: SensorManager::new(config),
        }
    }

    pub fn state(&self, channel: SensorChannel) -> TriggerState {
        self.manager.state(channel)
    }

    pub fn handle(&mut self, operation: u32, data: &mut SensorData, devices: &mut Devices) -> Result<()> {
        let driver = match data.channel {
            SensorChannel::AccelXyz | SensorChannel::GyroXyz | SensorChannel::Temp => IMU_DEVICE_NAME,
            SensorChannel::Light => ADC_DEVICE_NAME,
        };
        if !addressed_to(&data.controller, driver) {
            log::error!("unsupported sensor driver {:?}", data.controller);
            return Err(IpmError::NotSupported { channel: ChannelId::Sensor, operation });
        }

        match data.channel {
            SensorChannel::Light => self.handle_light(operation, data),
            _ => self.handle_imu(operation, data, devices),
        }
    }

    fn handle_imu(&mut self, operation: u32, data: &SensorData, devices: &mut Devices) -> Result<()> {
        match decode::<SensorOp>(ChannelId::Sensor, operation)? {
            SensorOp::Init => self.manager.init_imu(devices),
            SensorOp::Start => self.manager.start(devices, data.channel, data.frequency),
            SensorOp::Stop => self.manager.stop(devices, data.channel),
            SensorOp::EventReadingChange => {
                Err(IpmError::NotSupported { channel: ChannelId::Sensor, operation })
            }
        }
    }

    fn handle_light(&mut self, operation: u32, data: &SensorData) -> Result<()> {
        let light = self.manager.light();
        match decode::<SensorOp>(ChannelId::Sensor, operation)? {
            SensorOp::Init => Ok(()),
            SensorOp::Start => light.start(data.pin),
            SensorOp::Stop => light.stop(data.pin),
            SensorOp::EventReadingChange => {
                Err(IpmError::NotSupported { channel: ChannelId::Sensor, operation })
            }
        }
    }

    pub fn service_triggers(&mut self, devices: &mut Devices) -> Serviced {
        self.manager.service_triggers(devices)
    }

    pub fn poll(&mut self, tick: u32, devices: &mut Devices) -> Vec<SensorData> {
        self.manager.poll(tick, devices)
    }

    /// Wrap a reading in an unsolicited event record.
    pub fn event(data: SensorData) -> Message {
        Message::request(SensorOp::EventReadingChange, data)
    }
}
