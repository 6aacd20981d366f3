// corebridge — Ambient Light Channel
//
// Grove light sensors hang off the analog pins. Each subscribed pin is read
// at the sensor poll gate; a change in the raw sample is reported in lux.

use crate::config::{aio_pin_index, AIO_PIN_COUNT, AIO_PIN_MIN};
use crate::drivers::Devices;
use crate::error::{IpmError, Result};

/// Raw samples above this (10-bit scale) saturate the sensor.
const SATURATION: u32 = 1015;
const MAX_LUX: f64 = 10_000.0;

/// Convert a 12-bit ADC sample to lux using the Grove photoresistor curve
/// `10000 / (((1023 - a) * 10 / a) * 15)^(4/3)` on the 10-bit value `a`.
pub fn lux_from_raw(raw: u32) -> f64 {
    let analog = raw >> 2;
    if analog > SATURATION {
        return MAX_LUX;
    }
    let analog = f64::from(analog);
    let resistance = (1023.0 - analog) * 10.0 / analog;
    let base = resistance * 15.0;
    MAX_LUX / base.powi(4).cbrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    pub pin: u32,
    pub lux: f64,
}

/// Per-pin subscription table.
#[derive(Debug, Default)]
pub struct LightPins {
    subscribed: [bool; AIO_PIN_COUNT],
    last_raw: [u32; AIO_PIN_COUNT],
}

impl LightPins {
    fn index(pin: u32) -> Result<usize> {
        aio_pin_index(pin).ok_or_else(|| {
            log::error!("light: pin #{} out of range", pin);
            IpmError::InvalidParameter(format!("pin {pin} out of range"))
        })
    }

    pub fn start(&mut self, pin: u32) -> Result<()> {
        let index = Self::index(pin)?;
        log::debug!("start ambient light {}", pin);
        self.subscribed[index] = true;
        Ok(())
    }

    pub fn stop(&mut self, pin: u32) -> Result<()> {
        let index = Self::index(pin)?;
        log::debug!("stop ambient light {}", pin);
        self.subscribed[index] = false;
        Ok(())
    }

    pub fn is_subscribed(&self, pin: u32) -> bool {
        aio_pin_index(pin).is_some_and(|i| self.subscribed[i])
    }

    /// Read every subscribed pin; report the ones whose raw value moved.
    pub fn poll(&mut self, devices: &mut Devices) -> Vec<LightSample> {
        let mut changed = Vec::new();
        for index in 0..AIO_PIN_COUNT {
            if !self.subscribed[index] {
                continue;
            }
            let pin = AIO_PIN_MIN + index as u32;
            let raw = match devices.read_pin(pin) {
                Ok(raw) => raw,
                Err(e) => {
                    log::error!("light: couldn't read pin {}: {}", pin, e);
                    continue;
                }
            };
            if raw != self.last_raw[index] {
                changed.push(LightSample {
                    pin,
                    lux: lux_from_raw(raw),
                });
            }
            self.last_raw[index] = raw;
        }
        changed
    }
}
