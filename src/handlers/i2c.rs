// corebridge — I2C Handler
//
// Pass-through bus access for the host core. A bus must be opened before it
// can be used; `write_bit` and `transfer` are accepted but do nothing.

use crate::config::{MAX_I2C_BUS, MAX_I2C_TRANSFER};
use crate::drivers::{Devices, I2cBus};
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, I2cData, I2cOp};

use super::decode;

#[derive(Debug, Default)]
pub struct I2cHandler;

impl I2cHandler {
    pub fn handle(&mut self, operation: u32, data: &mut I2cData, devices: &mut Devices) -> Result<()> {
        let op = decode::<I2cOp>(ChannelId::I2c, operation)?;
        let bus = data.bus as usize;
        if bus >= MAX_I2C_BUS {
            log::error!("i2c bus {} out of range", data.bus);
            return Err(IpmError::InvalidParameter(format!("bus {} out of range", data.bus)));
        }

        let length = match op {
            I2cOp::Read | I2cOp::BurstRead => data.length,
            I2cOp::Write => data.data.len(),
            _ => 0,
        };
        if length > MAX_I2C_TRANSFER {
            log::error!("i2c transfer of {} bytes exceeds {}", length, MAX_I2C_TRANSFER);
            return Err(IpmError::InvalidParameter(format!(
                "transfer length {length} over {MAX_I2C_TRANSFER}"
            )));
        }

        match op {
            I2cOp::Open => {
                if devices.i2c[bus].is_none() {
                    let driver = devices.binder().bind_i2c(data.bus).ok_or_else(|| {
                        log::error!("failed to open i2c bus {}", data.bus);
                        IpmError::OperationFailed(format!("i2c bus {} unavailable", data.bus))
                    })?;
                    devices.i2c[bus] = Some(driver);
                }
            }
            I2cOp::Write => {
                opened(devices, data.bus)?.write(data.address, &data.data)?;
            }
            I2cOp::Read => {
                let mut buf = vec![0u8; data.length];
                opened(devices, data.bus)?.read(data.address, &mut buf)?;
                data.data = buf;
            }
            I2cOp::BurstRead => {
                let mut buf = vec![0u8; data.length];
                opened(devices, data.bus)?.burst_read(data.address, data.register, &mut buf)?;
                data.data = buf;
            }
            I2cOp::WriteBit => log::debug!("received i2c write_bit"),
            I2cOp::Transfer => log::debug!("received i2c transfer"),
        }
        Ok(())
    }
}

fn opened(devices: &mut Devices, bus: u8) -> Result<&mut (dyn I2cBus + 'static)> {
    devices.i2c[bus as usize].as_deref_mut().ok_or_else(|| {
        log::error!("i2c bus {} not opened", bus);
        IpmError::OperationFailed(format!("i2c bus {bus} not opened"))
    })
}
