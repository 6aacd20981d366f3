// corebridge — Character LCD Handler

use crate::config::{LCD_DEVICE_NAME, LCD_MAX_TEXT};
use crate::drivers::Devices;
use crate::error::{IpmError, Result};
use crate::ipm::message::{ChannelId, LcdData, LcdOp};

use super::decode;

#[derive(Debug, Default)]
pub struct LcdHandler;

/// Cut `text` to at most `LCD_MAX_TEXT` bytes on a character boundary.
fn clip(text: &str) -> &str {
    if text.len() <= LCD_MAX_TEXT {
        return text;
    }
    let mut end = LCD_MAX_TEXT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl LcdHandler {
    pub fn handle(&mut self, operation: u32, data: &mut LcdData, devices: &mut Devices) -> Result<()> {
        let op = decode::<LcdOp>(ChannelId::Lcd, operation)?;

        if op == LcdOp::Init {
            if devices.lcd.is_none() {
                let lcd = devices.binder().bind_lcd(LCD_DEVICE_NAME).ok_or_else(|| {
                    log::error!("Grove LCD device not found");
                    IpmError::DeviceUnbound(LCD_DEVICE_NAME)
                })?;
                devices.lcd = Some(lcd);
                log::info!("Grove LCD initialized");
            }
            return Ok(());
        }

        let lcd = devices.lcd()?;
        match op {
            LcdOp::Print => {
                let text = data.text.as_deref().ok_or_else(|| {
                    log::error!("lcd print without text");
                    IpmError::InvalidParameter("missing text".into())
                })?;
                let text = clip(text);
                lcd.print(text);
                log::debug!("Grove LCD print: {}", text);
            }
            LcdOp::Clear => lcd.clear(),
            LcdOp::SetCursorPos => lcd.set_cursor(data.col, data.row),
            LcdOp::SetColor => lcd.set_color(data.color),
            LcdOp::SelectColor => lcd.select_color(data.value),
            LcdOp::SetFunction => lcd.set_function(data.value),
            LcdOp::GetFunction => data.value = lcd.function(),
            LcdOp::SetDisplayState => lcd.set_display_state(data.value),
            LcdOp::GetDisplayState => data.value = lcd.display_state(),
            LcdOp::SetInputState => lcd.set_input_state(data.value),
            LcdOp::GetInputState => data.value = lcd.input_state(),
            LcdOp::Init => {}
        }
        Ok(())
    }
}
