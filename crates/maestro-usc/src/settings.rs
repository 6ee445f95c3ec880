//! Translation between [`UscSettings`] and raw parameter values.
//!
//! The write path returns a fully validated, ordered list of parameter writes; nothing is
//! sent from here. The read path is its inverse and pulls one parameter at a time through a
//! caller-supplied reader.

use crate::error::{Diagnostic, Result, ValidationError};
use crate::params::{Parameter, ParameterWrite, ServoAttribute, POSITION_MAX};
use crate::types::{ChannelMode, ChannelSetting, HomeMode, SerialMode, UscSettings};
use crate::variant::DeviceVariant;

/// The controller's instruction clock.
pub const INSTRUCTION_FREQUENCY: u32 = 12_000_000;

/// Serial device number used when the configured one does not fit 7 bits.
pub const DEFAULT_SERIAL_DEVICE_NUMBER: u8 = 12;

/// Raw home values below this are the Off/Ignore sentinels.
const HOME_GOTO_MIN: u16 = 2;

pub fn exponential_speed_to_normal(raw: u8) -> u16 {
    let mantissa = u16::from(raw >> 3);
    let exponent = raw & 7;
    mantissa << exponent
}

/// Encode a speed as 5-bit mantissa / 3-bit exponent. Lossy; saturates at 0xFF.
pub fn normal_speed_to_exponential(speed: u16) -> u8 {
    let mut mantissa = speed;
    for exponent in 0..=7u8 {
        if mantissa < 32 {
            return exponent + ((mantissa as u8) << 3);
        }
        mantissa >>= 1;
    }
    0xFF
}

/// Baud rate to SPBRG register value; 0 (autodetect) maps to 0.
pub fn bps_to_spbrg(bps: u32) -> i64 {
    if bps == 0 {
        return 0;
    }
    let bps = i64::from(bps);
    (i64::from(INSTRUCTION_FREQUENCY) - bps / 2) / bps
}

pub fn spbrg_to_bps(spbrg: u16) -> u32 {
    if spbrg == 0 {
        return 0;
    }
    let divisor = u32::from(spbrg) + 1;
    (INSTRUCTION_FREQUENCY + divisor / 2) / divisor
}

/// Multiplier as stored by the device: `multiplier - 1`, clamped to a byte.
pub fn multiplier_to_raw(multiplier: u16) -> u16 {
    multiplier.clamp(1, 256) - 1
}

pub fn position_to_microseconds(position: u16) -> f64 {
    f64::from(position) / 4.0
}

pub fn microseconds_to_position(us: f64) -> u16 {
    (us * 4.0).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

pub fn period_to_microseconds(period: u8, servos_available: u8) -> f64 {
    f64::from(period) * 256.0 * f64::from(servos_available) / 12.0
}

pub fn microseconds_to_period(us: f64, servos_available: u8) -> u8 {
    if servos_available == 0 {
        return 0;
    }
    (us / 256.0 * 12.0 / f64::from(servos_available))
        .round()
        .clamp(0.0, f64::from(u8::MAX)) as u8
}

/// Raw home parameter for a channel. Input channels have no home position.
pub fn home_to_raw(setting: &ChannelSetting, channel: u8) -> Result<i64> {
    let mode = if setting.mode == ChannelMode::Input {
        HomeMode::Ignore
    } else {
        setting.home_mode
    };
    match mode {
        HomeMode::Off => Ok(0),
        HomeMode::Ignore => Ok(1),
        HomeMode::Goto if setting.home < HOME_GOTO_MIN => {
            Err(ValidationError::OutOfRange {
                parameter: Parameter::servo(ServoAttribute::Home, channel)?,
                value: i64::from(setting.home),
                min: HOME_GOTO_MIN,
                max: POSITION_MAX,
            }
            .into())
        }
        HomeMode::Goto => Ok(i64::from(setting.home)),
    }
}

pub fn raw_to_home(raw: u16) -> (HomeMode, u16) {
    match raw {
        0 => (HomeMode::Off, 0),
        1 => (HomeMode::Ignore, 0),
        v => (HomeMode::Goto, v),
    }
}

/// Build the ordered, validated parameter writes for `settings`.
///
/// `settings` must already hold exactly one entry per channel (see [`fix_settings`]).
pub fn encode_settings(
    settings: &UscSettings,
    variant: &DeviceVariant,
) -> Result<Vec<ParameterWrite>> {
    let expected = usize::from(variant.servo_count);
    if settings.channels.len() != expected {
        return Err(ValidationError::ChannelCount {
            expected,
            actual: settings.channels.len(),
        }
        .into());
    }

    let mut out = Vec::new();
    let mut put = |p: Parameter, v: i64| -> Result<()> {
        out.push(ParameterWrite::new(p, v)?);
        Ok(())
    };

    put(Parameter::SERIAL_MODE, settings.serial_mode as i64)?;
    put(
        Parameter::SERIAL_FIXED_BAUD_RATE,
        bps_to_spbrg(settings.fixed_baud_rate),
    )?;
    put(Parameter::SERIAL_ENABLE_CRC, i64::from(settings.enable_crc))?;
    put(Parameter::SERIAL_NEVER_SUSPEND, i64::from(settings.never_suspend))?;
    put(
        Parameter::SERIAL_DEVICE_NUMBER,
        i64::from(settings.serial_device_number),
    )?;
    put(Parameter::SERIAL_MINI_SSC_OFFSET, i64::from(settings.mini_ssc_offset))?;
    put(Parameter::SERIAL_TIMEOUT, i64::from(settings.serial_timeout))?;
    put(Parameter::SCRIPT_DONE, i64::from(settings.script_done))?;

    if variant.is_compact() {
        put(Parameter::SERVOS_AVAILABLE, i64::from(settings.servos_available))?;
        put(Parameter::SERVO_PERIOD, i64::from(settings.servo_period))?;
    } else {
        put(
            Parameter::MINI_SERVO_PERIOD_L,
            i64::from(settings.mini_servo_period & 0xFF),
        )?;
        put(
            Parameter::MINI_SERVO_PERIOD_HU,
            i64::from(settings.mini_servo_period >> 8),
        )?;
        put(
            Parameter::SERVO_MULTIPLIER,
            i64::from(multiplier_to_raw(settings.servo_multiplier)),
        )?;
    }

    if variant.has_pullups() {
        put(Parameter::ENABLE_PULLUPS, i64::from(settings.enable_pullups))?;
    }

    for (channel, setting) in (0u8..).zip(&settings.channels) {
        let servo = |attr| Parameter::servo(attr, channel);
        put(servo(ServoAttribute::Home)?, home_to_raw(setting, channel)?)?;
        put(servo(ServoAttribute::Min)?, i64::from(setting.minimum / 64))?;
        put(servo(ServoAttribute::Max)?, i64::from(setting.maximum / 64))?;
        put(servo(ServoAttribute::Neutral)?, i64::from(setting.neutral))?;
        put(servo(ServoAttribute::Range)?, i64::from(setting.range / 127))?;
        put(
            servo(ServoAttribute::Speed)?,
            i64::from(normal_speed_to_exponential(setting.speed)),
        )?;
        put(
            servo(ServoAttribute::Acceleration)?,
            i64::from(setting.acceleration),
        )?;
    }

    let modes: Vec<ChannelMode> = settings.channels.iter().map(|c| c.mode).collect();
    let layout = variant.layout;
    for (&p, raw) in layout.mode_parameters().iter().zip(layout.encode_modes(&modes)?) {
        put(p, i64::from(raw))?;
    }

    Ok(out)
}

/// Rebuild settings from the device, reading one parameter at a time through `read`.
pub fn decode_settings<F>(variant: &DeviceVariant, mut read: F) -> Result<UscSettings>
where
    F: FnMut(Parameter) -> Result<u16>,
{
    let mut settings = UscSettings::default();

    let raw_mode = read(Parameter::SERIAL_MODE)?;
    settings.serial_mode = SerialMode::from_raw(raw_mode).unwrap_or_else(|| {
        tracing::warn!(raw_mode, "device reported unknown serial mode");
        SerialMode::default()
    });
    settings.fixed_baud_rate = spbrg_to_bps(read(Parameter::SERIAL_FIXED_BAUD_RATE)?);
    settings.enable_crc = read(Parameter::SERIAL_ENABLE_CRC)? != 0;
    settings.never_suspend = read(Parameter::SERIAL_NEVER_SUSPEND)? != 0;
    settings.serial_device_number = read(Parameter::SERIAL_DEVICE_NUMBER)? as u8;
    settings.mini_ssc_offset = read(Parameter::SERIAL_MINI_SSC_OFFSET)? as u8;
    settings.serial_timeout = read(Parameter::SERIAL_TIMEOUT)?;
    settings.script_done = read(Parameter::SCRIPT_DONE)? != 0;

    if variant.is_compact() {
        settings.servos_available = read(Parameter::SERVOS_AVAILABLE)? as u8;
        settings.servo_period = read(Parameter::SERVO_PERIOD)? as u8;
    } else {
        let upper = u32::from(read(Parameter::MINI_SERVO_PERIOD_HU)?) << 8;
        settings.mini_servo_period = upper | u32::from(read(Parameter::MINI_SERVO_PERIOD_L)?);
        settings.servo_multiplier = read(Parameter::SERVO_MULTIPLIER)? + 1;
    }

    if variant.has_pullups() {
        settings.enable_pullups = read(Parameter::ENABLE_PULLUPS)? != 0;
    }

    let layout = variant.layout;
    let raw_modes = layout
        .mode_parameters()
        .iter()
        .map(|&p| read(p))
        .collect::<Result<Vec<u16>>>()?;
    let modes = layout.decode_modes(&raw_modes, variant.servo_count)?;

    for (channel, mode) in (0u8..).zip(modes) {
        let mut servo = |attr| -> Result<u16> { read(Parameter::servo(attr, channel)?) };
        let (home_mode, home) = raw_to_home(servo(ServoAttribute::Home)?);
        let minimum = 64 * servo(ServoAttribute::Min)?;
        let maximum = 64 * servo(ServoAttribute::Max)?;
        let neutral = servo(ServoAttribute::Neutral)?;
        let range = 127 * servo(ServoAttribute::Range)?;
        let speed = exponential_speed_to_normal(servo(ServoAttribute::Speed)? as u8);
        let acceleration = servo(ServoAttribute::Acceleration)? as u8;
        settings.channels.push(ChannelSetting {
            name: String::new(),
            mode,
            home_mode,
            home,
            minimum,
            maximum,
            neutral,
            range,
            speed,
            acceleration,
        });
    }

    Ok(settings)
}

/// Bring `settings` in line with what `variant` can hold.
///
/// The channel list is truncated or padded to the device's channel count, Input and Output
/// channels get their fixed limits, and an out-of-range serial device number is reset.
pub fn fix_settings(
    mut settings: UscSettings,
    variant: &DeviceVariant,
) -> (UscSettings, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let supported = usize::from(variant.servo_count);
    let provided = settings.channels.len();

    if provided > supported {
        diagnostics.push(Diagnostic::ChannelsTruncated { provided, supported });
        settings.channels.truncate(supported);
    }

    if provided < supported {
        diagnostics.push(Diagnostic::ChannelsPadded { provided, supported });
        while settings.channels.len() < supported {
            let mut cs = ChannelSetting::default();
            if variant.is_compact()
                && usize::from(settings.servos_available) <= settings.channels.len()
            {
                cs.mode = ChannelMode::Input;
            }
            settings.channels.push(cs);
        }
    }

    for cs in &mut settings.channels {
        match cs.mode {
            ChannelMode::Input => {
                cs.home_mode = HomeMode::Ignore;
                cs.minimum = 0;
                cs.maximum = 1024;
                cs.speed = 0;
                cs.acceleration = 0;
                cs.neutral = 1024;
                cs.range = 1905;
            }
            ChannelMode::Output => {
                cs.minimum = 3986;
                cs.maximum = 8000;
                cs.speed = 0;
                cs.acceleration = 0;
                cs.neutral = 6000;
                cs.range = 1905;
            }
            ChannelMode::Servo | ChannelMode::ServoMultiplied => {}
        }
    }

    if settings.serial_device_number >= 128 {
        diagnostics.push(Diagnostic::SerialDeviceNumberClamped {
            provided: settings.serial_device_number,
        });
        settings.serial_device_number = DEFAULT_SERIAL_DEVICE_NUMBER;
    }

    for d in &diagnostics {
        tracing::warn!("{d}");
    }
    (settings, diagnostics)
}
