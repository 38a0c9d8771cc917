use std::collections::HashMap;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::DateTime;
use chrono_tz::Tz;
use macaddr::MacAddr6;
use switchbot_relay::switchbot::{DeviceType, Mode, Reading};
use uuid::{Uuid, uuid};

#[derive(Debug, PartialEq)]
pub struct DecodedMeasurement {
    pub mode: Mode,
    pub temperature_celsius: f32,
    pub humidity_percent: u8,
}

// Ref: https://github.com/OpenWonderLabs/SwitchBotAPI-BLE/blob/2bd727ecf7c0898b25ac2df58a4886b5930c9138/README.md?plain=1#L44
const SWITCHBOT_MANUFACTURER_DATA_COMPANY_ID: u16 = 0x0969;

// Ref: https://github.com/OpenWonderLabs/SwitchBotAPI-BLE/blob/2bd727ecf7c0898b25ac2df58a4886b5930c9138/README.md?plain=1#L45
const SWITCHBOT_SERVICE_DATA_UUID: Uuid = uuid!("0000fd3d-0000-1000-8000-00805f9b34fb");

pub fn decode_switchbot_ble_data(
    mac: MacAddr6,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    service_data: &HashMap<Uuid, Vec<u8>>,
    measured_at: DateTime<Tz>,
) -> Result<Reading> {
    let switchbot_service_data = get_switch_bot_service_data(service_data)
        .context("failed to get SwitchBot service data")?;

    let device_type = detect_device_type(switchbot_service_data)
        .context("failed to detect SwitchBot device type")?;

    let measurement = match device_type {
        DeviceType::Meter => decode_meter_service_data(switchbot_service_data)
            .context("failed to decode SwitchBot service data")?,
        _ => {
            let switchbot_manufacturer_data = get_switch_bot_manufacturer_data(manufacturer_data)
                .context("failed to get SwitchBot manufacturer data")?;

            decode_manufacturer_data(&device_type, switchbot_manufacturer_data)
                .context("failed to decode SwitchBot manufacturer data")?
        }
    };

    Ok(Reading {
        mac,
        model: device_type,
        mode: measurement.mode,
        timestamp: measured_at,
        temperature_celsius: measurement.temperature_celsius,
        humidity_percent: measurement.humidity_percent,
    })
}

/// The original Meter carries its readings in the service data only.
pub fn decode_meter_service_data(service_data: &[u8]) -> Result<DecodedMeasurement> {
    if service_data.len() < 6 {
        bail!(
            "Meter service data too short: expected at least 6 bytes, got {}",
            service_data.len()
        )
    }

    decode_measurement([service_data[3], service_data[4]], service_data[5])
}

pub fn decode_manufacturer_data(
    device_type: &DeviceType,
    manufacturer_data: &[u8],
) -> Result<DecodedMeasurement> {
    let (min_len, temperature_index, humidity_index) = match device_type {
        DeviceType::Meter => bail!("Meter does not advertise readings in manufacturer data"),
        DeviceType::MeterPlus => (11, 8, 10),
        DeviceType::WoIOSensor => (12, 8, 10),
        DeviceType::Hub2 => (17, 13, 15),
        DeviceType::MeterProCO2 => (16, 8, 10),
    };

    if manufacturer_data.len() < min_len {
        bail!(
            "{device_type} manufacturer data too short: expected at least {min_len} bytes, got {}",
            manufacturer_data.len()
        )
    }

    decode_measurement(
        [
            manufacturer_data[temperature_index],
            manufacturer_data[temperature_index + 1],
        ],
        manufacturer_data[humidity_index],
    )
}

fn decode_measurement(temperature: [u8; 2], humidity: u8) -> Result<DecodedMeasurement> {
    let temperature_celsius =
        decode_temperature(temperature).context("failed to decode temperature")?;
    let humidity_percent = decode_humidity(humidity).context("failed to decode humidity")?;
    let mode = decode_mode(humidity);

    Ok(DecodedMeasurement {
        mode,
        temperature_celsius,
        humidity_percent,
    })
}

fn get_switch_bot_manufacturer_data(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Result<&[u8]> {
    Ok(manufacturer_data
        .get(&SWITCHBOT_MANUFACTURER_DATA_COMPANY_ID)
        .ok_or_else(|| {
            anyhow!(
                "SwitchBot manufacturer data not found: {SWITCHBOT_MANUFACTURER_DATA_COMPANY_ID}"
            )
        })?)
}

fn get_switch_bot_service_data(service_data: &HashMap<Uuid, Vec<u8>>) -> Result<&[u8]> {
    Ok(service_data
        .get(&SWITCHBOT_SERVICE_DATA_UUID)
        .ok_or_else(|| {
            anyhow!("SwitchBot service data not found: {SWITCHBOT_SERVICE_DATA_UUID}")
        })?)
}

fn detect_device_type(service_data: &[u8]) -> Result<DeviceType> {
    let Some(&device_type_raw) = service_data.first() else {
        bail!("SwitchBot service data is empty");
    };

    let device_type =
        decode_device_type(device_type_raw).context("failed to decode SwitchBot device type")?;

    Ok(device_type)
}

fn decode_device_type(v: u8) -> Result<DeviceType> {
    // Bit 7 is the encryption flag.
    match v & 0x7f {
        0x76 => Ok(DeviceType::Hub2),
        0x54 => Ok(DeviceType::Meter),
        0x69 => Ok(DeviceType::MeterPlus),
        0x77 => Ok(DeviceType::WoIOSensor),
        0x35 => Ok(DeviceType::MeterProCO2),
        _ => bail!("unknown SwitchBot device type: 0x{v:02x}"),
    }
}

fn decode_temperature(v: [u8; 2]) -> Result<f32> {
    let fractional_part = (v[0] & 0x0f) as i16;
    let integral_part = (v[1] & 0x7f) as i16;
    let positive_negative_flag = v[1] & 0x80;

    if fractional_part > 9 {
        bail!("temperature decimal out of range: expected 0-9, got {fractional_part}");
    }

    let sign = if positive_negative_flag != 0 {
        1i16
    } else {
        -1i16
    };

    Ok((sign * (integral_part * 10 + fractional_part)) as f32 / 10f32)
}

fn decode_humidity(v: u8) -> Result<u8> {
    let humidity = v & 0x7f;
    if humidity > 100 {
        bail!("humidity out of range: expected 0-100, got {humidity}");
    }

    Ok(humidity)
}

fn decode_mode(v: u8) -> Mode {
    Mode::from_scale_flag(v & 0x80 != 0)
}
