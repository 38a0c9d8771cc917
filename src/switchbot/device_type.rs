use std::fmt;

/// SwitchBot devices that broadcast temperature and humidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Meter,
    MeterPlus,
    WoIOSensor,
    Hub2,
    MeterProCO2,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Meter => "Meter",
            DeviceType::MeterPlus => "MeterPlus",
            DeviceType::WoIOSensor => "WoIOSensor",
            DeviceType::Hub2 => "Hub 2",
            DeviceType::MeterProCO2 => "MeterPro(CO2)",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
