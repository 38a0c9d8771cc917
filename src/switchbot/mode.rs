use std::fmt;

/// Temperature scale the device is set to display.
///
/// The reported temperature is always Celsius; this only mirrors the flag the
/// device advertises alongside the humidity byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Celsius,
    Fahrenheit,
}

impl Mode {
    pub fn from_scale_flag(fahrenheit: bool) -> Self {
        if fahrenheit {
            Mode::Fahrenheit
        } else {
            Mode::Celsius
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Celsius => "celsius",
            Mode::Fahrenheit => "fahrenheit",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
