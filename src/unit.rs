use core::fmt;
use strum::{Display, EnumCount, FromRepr};

/// Physical unit of a parameter. The discriminant is part of the entry fingerprint and of the remote
/// `UNIT` field, so members are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, EnumCount)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Unit {
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "dB")]
    Decibel,
    #[strum(serialize = "lx")]
    Lux,
    #[strum(serialize = "%RH")]
    RelHumidity,
    #[strum(serialize = "°C")]
    Celsius,
    #[strum(serialize = "K")]
    Kelvin,
    #[strum(serialize = "µs")]
    MicroSecond,
    #[strum(serialize = "ms")]
    MilliSecond,
    #[strum(serialize = "s")]
    Second,
    #[strum(serialize = "ks")]
    KiloSecond,
    #[strum(serialize = "Ms")]
    MegaSecond,
    #[strum(serialize = "Hz")]
    Hertz,
    #[strum(serialize = "kHz")]
    KiloHertz,
    #[strum(serialize = "MHz")]
    MegaHertz,
    #[strum(serialize = "Bd")]
    Baud,
    #[strum(serialize = "rpm")]
    Rpm,
    #[strum(serialize = "J")]
    Joule,
    #[strum(serialize = "Ws")]
    WattSecond,
    #[strum(serialize = "Wh")]
    WattHour,
    #[strum(serialize = "kWh")]
    KiloWattHour,
    #[strum(serialize = "mW")]
    MilliWatt,
    #[strum(serialize = "W")]
    Watt,
    #[strum(serialize = "kW")]
    KiloWatt,
    #[strum(serialize = "mA")]
    MilliAmpere,
    #[strum(serialize = "A")]
    Ampere,
    #[strum(serialize = "A/s")]
    AmperePerSecond,
    #[strum(serialize = "mV")]
    MilliVolt,
    #[strum(serialize = "V")]
    Volt,
    #[strum(serialize = "Ohm")]
    Ohm,
    #[strum(serialize = "V/A")]
    VoltPerAmpere,
    #[strum(serialize = "mV/A")]
    MilliVoltPerAmpere,
    #[strum(serialize = "µm")]
    MicroMetre,
    #[strum(serialize = "mm")]
    MilliMetre,
    #[strum(serialize = "m")]
    Metre,
    #[strum(serialize = "km")]
    KiloMetre,
    #[strum(serialize = "mm/s")]
    MilliMetrePerSecond,
    #[strum(serialize = "m/s")]
    MetrePerSecond,
    #[strum(serialize = "km/h")]
    KiloMetrePerHour,
}

/// How a raw cell is rendered for humans. Q15 variants treat the cell as Q15.16 fixed point and
/// show the given number of fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumCount)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Representation {
    Hex,
    Hex02,
    Hex04,
    Hex08,
    Dec,
    DecUnsigned,
    Q15_0,
    Q15_1,
    Q15_2,
    Q15_3,
    Q15_4,
    Q15_5,
    DottedQuad,
}

impl Representation {
    /// Number of fractional digits of the Q15 variants.
    pub const fn fraction_digits(self) -> Option<u8> {
        match self {
            Self::Q15_0 => Some(0),
            Self::Q15_1 => Some(1),
            Self::Q15_2 => Some(2),
            Self::Q15_3 => Some(3),
            Self::Q15_4 => Some(4),
            Self::Q15_5 => Some(5),
            _ => None,
        }
    }

    /// Renders `value` in this representation.
    ///
    /// ```
    /// use param_registry::unit::Representation;
    ///
    /// assert_eq!(Representation::Hex04.display(0xAB).to_string(), "0x00AB");
    /// assert_eq!(Representation::Q15_2.display(0x0001_8000).to_string(), "1.50");
    /// assert_eq!(Representation::DottedQuad.display(0xC0A8_0001u32 as i32).to_string(), "192.168.0.1");
    /// ```
    pub const fn display(self, value: i32) -> Value {
        Value {
            value,
            repr: self,
            unit: None,
        }
    }

    /// Like [`Representation::display`] followed by the unit symbol.
    pub const fn display_with_unit(self, value: i32, unit: Unit) -> Value {
        Value {
            value,
            repr: self,
            unit: Some(unit),
        }
    }
}

/// A cell value paired with its representation, see [`Representation::display`].
#[derive(Debug, Clone, Copy)]
pub struct Value {
    value: i32,
    repr: Representation,
    unit: Option<Unit>,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.value as u32;
        match self.repr {
            Representation::Hex => write!(f, "0x{raw:X}")?,
            Representation::Hex02 => write!(f, "0x{raw:02X}")?,
            Representation::Hex04 => write!(f, "0x{raw:04X}")?,
            Representation::Hex08 => write!(f, "0x{raw:08X}")?,
            Representation::Dec => write!(f, "{}", self.value)?,
            Representation::DecUnsigned => write!(f, "{raw}")?,
            Representation::DottedQuad => {
                let [a, b, c, d] = raw.to_be_bytes();
                write!(f, "{a}.{b}.{c}.{d}")?
            }
            q15 => {
                let digits = q15.fraction_digits().unwrap_or(0);
                write_q15(f, self.value, digits)?
            }
        }
        if let Some(unit) = self.unit {
            write!(f, "{unit}")?;
        }
        Ok(())
    }
}

// fraction is truncated, not rounded
fn write_q15(f: &mut fmt::Formatter<'_>, value: i32, digits: u8) -> fmt::Result {
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    let integer = magnitude >> 16;
    if digits == 0 {
        return write!(f, "{sign}{integer}");
    }
    let scale = 10u64.pow(digits as u32);
    let fraction = ((magnitude & 0xFFFF) as u64 * scale) >> 16;
    write!(
        f,
        "{sign}{integer}.{fraction:0width$}",
        width = digits as usize
    )
}
