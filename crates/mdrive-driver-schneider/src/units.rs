//! Unit conversion between user units and MDrive raw steps.
//!
//! The conversion factor is raw steps per user unit. Its sign encodes the
//! mounting direction: a negative factor means the motor's electrical plus
//! direction is the logical minus direction.

use mdrive_core::capabilities::Direction;
use mdrive_core::error::{AppResult, DriveError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest supported microstep exponent (divisor 256).
pub const MAX_MICROSTEP_EXPONENT: u8 = 8;

/// Validate a conversion factor.
///
/// # Errors
/// [`DriveError::Validation`] for zero or non-finite factors.
pub fn check_factor(factor: f64) -> AppResult<f64> {
    if factor == 0.0 || !factor.is_finite() {
        return Err(DriveError::Validation(format!(
            "conversion factor must be finite and non-zero, got {factor}"
        )));
    }
    Ok(factor)
}

/// Convert a user-unit value to the nearest raw step count.
///
/// # Errors
/// [`DriveError::Validation`] if the result is not finite or does not fit the
/// controller's 32-bit registers.
pub fn to_raw(value: f64, factor: f64) -> AppResult<i64> {
    let raw = (value * factor).round();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&raw) {
        return Err(DriveError::Validation(format!(
            "{value} x {factor} is outside the controller's step range"
        )));
    }
    Ok(raw as i64)
}

/// Convert a raw step count to user units.
pub fn from_raw(raw: f64, factor: f64) -> f64 {
    raw / factor
}

/// `HM` mode that moves in the logical `direction`.
///
/// Mode 3 searches in the electrical plus direction and mode 1 in the
/// electrical minus direction.
pub fn homing_mode(direction: Direction, factor: f64) -> u8 {
    let electrical = if factor < 0.0 {
        direction.reversed()
    } else {
        direction
    };
    match electrical {
        Direction::Plus => 3,
        Direction::Minus => 1,
    }
}

/// Microstep divisor for an exponent in `0..=8`.
pub fn microstep_divisor(exponent: u8) -> Option<u32> {
    (exponent <= MAX_MICROSTEP_EXPONENT).then(|| 1u32 << exponent)
}

/// Exponent of a raw microstep divisor, when it is a power of two in `1..=256`.
pub fn microstep_exponent(divisor: i64) -> Option<u8> {
    if !(1..=256).contains(&divisor) || divisor & (divisor - 1) != 0 {
        return None;
    }
    u8::try_from(divisor.trailing_zeros()).ok()
}

/// Unit that positions are displayed in.
///
/// Display metadata only; no conversion is implied. The numeric relation to
/// steps is carried by the conversion factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementUnit {
    /// Raw motor steps
    #[default]
    Steps,
    /// Millimetres
    Mm,
    /// Inches
    Inch,
    /// Degrees
    Degree,
}

impl MovementUnit {
    /// Message returned for unrecognised unit names.
    pub const INVALID_INPUT: &'static str = "input must be steps/mm/inch/degree";

    /// Lowercase name as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            MovementUnit::Steps => "steps",
            MovementUnit::Mm => "mm",
            MovementUnit::Inch => "inch",
            MovementUnit::Degree => "degree",
        }
    }

    /// Unit label for positions.
    pub fn position_label(self) -> String {
        self.as_str().to_string()
    }

    /// Unit label for velocities.
    pub fn velocity_label(self) -> String {
        format!("{}/s", self.as_str())
    }

    /// Unit label for accelerations.
    pub fn acceleration_label(self) -> String {
        format!("{}/s^2", self.as_str())
    }

    /// printf-style display format.
    pub fn format(self) -> &'static str {
        match self {
            MovementUnit::Steps => "%8d",
            _ => "%8.3f",
        }
    }

    /// Render a value with [`format`](Self::format).
    pub fn format_value(self, value: f64) -> String {
        match self {
            MovementUnit::Steps => format!("{:8}", value.round()),
            _ => format!("{value:8.3}"),
        }
    }
}

impl fmt::Display for MovementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementUnit {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steps" => Ok(MovementUnit::Steps),
            "mm" => Ok(MovementUnit::Mm),
            "inch" => Ok(MovementUnit::Inch),
            "degree" => Ok(MovementUnit::Degree),
            _ => Err(DriveError::Validation(Self::INVALID_INPUT.to_string())),
        }
    }
}
