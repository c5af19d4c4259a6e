//! Digital input configuration and limit switch state.
//!
//! An MDrive has four configurable inputs. `PR S<i>` reports how input `i` is
//! set up as `type,level,sink_source`; the type says whether the input is a
//! homing switch or an end-of-travel limit.

use std::str::FromStr;
use thiserror::Error;

/// Number of configurable inputs on an MDrive.
pub const INPUT_COUNT: u8 = 4;

/// Errors from parsing a `PR S<i>` reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputSettingError {
    /// Not three comma-separated fields.
    #[error("expected 'type,level,sink_source', got {0:?}")]
    Shape(String),
    /// A field is not an integer.
    #[error("non-numeric field {field:?} in {reply:?}")]
    Field {
        /// Offending field text
        field: String,
        /// Whole reply
        reply: String,
    },
}

/// What an input is wired to, from the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFunction {
    /// Type 1
    Homing,
    /// Type 2
    LimitPlus,
    /// Type 3
    LimitMinus,
    /// Any other type code
    Other(u8),
}

impl From<u8> for InputFunction {
    fn from(code: u8) -> Self {
        match code {
            1 => InputFunction::Homing,
            2 => InputFunction::LimitPlus,
            3 => InputFunction::LimitMinus,
            other => InputFunction::Other(other),
        }
    }
}

/// Parsed `PR S<i>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSetting {
    /// Input function (type field)
    pub function: InputFunction,
    /// Active level
    pub level: u8,
    /// Sinking or sourcing
    pub sink_source: u8,
}

impl FromStr for InputSetting {
    type Err = InputSettingError;

    fn from_str(reply: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
        let [kind, level, sink_source] = fields.as_slice() else {
            return Err(InputSettingError::Shape(reply.to_string()));
        };

        let number = |field: &str| {
            field.parse::<u8>().map_err(|_| InputSettingError::Field {
                field: field.to_string(),
                reply: reply.to_string(),
            })
        };

        Ok(InputSetting {
            function: InputFunction::from(number(*kind)?),
            level: number(*level)?,
            sink_source: number(*sink_source)?,
        })
    }
}

/// Input channels found at initialization; 0 means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputMap {
    /// Electrical minus limit input
    pub limit_minus: u8,
    /// Electrical plus limit input
    pub limit_plus: u8,
    /// Homing switch input
    pub homing: u8,
}

impl InputMap {
    /// Record input `channel` according to its configured function.
    ///
    /// When several inputs share a function the highest channel wins.
    pub fn assign(&mut self, channel: u8, function: InputFunction) {
        match function {
            InputFunction::Homing => self.homing = channel,
            InputFunction::LimitPlus => self.limit_plus = channel,
            InputFunction::LimitMinus => self.limit_minus = channel,
            InputFunction::Other(_) => {}
        }
    }

    /// Whether a homing switch was found.
    pub fn has_homing(&self) -> bool {
        self.homing > 0
    }
}

/// Limit switch activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitState {
    /// Minus limit active
    pub minus: bool,
    /// Plus limit active
    pub plus: bool,
}

impl LimitState {
    /// Map electrical limits to logical ones. A negative factor swaps them.
    pub fn to_logical(self, factor: f64) -> Self {
        if factor < 0.0 {
            LimitState {
                minus: self.plus,
                plus: self.minus,
            }
        } else {
            self
        }
    }

    /// Whether either limit is active.
    pub fn any(&self) -> bool {
        self.minus || self.plus
    }
}
