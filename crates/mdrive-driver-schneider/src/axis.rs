//! Schneider MDrive axis driver
//!
//! One [`MdriveAxis`] per motor on the RS-485 line. Every command it sends is
//! prefixed with the axis token (e.g. `X`), so `PR P` goes out as `XPR P`.
//!
//! Command vocabulary:
//! - `PR <token>`: parameter read (P, VM, A, RC, HC, MS, I1..4, S1..4, MV, PN, SN)
//! - `MA <int>`: move absolute
//! - `P=<int>`: set position register
//! - `VM=`, `A=`, `D=`, `HC=`, `RC=`, `MS=`: parameter writes
//! - `SL <int>`: slew (jog) at the given velocity, `SL 0` stops
//! - `HM <1|3>`: home toward the minus (1) or plus (3) electrical direction
//! - `S`: save parameters to EEPROM
//! - `ESC` (0x1B): abort
//!
//! Status is derived by [`MdriveAxis::poll_status`], which is rate-limited and
//! driven by the caller. Nothing polls in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mdrive_driver_schneider::{AxisSettings, MdriveAxis, MdriveLink};
//!
//! let axis = MdriveAxis::new(Arc::clone(&link), AxisSettings::new("X"));
//! axis.initialize().await?;
//! axis.set_conversion(-2.0)?;
//! axis.move_to(12.5).await?;
//! let state = axis.poll_status().await;
//! ```

use crate::inputs::{InputMap, InputSetting, LimitState, INPUT_COUNT};
use crate::link::MdriveLink;
use crate::units::{
    check_factor, from_raw, homing_mode, microstep_divisor, microstep_exponent, to_raw,
    MovementUnit, MAX_MICROSTEP_EXPONENT,
};
use anyhow::anyhow;
use async_trait::async_trait;
use mdrive_core::capabilities::{Direction, Homeable, Movable};
use mdrive_core::error::{AppResult, DriveError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Default minimum time between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for [`Movable::wait_settled`].
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between motion queries while waiting to settle.
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Operational state of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationalState {
    /// Constructed, not yet initialized
    #[default]
    Init,
    /// Idle and healthy
    On,
    /// Motion commanded or reported
    Moving,
    /// Idle with a limit switch active
    Alarm,
    /// A command was not acknowledged
    Fault,
    /// Shut down
    Off,
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationalState::Init => "INIT",
            OperationalState::On => "ON",
            OperationalState::Moving => "MOVING",
            OperationalState::Alarm => "ALARM",
            OperationalState::Fault => "FAULT",
            OperationalState::Off => "OFF",
        };
        f.write_str(label)
    }
}

/// Per-axis settings fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSettings {
    /// Axis token prefixed to every command
    pub axis: String,
    /// Minimum time between two status polls
    pub poll_interval: Duration,
}

impl AxisSettings {
    /// Settings with the default poll interval.
    pub fn new(axis: impl Into<String>) -> Self {
        Self {
            axis: axis.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self::new("X")
    }
}

#[derive(Debug)]
struct AxisState {
    conversion: f64,
    inputs: InputMap,
    operational: OperationalState,
    last_poll: Option<Instant>,
    limits: LimitState,
    unit: MovementUnit,
    status: String,
    part_number: String,
    serial_number: String,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            conversion: 1.0,
            inputs: InputMap::default(),
            operational: OperationalState::Init,
            last_poll: None,
            limits: LimitState::default(),
            unit: MovementUnit::default(),
            status: String::new(),
            part_number: String::new(),
            serial_number: String::new(),
        }
    }
}

/// Driver for one Schneider MDrive axis on a shared link.
pub struct MdriveAxis {
    link: Arc<MdriveLink>,
    settings: AxisSettings,
    state: Mutex<AxisState>,
}

impl fmt::Debug for MdriveAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdriveAxis")
            .field("axis", &self.settings.axis)
            .field("link", &self.link.port())
            .field("state", &self.state())
            .finish()
    }
}

impl MdriveAxis {
    /// Create an axis in [`OperationalState::Init`]. No I/O happens until
    /// [`initialize`](Self::initialize).
    pub fn new(link: Arc<MdriveLink>, settings: AxisSettings) -> Self {
        Self {
            link,
            settings,
            state: Mutex::new(AxisState::default()),
        }
    }

    /// Open the link if needed, log identity and discover the input wiring.
    ///
    /// # Errors
    /// Returns [`DriveError::Connection`] if the link cannot be opened. NACKs
    /// while reading identity or inputs only leave the axis in Fault.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn initialize(&self) -> AppResult<()> {
        tracing::info!("module axis: {}", self.settings.axis);

        if self.link.is_open() {
            tracing::info!("controller was already open");
        } else {
            self.link.open().await?;
            tracing::info!("controller successfully opened");
        }
        self.set_state(OperationalState::On);

        let part_number = self.write_read("PR PN").await;
        tracing::info!("axis part number: {}", part_number);
        let serial_number = self.write_read("PR SN").await;
        tracing::info!("axis serial number: {}", serial_number);

        let inputs = self.discover_inputs().await;
        tracing::info!("input limit minus: {}", inputs.limit_minus);
        tracing::info!("input limit plus: {}", inputs.limit_plus);
        tracing::info!("input homing switch: {}", inputs.homing);

        let mut st = self.state.lock();
        st.part_number = part_number;
        st.serial_number = serial_number;
        st.inputs = inputs;
        st.last_poll = None;
        Ok(())
    }

    async fn discover_inputs(&self) -> InputMap {
        let mut inputs = InputMap::default();
        for channel in 1..=INPUT_COUNT {
            let reply = self.write_read(&format!("PR S{channel}")).await;
            match reply.parse::<InputSetting>() {
                Ok(setting) => inputs.assign(channel, setting.function),
                Err(e) => tracing::warn!("ignoring input {}: {}", channel, e),
            }
        }
        inputs
    }

    /// Move the axis to [`OperationalState::Off`].
    pub fn shutdown(&self) {
        self.set_state(OperationalState::Off);
        tracing::info!(axis = %self.settings.axis, "axis shut down");
    }

    // =========================================================================
    // Identity and cached state
    // =========================================================================

    /// Axis token.
    pub fn axis_id(&self) -> &str {
        &self.settings.axis
    }

    /// The link this axis talks through.
    pub fn link(&self) -> &Arc<MdriveLink> {
        &self.link
    }

    /// Minimum time between two status polls.
    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// Current operational state.
    pub fn state(&self) -> OperationalState {
        self.state.lock().operational
    }

    /// Status text rebuilt by the last poll.
    pub fn status(&self) -> String {
        self.state.lock().status.clone()
    }

    /// Inputs discovered at initialization.
    pub fn inputs(&self) -> InputMap {
        self.state.lock().inputs
    }

    /// Part number reported at initialization.
    pub fn part_number(&self) -> String {
        self.state.lock().part_number.clone()
    }

    /// Serial number reported at initialization.
    pub fn serial_number(&self) -> String {
        self.state.lock().serial_number.clone()
    }

    /// Logical limits from the last poll.
    pub fn limits(&self) -> LimitState {
        self.state.lock().limits
    }

    /// Logical minus limit from the last poll.
    pub fn limit_minus(&self) -> bool {
        self.limits().minus
    }

    /// Logical plus limit from the last poll.
    pub fn limit_plus(&self) -> bool {
        self.limits().plus
    }

    /// Steps per user unit.
    pub fn conversion(&self) -> f64 {
        self.state.lock().conversion
    }

    /// Set steps per user unit.
    ///
    /// # Errors
    /// [`DriveError::Validation`] for zero or non-finite factors.
    pub fn set_conversion(&self, factor: f64) -> AppResult<()> {
        let factor = check_factor(factor)?;
        self.state.lock().conversion = factor;
        tracing::info!(axis = %self.settings.axis, "Set conversion to {}", factor);
        Ok(())
    }

    /// Unit used for display metadata.
    pub fn movement_unit(&self) -> MovementUnit {
        self.state.lock().unit
    }

    /// Change display metadata.
    ///
    /// Returns a human readable result; an unknown unit changes nothing.
    pub fn set_movement_unit(&self, unit: &str) -> String {
        match unit.parse::<MovementUnit>() {
            Ok(unit) => {
                self.state.lock().unit = unit;
                let response = format!("set movement unit to {unit}");
                tracing::info!(axis = %self.settings.axis, "{}", response);
                response
            }
            Err(_) => MovementUnit::INVALID_INPUT.to_string(),
        }
    }

    fn set_state(&self, state: OperationalState) {
        self.state.lock().operational = state;
    }

    fn fault(&self) {
        self.set_state(OperationalState::Fault);
        tracing::warn!(
            axis = %self.settings.axis,
            "command not acknowledged from controller -> Fault State"
        );
    }

    fn addressed(&self, command: &str) -> String {
        format!("{}{}", self.settings.axis, command)
    }

    // =========================================================================
    // Wire access
    // =========================================================================

    /// Send an axis-addressed command. A NACK puts the axis in Fault.
    pub async fn write(&self, command: &str) -> bool {
        self.send(command).await.is_ok()
    }

    /// Send an axis-addressed query. A NACK puts the axis in Fault and yields `""`.
    pub async fn write_read(&self, command: &str) -> String {
        self.ask(command).await.unwrap_or_default()
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        let result = self.link.command(&self.addressed(command)).await;
        if let Err(e) = &result {
            if e.is_nack() {
                self.fault();
            }
        }
        result
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        let result = self.link.query(&self.addressed(command)).await;
        if let Err(e) = &result {
            if e.is_nack() {
                self.fault();
            }
        }
        result
    }

    async fn ask_integer(&self, command: &str) -> AppResult<i64> {
        let reply = self.ask(command).await?;
        parse_reply(&self.addressed(command), &reply)
    }

    async fn ask_number(&self, command: &str) -> AppResult<f64> {
        let reply = self.ask(command).await?;
        parse_reply(&self.addressed(command), &reply)
    }

    async fn ask_flag(&self, command: &str) -> AppResult<bool> {
        Ok(self.ask_integer(command).await? != 0)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Position in user units.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn position(&self) -> AppResult<f64> {
        let raw = self.ask_number("PR P").await?;
        Ok(from_raw(raw, self.conversion()))
    }

    /// Move to an absolute position in user units.
    ///
    /// The axis is Moving once the controller acknowledges `MA`.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn move_to(&self, position: f64) -> AppResult<()> {
        let raw = to_raw(position, self.conversion())?;
        self.send(&format!("MA {raw}")).await?;
        self.set_state(OperationalState::Moving);
        Ok(())
    }

    /// Redefine the current position (`P=`) without moving.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_position(&self, position: f64) -> AppResult<()> {
        let raw = to_raw(position, self.conversion())?;
        self.send(&format!("P={raw}")).await
    }

    /// Maximum velocity in user units per second.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn velocity(&self) -> AppResult<f64> {
        let raw = self.ask_number("PR VM").await?;
        Ok(from_raw(raw, self.conversion().abs()))
    }

    /// Set the maximum velocity in user units per second.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_velocity(&self, velocity: f64) -> AppResult<()> {
        let raw = to_raw(velocity, self.conversion().abs())?;
        self.send(&format!("VM={raw}")).await
    }

    /// Acceleration in user units per second squared.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn acceleration(&self) -> AppResult<f64> {
        let raw = self.ask_number("PR A").await?;
        Ok(from_raw(raw, self.conversion().abs()))
    }

    /// Set acceleration and deceleration to the same value.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_acceleration(&self, acceleration: f64) -> AppResult<()> {
        let raw = to_raw(acceleration, self.conversion().abs())?;
        self.send(&format!("A={raw}")).await?;
        self.send(&format!("D={raw}")).await
    }

    /// Hold current in percent.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn hold_current(&self) -> AppResult<u8> {
        self.current("PR HC").await
    }

    /// Set hold current in percent (0-100).
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_hold_current(&self, percent: u8) -> AppResult<()> {
        check_current(percent)?;
        self.send(&format!("HC={percent}")).await
    }

    /// Run current in percent.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn run_current(&self) -> AppResult<u8> {
        self.current("PR RC").await
    }

    /// Set run current in percent (0-100).
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_run_current(&self, percent: u8) -> AppResult<()> {
        check_current(percent)?;
        self.send(&format!("RC={percent}")).await
    }

    async fn current(&self, command: &str) -> AppResult<u8> {
        let value = self.ask_integer(command).await?;
        u8::try_from(value)
            .ok()
            .filter(|percent| *percent <= 100)
            .ok_or_else(|| DriveError::Parse {
                command: self.addressed(command),
                reply: value.to_string(),
            })
    }

    /// Microstep resolution as an exponent: the divisor is `2^n`.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn micro_steps(&self) -> AppResult<u8> {
        let divisor = self.ask_integer("PR MS").await?;
        microstep_exponent(divisor).ok_or_else(|| DriveError::Parse {
            command: self.addressed("PR MS"),
            reply: divisor.to_string(),
        })
    }

    /// Set microstep resolution from an exponent in `0..=8`.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn set_micro_steps(&self, exponent: u8) -> AppResult<()> {
        let divisor = microstep_divisor(exponent).ok_or_else(|| {
            DriveError::Validation(format!(
                "micro step exponent must be 0-{MAX_MICROSTEP_EXPONENT}, got {exponent}"
            ))
        })?;
        self.send(&format!("MS={divisor}")).await
    }

    /// Whether the controller reports motion in progress.
    pub async fn is_moving(&self) -> AppResult<bool> {
        self.ask_flag("PR MV").await
    }

    // =========================================================================
    // Motion commands
    // =========================================================================

    /// Slew in the logical plus direction at the configured velocity.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn jog_plus(&self) -> AppResult<()> {
        self.jog(Direction::Plus).await
    }

    /// Slew in the logical minus direction at the configured velocity.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn jog_minus(&self) -> AppResult<()> {
        self.jog(Direction::Minus).await
    }

    async fn jog(&self, direction: Direction) -> AppResult<()> {
        let velocity = self.velocity().await?;
        let signed = match direction {
            Direction::Plus => velocity,
            Direction::Minus => -velocity,
        };
        let raw = to_raw(signed, self.conversion())?;
        self.send(&format!("SL {raw}")).await?;
        self.set_state(OperationalState::Moving);
        Ok(())
    }

    /// Home in the logical plus direction.
    ///
    /// Returns `Ok(false)` without sending anything when no homing input exists.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn homing_plus(&self) -> AppResult<bool> {
        self.homing(Direction::Plus).await
    }

    /// Home in the logical minus direction.
    ///
    /// Returns `Ok(false)` without sending anything when no homing input exists.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn homing_minus(&self) -> AppResult<bool> {
        self.homing(Direction::Minus).await
    }

    async fn homing(&self, direction: Direction) -> AppResult<bool> {
        let (inputs, factor) = {
            let st = self.state.lock();
            (st.inputs, st.conversion)
        };
        if !inputs.has_homing() {
            tracing::debug!("no homing input configured, not homing");
            return Ok(false);
        }
        self.send(&format!("HM {}", homing_mode(direction, factor)))
            .await?;
        self.set_state(OperationalState::Moving);
        Ok(true)
    }

    /// Stop motion (`SL 0`).
    ///
    /// Cached limits are kept; the next [`poll_status`](Self::poll_status)
    /// runs immediately and re-derives Alarm if a limit is still active.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn stop(&self) -> AppResult<()> {
        self.halt("SL 0").await
    }

    /// Abort motion (`ESC`). Same state handling as [`stop`](Self::stop).
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn abort(&self) -> AppResult<()> {
        self.halt("\x1b").await
    }

    async fn halt(&self, command: &str) -> AppResult<()> {
        self.send(command).await?;
        let mut st = self.state.lock();
        st.operational = OperationalState::On;
        st.last_poll = None;
        Ok(())
    }

    /// Save parameters to the controller's EEPROM.
    #[instrument(skip(self), fields(axis = %self.settings.axis), err)]
    pub async fn save_to_eeprom(&self) -> AppResult<String> {
        self.send("S").await?;
        let response = "parameters saved to EEPROM".to_string();
        tracing::info!("{}", response);
        Ok(response)
    }

    // =========================================================================
    // Status polling
    // =========================================================================

    /// Refresh limits and motion state, at most once per poll interval.
    ///
    /// Inside the interval this is a no-op returning the cached state. A failed
    /// query puts the axis in Fault and keeps the cached limits.
    #[instrument(skip(self), fields(axis = %self.settings.axis))]
    pub async fn poll_status(&self) -> OperationalState {
        let (inputs, factor) = {
            let mut st = self.state.lock();
            if st.operational == OperationalState::Off {
                return st.operational;
            }
            let now = Instant::now();
            if let Some(last) = st.last_poll {
                if now.duration_since(last) <= self.settings.poll_interval {
                    return st.operational;
                }
            }
            st.last_poll = Some(now);
            (st.inputs, st.conversion)
        };

        match self.query_status(inputs).await {
            Ok((electrical, moving)) => {
                let limits = electrical.to_logical(factor);
                tracing::debug!(?limits, moving, "status polled");

                let mut st = self.state.lock();
                st.limits = limits;
                st.status = status_text(electrical, factor, moving);
                st.operational = if moving {
                    OperationalState::Moving
                } else if limits.any() {
                    OperationalState::Alarm
                } else {
                    OperationalState::On
                };
                st.operational
            }
            Err(e) => {
                tracing::warn!("status poll failed: {}", e);
                let mut st = self.state.lock();
                st.operational = OperationalState::Fault;
                st.operational
            }
        }
    }

    async fn query_status(&self, inputs: InputMap) -> AppResult<(LimitState, bool)> {
        let mut electrical = LimitState::default();
        if inputs.limit_minus > 0 {
            electrical.minus = self
                .ask_flag(&format!("PR I{}", inputs.limit_minus))
                .await?;
        }
        if inputs.limit_plus > 0 {
            electrical.plus = self
                .ask_flag(&format!("PR I{}", inputs.limit_plus))
                .await?;
        }
        let moving = self.is_moving().await?;
        Ok((electrical, moving))
    }
}

fn check_current(percent: u8) -> AppResult<()> {
    if percent > 100 {
        return Err(DriveError::Validation(format!(
            "current must be 0-100 %, got {percent}"
        )));
    }
    Ok(())
}

fn parse_reply<T: std::str::FromStr>(command: &str, reply: &str) -> AppResult<T> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(DriveError::EmptyReply(command.to_string()));
    }
    trimmed.parse().map_err(|_| DriveError::Parse {
        command: command.to_string(),
        reply: reply.to_string(),
    })
}

fn status_text(electrical: LimitState, factor: f64, moving: bool) -> String {
    let mut lines = Vec::new();
    let (minus_label, plus_label) = if factor < 0.0 {
        ("limit+ active", "limit- active")
    } else {
        ("limit- active", "limit+ active")
    };
    if electrical.minus {
        lines.push(minus_label);
    }
    if electrical.plus {
        lines.push(plus_label);
    }
    lines.push(if moving {
        "Device is MOVING"
    } else {
        "Device in ON"
    });
    lines.join("\n")
}

#[async_trait]
impl Movable for MdriveAxis {
    async fn move_abs(&self, position: f64) -> anyhow::Result<()> {
        Ok(self.move_to(position).await?)
    }

    async fn move_rel(&self, distance: f64) -> anyhow::Result<()> {
        let current = MdriveAxis::position(self).await?;
        Ok(self.move_to(current + distance).await?)
    }

    async fn position(&self) -> anyhow::Result<f64> {
        Ok(MdriveAxis::position(self).await?)
    }

    async fn wait_settled(&self) -> anyhow::Result<()> {
        let start = Instant::now();
        loop {
            if !self.is_moving().await? {
                let mut st = self.state.lock();
                if st.operational == OperationalState::Moving {
                    st.operational = OperationalState::On;
                }
                st.last_poll = None;
                return Ok(());
            }
            if start.elapsed() > SETTLE_TIMEOUT {
                return Err(anyhow!(
                    "axis {} wait_settled timed out after {:?}",
                    self.settings.axis,
                    SETTLE_TIMEOUT
                ));
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(MdriveAxis::stop(self).await?)
    }
}

#[async_trait]
impl Homeable for MdriveAxis {
    async fn home(&self, direction: Direction) -> anyhow::Result<bool> {
        Ok(self.homing(direction).await?)
    }
}
