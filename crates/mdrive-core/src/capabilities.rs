//! Capability traits for motion hardware.
//!
//! Code that scans or homes a stage is written against [`Movable`] and
//! [`Homeable`] rather than a concrete driver. An MDrive axis implements both.
//!
//! ```rust,ignore
//! async fn scan<T: Movable>(stage: &T, points: &[f64]) -> anyhow::Result<()> {
//!     for &p in points {
//!         stage.move_abs(p).await?;
//!         stage.wait_settled().await?;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Logical direction of travel, after any sign convention has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward increasing user-unit positions
    Plus,
    /// Toward decreasing user-unit positions
    Minus,
}

impl Direction {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            Direction::Plus => Direction::Minus,
            Direction::Minus => Direction::Plus,
        }
    }
}

/// Positioning in user units.
///
/// `move_abs` and `move_rel` return once the motion is commanded;
/// `wait_settled` returns once it has finished or gives up after an
/// implementation-defined timeout.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Start a move to `position`.
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Start a move by `distance` from the current position.
    async fn move_rel(&self, distance: f64) -> Result<()>;

    /// Current position.
    async fn position(&self) -> Result<f64>;

    /// Wait until the device reports no motion.
    async fn wait_settled(&self) -> Result<()>;

    /// Halt any motion. Not every device can; the default refuses.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

/// Reference search against a homing switch.
#[async_trait]
pub trait Homeable: Send + Sync {
    /// Start a homing search in the given logical direction.
    ///
    /// Returns `Ok(false)` when the device has no homing input and nothing was sent.
    async fn home(&self, direction: Direction) -> Result<bool>;
}
