//! Scripted MDrive controller for integration tests.
//!
//! The simulator sits behind a mock serial port, acknowledges every command
//! with `\r\n`, answers `PR` queries from a register table and applies parameter
//! writes back into that table. Commands can be marked as ignored to simulate
//! a controller that never acknowledges them.

#![allow(dead_code)]

use mdrive_core::mock_serial::{self, MockDeviceHarness};
use mdrive_core::serial::SerialSettings;
use mdrive_driver_schneider::{AxisSettings, MdriveAxis, MdriveLink};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Read timeout used by simulated links.
pub const LINK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct SimState {
    axes: Vec<String>,
    registers: HashMap<String, String>,
    ignored: HashSet<String>,
    log: Vec<String>,
}

/// Handle to a running simulator task.
#[derive(Clone)]
pub struct MdriveSim {
    state: Arc<Mutex<SimState>>,
}

impl MdriveSim {
    /// Start answering on `harness` for the given axis tokens.
    pub fn spawn(mut harness: MockDeviceHarness, axes: &[&str]) -> Self {
        let sim = MdriveSim {
            state: Arc::new(Mutex::new(SimState {
                axes: axes.iter().map(|a| a.to_string()).collect(),
                ..SimState::default()
            })),
        };
        for axis in axes {
            sim.set(&format!("{axis}PR PN"), "MDI1FRL17C4");
            sim.set(&format!("{axis}PR SN"), "0123456789");
            for channel in 1..=4 {
                sim.set(&format!("{axis}PR S{channel}"), "0,0,0");
                sim.set(&format!("{axis}PR I{channel}"), "0");
            }
            sim.set(&format!("{axis}PR P"), "0");
            sim.set(&format!("{axis}PR VM"), "768");
            sim.set(&format!("{axis}PR A"), "1000000");
            sim.set(&format!("{axis}PR HC"), "5");
            sim.set(&format!("{axis}PR RC"), "25");
            sim.set(&format!("{axis}PR MS"), "256");
            sim.set(&format!("{axis}PR MV"), "0");
        }

        let worker = sim.clone();
        tokio::spawn(async move {
            while let Some(line) = harness.recv_line(Duration::from_secs(3600)).await {
                if let Some(response) = worker.answer(&line) {
                    let _ = harness.send_response(response.as_bytes());
                }
            }
        });
        sim
    }

    fn answer(&self, line: &str) -> Option<String> {
        let mut st = self.state.lock();
        st.log.push(line.to_string());
        if st.ignored.contains(line) {
            return None;
        }

        let axis = st
            .axes
            .iter()
            .find(|axis| line.starts_with(axis.as_str()))
            .cloned()?;
        let body = &line[axis.len()..];

        if body.starts_with("PR ") {
            let value = st.registers.get(line).cloned().unwrap_or_default();
            return Some(format!("\r\n{value}\r\n"));
        }

        if let Some(target) = body.strip_prefix("MA ") {
            st.registers.insert(format!("{axis}PR P"), target.to_string());
        } else if let Some((name, value)) = body.split_once('=') {
            st.registers
                .insert(format!("{axis}PR {name}"), value.to_string());
        }
        Some("\r\n".to_string())
    }

    /// Set the reply to a full query such as `XPR I3`.
    pub fn set(&self, query: &str, value: &str) {
        self.state
            .lock()
            .registers
            .insert(query.to_string(), value.to_string());
    }

    /// Current register value for a full query.
    pub fn get(&self, query: &str) -> Option<String> {
        self.state.lock().registers.get(query).cloned()
    }

    /// Never acknowledge `command`.
    pub fn ignore(&self, command: &str) {
        self.state.lock().ignored.insert(command.to_string());
    }

    /// Acknowledge `command` again.
    pub fn acknowledge(&self, command: &str) {
        self.state.lock().ignored.remove(command);
    }

    /// Every line received so far.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Forget received lines.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

/// An open link with a simulator behind it.
pub async fn sim_link(axes: &[&str]) -> (Arc<MdriveLink>, MdriveSim) {
    let (port, harness) = mock_serial::new();
    let link = MdriveLink::new(SerialSettings::new("sim", 9600).with_read_timeout(LINK_TIMEOUT));
    link.open_with(Box::new(port)).await.unwrap();
    let sim = MdriveSim::spawn(harness, axes);
    (Arc::new(link), sim)
}

/// An initialized axis on `link` with the given poll interval.
pub async fn init_axis(link: &Arc<MdriveLink>, token: &str, poll_interval: Duration) -> MdriveAxis {
    let axis = MdriveAxis::new(
        Arc::clone(link),
        AxisSettings::new(token).with_poll_interval(poll_interval),
    );
    axis.initialize().await.unwrap();
    axis
}
