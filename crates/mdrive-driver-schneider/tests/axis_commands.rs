//! Axis command translation against the scripted controller.

mod common;

use common::{init_axis, sim_link};
use mdrive_core::capabilities::{Direction, Homeable, Movable};
use mdrive_core::error::DriveError;
use mdrive_driver_schneider::{MovementUnit, OperationalState};
use std::time::Duration;

const LONG: Duration = Duration::from_secs(10);

fn last(log: &[String]) -> &str {
    log.last().map(String::as_str).unwrap_or("")
}

#[tokio::test]
async fn initialize_discovers_inputs_and_identity() {
    let (link, sim) = sim_link(&["X"]).await;
    sim.set("XPR S1", "1,0,0");
    sim.set("XPR S2", "2,1,0");
    sim.set("XPR S3", "3,1,0");
    sim.set("XPR S4", "garbage");

    let axis = init_axis(&link, "X", LONG).await;

    let inputs = axis.inputs();
    assert_eq!(inputs.homing, 1);
    assert_eq!(inputs.limit_plus, 2);
    assert_eq!(inputs.limit_minus, 3);
    assert_eq!(axis.part_number(), "MDI1FRL17C4");
    assert_eq!(axis.serial_number(), "0123456789");
    assert_eq!(axis.state(), OperationalState::On);
    assert_eq!(
        sim.log(),
        vec!["XPR PN", "XPR SN", "XPR S1", "XPR S2", "XPR S3", "XPR S4"]
    );
}

#[tokio::test]
async fn acceleration_sets_deceleration_to_same_value() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    axis.set_conversion(-4.0).unwrap();
    sim.clear_log();

    axis.set_acceleration(250.0).await.unwrap();

    assert_eq!(sim.log(), vec!["XA=1000", "XD=1000"]);
    assert_eq!(axis.acceleration().await.unwrap(), 250.0);
}

#[tokio::test]
async fn velocity_uses_factor_magnitude() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    axis.set_conversion(-2.0).unwrap();

    assert_eq!(axis.velocity().await.unwrap(), 384.0);

    axis.set_velocity(100.0).await.unwrap();
    assert_eq!(last(&sim.log()), "XVM=200");
}

#[tokio::test]
async fn position_round_trips_through_raw_steps() {
    for factor in [1.0, 2.5, -2.0, 0.001, -1234.5] {
        let (link, sim) = sim_link(&["X"]).await;
        let axis = init_axis(&link, "X", LONG).await;
        axis.set_conversion(factor).unwrap();
        sim.set("XPR P", "-98765");

        let user = axis.position().await.unwrap();
        axis.move_to(user).await.unwrap();

        assert_eq!(last(&sim.log()), "XMA -98765", "factor {factor}");
        assert_eq!(axis.state(), OperationalState::Moving);
    }
}

#[tokio::test]
async fn set_position_writes_register_without_moving() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    axis.set_conversion(10.0).unwrap();

    axis.set_position(1.5).await.unwrap();

    assert_eq!(last(&sim.log()), "XP=15");
    assert_eq!(sim.get("XPR P").as_deref(), Some("15"));
    assert_eq!(axis.state(), OperationalState::On);
}

#[tokio::test]
async fn currents_and_micro_steps() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;

    assert_eq!(axis.hold_current().await.unwrap(), 5);
    assert_eq!(axis.run_current().await.unwrap(), 25);
    axis.set_run_current(80).await.unwrap();
    assert_eq!(axis.run_current().await.unwrap(), 80);

    assert_eq!(axis.micro_steps().await.unwrap(), 8);
    axis.set_micro_steps(2).await.unwrap();
    assert_eq!(last(&sim.log()), "XMS=4");
    assert_eq!(axis.micro_steps().await.unwrap(), 2);

    sim.set("XPR MS", "3");
    assert!(matches!(
        axis.micro_steps().await,
        Err(DriveError::Parse { .. })
    ));
}

#[tokio::test]
async fn empty_numeric_reply_is_an_error() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    sim.set("XPR P", "");

    assert!(matches!(
        axis.position().await,
        Err(DriveError::EmptyReply(_))
    ));
    assert_eq!(axis.state(), OperationalState::On);
}

#[tokio::test]
async fn homing_direction_flips_with_factor_sign() {
    let (link, sim) = sim_link(&["X"]).await;
    sim.set("XPR S1", "1,0,0");
    let axis = init_axis(&link, "X", LONG).await;

    let mut sent = Vec::new();
    for factor in [1.0, -1.0] {
        axis.set_conversion(factor).unwrap();
        assert!(axis.homing_plus().await.unwrap());
        let plus = last(&sim.log()).to_string();
        assert!(axis.homing_minus().await.unwrap());
        let minus = last(&sim.log()).to_string();
        sent.push((plus, minus));
    }

    assert_eq!(sent[0], ("XHM 3".to_string(), "XHM 1".to_string()));
    // plus(factor) == minus(-factor)
    assert_eq!(sent[0].0, sent[1].1);
    assert_eq!(sent[0].1, sent[1].0);
    assert_eq!(axis.state(), OperationalState::Moving);
}

#[tokio::test]
async fn homing_through_capability_trait() {
    let (link, sim) = sim_link(&["Y"]).await;
    sim.set("YPR S4", "1,0,0");
    let axis = init_axis(&link, "Y", LONG).await;

    assert!(axis.home(Direction::Minus).await.unwrap());
    assert_eq!(last(&sim.log()), "YHM 1");
}

#[tokio::test]
async fn jog_uses_fresh_velocity_and_factor_sign() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    axis.set_conversion(-2.0).unwrap();

    axis.jog_plus().await.unwrap();
    let log = sim.log();
    assert_eq!(&log[log.len() - 2..], ["XPR VM", "XSL -768"]);
    assert_eq!(axis.state(), OperationalState::Moving);

    sim.set("XPR VM", "100");
    axis.jog_minus().await.unwrap();
    assert_eq!(last(&sim.log()), "XSL 100");

    axis.stop().await.unwrap();
    assert_eq!(last(&sim.log()), "XSL 0");
    assert_eq!(axis.state(), OperationalState::On);
}

#[tokio::test]
async fn unknown_movement_unit_sends_nothing() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    sim.clear_log();

    assert_eq!(
        axis.set_movement_unit("furlong"),
        "input must be steps/mm/inch/degree"
    );
    assert_eq!(axis.movement_unit(), MovementUnit::Steps);

    assert_eq!(axis.set_movement_unit("mm"), "set movement unit to mm");
    assert_eq!(axis.movement_unit().velocity_label(), "mm/s");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sim.log().is_empty());
}

#[tokio::test]
async fn unacknowledged_write_faults_axis() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    sim.ignore("XMA 100");

    assert!(!axis.write("MA 100").await);
    assert_eq!(axis.state(), OperationalState::Fault);

    // No automatic retry.
    assert_eq!(
        sim.log().iter().filter(|l| l.as_str() == "XMA 100").count(),
        1
    );

    // The link remains usable for the next command.
    assert!(axis.write("MA 50").await);
}

#[tokio::test]
async fn save_to_eeprom() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;

    assert_eq!(
        axis.save_to_eeprom().await.unwrap(),
        "parameters saved to EEPROM"
    );
    assert_eq!(last(&sim.log()), "XS");
}

#[tokio::test]
async fn movable_relative_move_and_settle() {
    let (link, sim) = sim_link(&["X"]).await;
    let axis = init_axis(&link, "X", LONG).await;
    axis.set_conversion(2.0).unwrap();
    sim.set("XPR P", "200");

    axis.move_rel(5.0).await.unwrap();
    assert_eq!(last(&sim.log()), "XMA 210");
    assert_eq!(axis.state(), OperationalState::Moving);

    axis.wait_settled().await.unwrap();
    assert_eq!(axis.state(), OperationalState::On);
    assert_eq!(Movable::position(&axis).await.unwrap(), 105.0);

    Movable::stop(&axis).await.unwrap();
    assert_eq!(last(&sim.log()), "XSL 0");
}
