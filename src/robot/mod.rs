pub mod motor;

use std::{
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tracing::info;

use motor::{Direction, MotorController, MotorPins, MotorState, SimulatedDriver};

/// Motor duty in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Power(u8);

impl Power {
    pub const ZERO: Power = Power(0);
    pub const FULL: Power = Power(100);

    pub fn new(percent: u8) -> Self {
        Self(percent.min(100))
    }

    /// Clamps arbitrary client input into range. NaN maps to zero.
    pub fn clamped(raw: f64) -> Self {
        if raw.is_nan() {
            return Self::ZERO;
        }
        Self(raw.round().clamp(0.0, 100.0) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl Default for Power {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveCommand {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl DriveCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveCommand::Forward => "forward",
            DriveCommand::Backward => "backward",
            DriveCommand::Left => "left",
            DriveCommand::Right => "right",
            DriveCommand::Stop => "stop",
        }
    }
}

impl FromStr for DriveCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(DriveCommand::Forward),
            "backward" => Ok(DriveCommand::Backward),
            "left" => Ok(DriveCommand::Left),
            "right" => Ok(DriveCommand::Right),
            "stop" => Ok(DriveCommand::Stop),
            other => Err(format!("unknown drive command {other:?}")),
        }
    }
}

/// Snapshot of both motors, read back from the controllers on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RobotState {
    pub left_motor: MotorState,
    pub right_motor: MotorState,
}

struct Motors {
    left: MotorController,
    right: MotorController,
}

/// Differential drive over two motors. Calls are synchronous and short; the
/// mutex only serializes sessions issuing commands at the same time.
pub struct RobotController {
    motors: Mutex<Motors>,
}

impl RobotController {
    pub fn new(left: MotorController, right: MotorController) -> Self {
        Self {
            motors: Mutex::new(Motors { left, right }),
        }
    }

    pub fn simulated(left_pins: MotorPins, right_pins: MotorPins) -> Self {
        Self::new(
            MotorController::new("Left Motor", Box::new(SimulatedDriver::new(left_pins))),
            MotorController::new("Right Motor", Box::new(SimulatedDriver::new(right_pins))),
        )
    }

    pub fn move_forward(&self, power: Power) {
        let mut motors = self.motors();
        motors.left.forward(power);
        motors.right.forward(power);
    }

    pub fn move_backward(&self, power: Power) {
        let mut motors = self.motors();
        motors.left.backward(power);
        motors.right.backward(power);
    }

    pub fn turn_left(&self, power: Power) {
        let mut motors = self.motors();
        motors.left.backward(power);
        motors.right.forward(power);
    }

    pub fn turn_right(&self, power: Power) {
        let mut motors = self.motors();
        motors.left.forward(power);
        motors.right.backward(power);
    }

    pub fn stop(&self) {
        let mut motors = self.motors();
        motors.left.stop();
        motors.right.stop();
    }

    /// Runs one drive command and returns the resulting state.
    pub fn execute(&self, command: DriveCommand, power: Power) -> RobotState {
        match command {
            DriveCommand::Forward => self.move_forward(power),
            DriveCommand::Backward => self.move_backward(power),
            DriveCommand::Left => self.turn_left(power),
            DriveCommand::Right => self.turn_right(power),
            DriveCommand::Stop => self.stop(),
        }
        self.get_state()
    }

    /// Applies a new duty to motors that are currently driving. Returns
    /// whether any motor was moving.
    pub fn set_power(&self, power: Power) -> bool {
        let mut guard = self.motors();
        let motors = &mut *guard;
        let mut moving = false;
        for motor in [&mut motors.left, &mut motors.right] {
            if motor.direction() != Direction::Off {
                motor.set_pwm(power);
                moving = true;
            }
        }
        moving
    }

    pub fn is_moving(&self) -> bool {
        let motors = self.motors();
        motors.left.direction() != Direction::Off || motors.right.direction() != Direction::Off
    }

    pub fn get_state(&self) -> RobotState {
        let motors = self.motors();
        RobotState {
            left_motor: motors.left.state(),
            right_motor: motors.right.state(),
        }
    }

    /// Stops both motors and hands the pins back. Called once on shutdown.
    pub fn cleanup(&self) {
        let mut motors = self.motors();
        motors.left.release();
        motors.right.release();
        info!("motors released");
    }

    fn motors(&self) -> MutexGuard<'_, Motors> {
        self.motors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
