use std::{fmt, str::FromStr};

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::debug;

use super::Power;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Off,
}

/// H-bridge wiring for one motor: two direction inputs and a PWM enable pin
/// (BCM numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPins {
    pub input1: u8,
    pub input2: u8,
    pub pwm: u8,
}

impl MotorPins {
    pub const fn new(input1: u8, input2: u8, pwm: u8) -> Self {
        Self { input1, input2, pwm }
    }
}

impl fmt::Display for MotorPins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.input1, self.input2, self.pwm)
    }
}

impl FromStr for MotorPins {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pins = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u8>()
                    .with_context(|| format!("invalid pin number {part:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let &[input1, input2, pwm] = pins.as_slice() else {
            bail!("expected three pins (input1,input2,pwm), got {s:?}");
        };
        Ok(Self::new(input1, input2, pwm))
    }
}

/// Pin-level boundary of a motor. Implementations own the GPIO handles.
pub trait MotorDriver: Send {
    fn set_direction(&mut self, direction: Direction);
    fn set_duty(&mut self, power: Power);
    fn release(&mut self);
}

/// Driver that only tracks pin levels and logs them. Stands in for GPIO on
/// machines without an H-bridge attached.
#[derive(Debug)]
pub struct SimulatedDriver {
    pins: MotorPins,
    levels: (bool, bool),
    duty: Power,
}

impl SimulatedDriver {
    pub fn new(pins: MotorPins) -> Self {
        Self {
            pins,
            levels: (false, false),
            duty: Power::ZERO,
        }
    }

    #[cfg(test)]
    pub fn levels(&self) -> (bool, bool) {
        self.levels
    }

    #[cfg(test)]
    pub fn duty(&self) -> Power {
        self.duty
    }
}

impl MotorDriver for SimulatedDriver {
    fn set_direction(&mut self, direction: Direction) {
        self.levels = match direction {
            Direction::Forward => (true, false),
            Direction::Backward => (false, true),
            Direction::Off => (false, false),
        };
        debug!(
            pin1 = self.pins.input1,
            pin2 = self.pins.input2,
            levels = ?self.levels,
            "gpio direction"
        );
    }

    fn set_duty(&mut self, power: Power) {
        self.duty = power;
        debug!(pin = self.pins.pwm, duty = power.percent(), "gpio pwm duty");
    }

    fn release(&mut self) {
        debug!(pins = %self.pins, last_duty = self.duty.percent(), "gpio released");
        self.levels = (false, false);
        self.duty = Power::ZERO;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MotorState {
    pub name: String,
    pub state: Direction,
    pub power: Power,
}

pub struct MotorController {
    name: String,
    driver: Box<dyn MotorDriver>,
    direction: Direction,
    power: Power,
}

impl MotorController {
    pub fn new(name: impl Into<String>, driver: Box<dyn MotorDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
            direction: Direction::Off,
            power: Power::ZERO,
        }
    }

    pub fn forward(&mut self, power: Power) {
        self.drive(Direction::Forward, power);
    }

    pub fn backward(&mut self, power: Power) {
        self.drive(Direction::Backward, power);
    }

    pub fn stop(&mut self) {
        self.drive(Direction::Off, Power::ZERO);
    }

    pub fn set_pwm(&mut self, power: Power) {
        self.power = power;
        self.driver.set_duty(power);
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> MotorState {
        MotorState {
            name: self.name.clone(),
            state: self.direction,
            power: self.power,
        }
    }

    pub fn release(&mut self) {
        self.stop();
        self.driver.release();
    }

    fn drive(&mut self, direction: Direction, power: Power) {
        self.driver.set_direction(direction);
        self.set_pwm(power);
        self.direction = direction;
    }
}
