//! Race Configuration
//!
//! Defaults match the shipped tuning; every field can be overridden from
//! the environment with `RaceConfig::from_env`.

use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::network::protocol::WireFormat;
use crate::{DEFAULT_COUNTDOWN_SECONDS, DEFAULT_TICK_RATE, FINISH_TIME_QUANTUM};

/// Vehicle drive tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarConfig {
    /// Speed above which forward throttle stops accelerating (units/s).
    pub max_speed: f32,
    /// Throttle acceleration at full input (units/s²).
    pub acceleration: f32,
    /// Steering angular acceleration at full input and rest (deg/s²).
    pub turn_speed: f32,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            max_speed: 20.0,
            acceleration: 10.0,
            turn_speed: 90.0,
        }
    }
}

/// Race configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Countdown length in whole seconds of simulation time.
    pub countdown_seconds: u32,
    /// Finish times are rounded to the nearest multiple of this.
    pub finish_quantum: f64,
    /// Host simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Give up waiting for the race start instant after this long.
    /// `None` waits until the session ends.
    pub start_timeout: Option<Duration>,
    /// Poll interval while waiting for remote vehicles to appear.
    pub vehicle_poll_interval: Duration,
    /// Encoding of replicated race results.
    pub wire_format: WireFormat,
    /// Vehicle tuning.
    pub car: CarConfig,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            finish_quantum: FINISH_TIME_QUANTUM,
            tick_rate: DEFAULT_TICK_RATE,
            start_timeout: None,
            vehicle_poll_interval: Duration::from_millis(50),
            wire_format: WireFormat::Json,
            car: CarConfig::default(),
        }
    }
}

impl RaceConfig {
    /// Create config from environment variables.
    ///
    /// Missing or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let car = CarConfig {
            max_speed: parse_or(&lookup, "RACE_CAR_MAX_SPEED", defaults.car.max_speed),
            acceleration: parse_or(&lookup, "RACE_CAR_ACCELERATION", defaults.car.acceleration),
            turn_speed: parse_or(&lookup, "RACE_CAR_TURN_SPEED", defaults.car.turn_speed),
        };

        Self {
            countdown_seconds: parse_or(
                &lookup,
                "RACE_COUNTDOWN_SECONDS",
                defaults.countdown_seconds,
            ),
            finish_quantum: parse_or(&lookup, "RACE_FINISH_QUANTUM", defaults.finish_quantum),
            tick_rate: parse_or(&lookup, "RACE_TICK_RATE", defaults.tick_rate).max(1),
            start_timeout: lookup("RACE_START_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .or(defaults.start_timeout),
            vehicle_poll_interval: defaults.vehicle_poll_interval,
            wire_format: parse_or(&lookup, "RACE_WIRE_FORMAT", defaults.wire_format),
            car,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
