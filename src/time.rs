//! Virtual timestamps
//!
//! Simulation time is a plain number of seconds since an arbitrary epoch.
//! `SimTime` carries a total order via `f64::total_cmp` so it can key the
//! event heap; durations are bare `f64` seconds.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in virtual time, in seconds.
///
/// NaN values are never constructed by the simulator; the `Ord` impl uses
/// IEEE-754 total ordering so the type stays usable as a heap key regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    /// The simulation epoch
    pub const ZERO: SimTime = SimTime(0.0);

    /// Construct from seconds since the epoch
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Seconds since the epoch
    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is later)
    pub fn duration_since(self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, secs: f64) -> SimTime {
        SimTime(self.0 + secs)
    }
}

impl Sub<f64> for SimTime {
    type Output = SimTime;

    fn sub(self, secs: f64) -> SimTime {
        SimTime(self.0 - secs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let a = SimTime::from_secs(1.0);
        let b = SimTime::from_secs(2.0);
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn test_arithmetic() {
        let t = SimTime::from_secs(10.0) + 5.0;
        assert_eq!(t.as_secs(), 15.0);
        assert_eq!(t.duration_since(SimTime::from_secs(5.0)), 10.0);
        assert_eq!((t - 5.0).as_secs(), 10.0);
    }
}
