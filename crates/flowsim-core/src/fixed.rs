use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Virtual simulation time. Non-negative and monotonically non-decreasing
/// over a run. Every interval the model uses (0.5, 1, 3, ...) is exact.
pub type SimTime = Fixed64;

/// Order priority. Lower values are served first. Shares the time type so a
/// creation timestamp can be used directly as a FIFO-by-age priority.
pub type Priority = Fixed64;

/// Convert an f64 to a [`SimTime`]. Use for configuration and tests only.
#[inline]
pub fn time(v: f64) -> SimTime {
    SimTime::from_num(v)
}

/// Convert a [`SimTime`] to f64 for display.
#[inline]
pub fn time_to_f64(t: SimTime) -> f64 {
    t.to_num::<f64>()
}

/// Scale a duration by an integer count, saturating on overflow.
#[inline]
pub fn scale(duration: SimTime, count: u32) -> SimTime {
    duration.saturating_mul(SimTime::from_num(count))
}

/// Serde adapter that reads and writes [`SimTime`] as a plain decimal number,
/// so configuration documents can say `conveyor_cycle_time = 3.0`.
pub mod serde_time {
    use super::{SimTime, time_to_f64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SimTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(time_to_f64(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SimTime, D::Error> {
        let v = f64::deserialize(d)?;
        SimTime::checked_from_num(v)
            .ok_or_else(|| serde::de::Error::custom(format!("time value {v} is out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_steps_are_exact() {
        let mut t = SimTime::ZERO;
        for _ in 0..6 {
            t += time(0.5);
        }
        assert_eq!(t, time(3.0));
    }

    #[test]
    fn scale_multiplies() {
        assert_eq!(scale(time(1.5), 4), time(6.0));
        assert_eq!(scale(time(2.0), 0), SimTime::ZERO);
    }

    #[test]
    fn scale_saturates() {
        assert_eq!(scale(SimTime::MAX, 2), SimTime::MAX);
    }

    #[test]
    fn ordering_is_total() {
        assert!(time(0.5) < time(1.0));
        assert_eq!(time(2.0).max(time(1.0)), time(2.0));
    }

    #[test]
    fn round_trip_display_value() {
        assert_eq!(time_to_f64(time(20.25)), 20.25);
    }
}
