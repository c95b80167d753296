//! Operation times and capacities for one simulation run.

use crate::fixed::{SimTime, time};
use serde::{Deserialize, Serialize};

/// Every tunable constant of the model. Times are in simulation units.
///
/// All fields default individually, so a partial document only overrides
/// what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Interval between two conveyor shifts.
    #[serde(with = "crate::fixed::serde_time")]
    pub conveyor_cycle_time: SimTime,
    /// Handoff delay of pallet buffers (including the depalletizer's).
    #[serde(with = "crate::fixed::serde_time")]
    pub pallet_buffer_process_time: SimTime,
    /// Handoff delay of batch builder buffers and item warehouse infeed.
    #[serde(with = "crate::fixed::serde_time")]
    pub batch_buffer_process_time: SimTime,
    /// Delay between a pallet arriving at a depalletizer and the first item.
    #[serde(with = "crate::fixed::serde_time")]
    pub depalletizing_delay: SimTime,
    /// Time to move one item (depalletizing and picking).
    #[serde(with = "crate::fixed::serde_time")]
    pub item_process_time: SimTime,
    /// Longest a batch may accumulate before it is released anyway.
    #[serde(with = "crate::fixed::serde_time")]
    pub batch_max_wait_time: SimTime,
    /// Time the warehouse spends merging an order onto a pallet.
    #[serde(with = "crate::fixed::serde_time")]
    pub order_merge_time: SimTime,
    /// Interval of the inventory manager's demand scan.
    #[serde(with = "crate::fixed::serde_time")]
    pub requested_item_scan_interval: SimTime,
    /// Interval of the item warehouse's order-matching sweep.
    #[serde(with = "crate::fixed::serde_time")]
    pub order_sweep_interval: SimTime,
    /// Backpressure polling interval.
    #[serde(with = "crate::fixed::serde_time")]
    pub poll_interval: SimTime,
    /// Junction retry interval when no port can take a unit.
    #[serde(with = "crate::fixed::serde_time")]
    pub junction_retry_interval: SimTime,
    /// Item count at which a batch is ready.
    pub max_item_batch: u32,
    /// Size of the warehouse's empty-pallet pool.
    pub warehouse_pallet_capacity: usize,
    /// Total items the item warehouse can store.
    pub item_warehouse_item_capacity: u64,
    /// Pallet load limit in kilograms.
    pub pallet_max_weight: f64,
    /// Pallet load limit in cubic decimetres.
    pub pallet_max_volume: f64,
    /// Notifications each topic buffers between two deliveries. Older ones
    /// are dropped once a single kernel step publishes more than this.
    pub event_buffer_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            conveyor_cycle_time: time(3.0),
            pallet_buffer_process_time: time(3.0),
            batch_buffer_process_time: time(2.0),
            depalletizing_delay: time(1.0),
            item_process_time: time(1.0),
            batch_max_wait_time: time(10.0),
            order_merge_time: time(5.0),
            requested_item_scan_interval: time(20.0),
            order_sweep_interval: time(1.0),
            poll_interval: time(0.5),
            junction_retry_interval: time(1.0),
            max_item_batch: 10,
            warehouse_pallet_capacity: 25,
            item_warehouse_item_capacity: 500,
            pallet_max_weight: 1000.0,
            pallet_max_volume: 2112.0,
            event_buffer_capacity: 1024,
        }
    }
}

/// A configuration value outside its legal range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be negative (got {value})")]
    NegativeTime { field: &'static str, value: SimTime },
    #[error("{field} must be strictly positive")]
    NonPositive { field: &'static str },
}

impl SimConfig {
    /// Check every field. Periodic loops need a strictly positive interval,
    /// otherwise they would spin at a single instant forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("pallet_buffer_process_time", self.pallet_buffer_process_time),
            ("batch_buffer_process_time", self.batch_buffer_process_time),
            ("depalletizing_delay", self.depalletizing_delay),
            ("item_process_time", self.item_process_time),
            ("batch_max_wait_time", self.batch_max_wait_time),
            ("order_merge_time", self.order_merge_time),
        ];
        for (field, value) in non_negative {
            if value < SimTime::ZERO {
                return Err(ConfigError::NegativeTime { field, value });
            }
        }

        let positive = [
            ("conveyor_cycle_time", self.conveyor_cycle_time),
            ("requested_item_scan_interval", self.requested_item_scan_interval),
            ("order_sweep_interval", self.order_sweep_interval),
            ("poll_interval", self.poll_interval),
            ("junction_retry_interval", self.junction_retry_interval),
        ];
        for (field, value) in positive {
            if value <= SimTime::ZERO {
                return Err(ConfigError::NonPositive { field });
            }
        }

        if self.max_item_batch == 0 {
            return Err(ConfigError::NonPositive { field: "max_item_batch" });
        }
        if self.warehouse_pallet_capacity == 0 {
            return Err(ConfigError::NonPositive {
                field: "warehouse_pallet_capacity",
            });
        }
        if self.item_warehouse_item_capacity == 0 {
            return Err(ConfigError::NonPositive {
                field: "item_warehouse_item_capacity",
            });
        }
        if self.event_buffer_capacity == 0 {
            return Err(ConfigError::NonPositive {
                field: "event_buffer_capacity",
            });
        }
        if !(self.pallet_max_weight > 0.0) {
            return Err(ConfigError::NonPositive { field: "pallet_max_weight" });
        }
        if !(self.pallet_max_volume > 0.0) {
            return Err(ConfigError::NonPositive { field: "pallet_max_volume" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_cycle_time_rejected() {
        let cfg = SimConfig {
            conveyor_cycle_time: SimTime::ZERO,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "conveyor_cycle_time"
            })
        );
    }

    #[test]
    fn negative_delay_rejected() {
        let cfg = SimConfig {
            order_merge_time: time(-1.0),
            ..SimConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NegativeTime {
                field: "order_merge_time",
                ..
            })
        ));
    }

    #[test]
    fn zero_process_time_allowed() {
        let cfg = SimConfig {
            item_process_time: SimTime::ZERO,
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_event_buffer_rejected() {
        let cfg = SimConfig {
            event_buffer_capacity: 0,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "event_buffer_capacity"
            })
        );
    }

    #[test]
    fn nan_pallet_limits_rejected() {
        let cfg = SimConfig {
            pallet_max_volume: f64::NAN,
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
