// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use hba_msgs::iocfc::{IntrAttr, ResourceCounts};
use hba_msgs::{MAX_SLOT_SIZE, MIN_SLOT_SIZE, SLOT_UNIT};
use msgq::Geometry;
use serde::Deserialize;

use crate::error::ConfigError;

/// Deepest ring the firmware will accept.
pub const MAX_RING_DEPTH: u16 = 1024;

/// Per-adapter settings. Every field has a default, so a configuration file
/// only needs to name what it changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HbaConfig {
    pub reqq_depth: u16,
    pub rspq_depth: u16,
    pub reqq_slot_size: u16,
    pub rspq_slot_size: u16,
    /// Resources asked of the firmware during negotiation. The grant may be
    /// smaller but never larger.
    pub resources: ResourceCounts,
    /// Interrupt coalescing used until a persisted setting replaces it.
    pub intr: IntrAttr,
    pub heartbeat_ms: u64,
    /// How long a mailbox request may go unanswered.
    pub ioc_timeout_ms: u64,
    /// Retry interval while another function holds the semaphore.
    pub sem_retry_ms: u64,
}

impl Default for HbaConfig {
    fn default() -> Self {
        Self {
            reqq_depth: 64,
            rspq_depth: 64,
            reqq_slot_size: 128,
            rspq_slot_size: 64,
            resources: ResourceCounts {
                io_contexts: 2000,
                task_mgmt: 128,
                exchanges: 64,
                remote_ports: 256,
                unsolicited_bufs: 64,
                logins: 16,
            },
            intr: IntrAttr {
                coalesce: true,
                delay_us: 1125,
                latency_us: 225,
            },
            heartbeat_ms: 500,
            ioc_timeout_ms: 3000,
            sem_retry_ms: 500,
        }
    }
}

impl HbaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for depth in [self.reqq_depth, self.rspq_depth] {
            if !(2..=MAX_RING_DEPTH).contains(&depth)
                || !depth.is_power_of_two()
            {
                return Err(ConfigError::Depth(depth));
            }
        }
        for slot in [self.reqq_slot_size, self.rspq_slot_size] {
            let s = usize::from(slot);
            if !(MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&s)
                || s % SLOT_UNIT != 0
            {
                return Err(ConfigError::SlotSize(slot));
            }
        }
        if self.heartbeat_ms == 0
            || self.ioc_timeout_ms == 0
            || self.sem_retry_ms == 0
        {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn reqq_geometry(&self) -> Result<Geometry, ConfigError> {
        Ok(Geometry::new(self.reqq_depth, self.reqq_slot_size)?)
    }

    pub fn rspq_geometry(&self) -> Result<Geometry, ConfigError> {
        Ok(Geometry::new(self.rspq_depth, self.rspq_slot_size)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        HbaConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_depth() {
        let c = HbaConfig {
            reqq_depth: 48,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Depth(48)));
        let c = HbaConfig {
            rspq_depth: 2048,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Depth(2048)));
    }

    #[test]
    fn rejects_bad_slot() {
        let c = HbaConfig {
            rspq_slot_size: 80,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::SlotSize(80)));
        let c = HbaConfig {
            reqq_slot_size: 32,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::SlotSize(32)));
    }

    #[test]
    fn rejects_zero_interval() {
        let c = HbaConfig {
            heartbeat_ms: 0,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::ZeroInterval));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: HbaConfig = toml::from_str(
            r#"
            reqq_depth = 8
            heartbeat_ms = 100

            [resources]
            io_contexts = 512
            "#,
        )
        .unwrap();
        assert_eq!(c.reqq_depth, 8);
        assert_eq!(c.heartbeat_ms, 100);
        assert_eq!(c.resources.io_contexts, 512);
        // Unnamed resource counts fall back to zero, not to our defaults;
        // `ResourceCounts` has its own `Default`.
        assert_eq!(c.resources.logins, 0);
        assert_eq!(c.rspq_depth, HbaConfig::default().rspq_depth);
        c.validate().unwrap();
    }
}
