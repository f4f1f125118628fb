/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

// An idle timeout below a few idle intervals would tear connections down
// before a single request could be finalized.
const MINIMUM_IDLE_TIMEOUT_INTERVALS: u32 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TunnelConfig {
    /// Writer-side quiet period after which the outbound request in
    /// progress is finalized so intermediaries flush it downstream.
    pub idle_interval: Duration,
    /// Overall inactivity budget after which the connection self-closes.
    /// The high default is tuned for sparse traffic such as XMPP pings.
    pub idle_timeout: Duration,
    /// Upper bound on the size of a response head.
    pub max_header_size: usize,
    /// Depth of the write submission queue. A writer outrunning the proxy
    /// blocks once this many submissions are in flight.
    pub write_queue_depth: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        TunnelConfig {
            idle_interval: Duration::from_millis(15),
            idle_timeout: Duration::from_secs(70),
            max_header_size: 4096,
            write_queue_depth: 16,
        }
    }
}

impl TunnelConfig {
    pub fn sanitize(&mut self) {
        if self.write_queue_depth == 0 {
            self.write_queue_depth = 1;
        }
        let floor = self.idle_interval * MINIMUM_IDLE_TIMEOUT_INTERVALS;
        if self.idle_timeout < floor {
            self.idle_timeout = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = TunnelConfig::default();
        assert_eq!(config.idle_interval, Duration::from_millis(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(70));
    }

    #[test]
    fn clamp_idle_timeout() {
        let mut config = TunnelConfig {
            idle_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.idle_timeout, Duration::from_millis(400));
    }

    #[test]
    fn clamp_queue_depth() {
        let mut config = TunnelConfig {
            write_queue_depth: 0,
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.write_queue_depth, 1);
    }
}
