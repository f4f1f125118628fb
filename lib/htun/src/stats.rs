/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Clone, Copy)]
pub struct TunnelStatsSnapshot {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub get_requests: u64,
    pub post_requests: u64,
}

#[derive(Default)]
pub struct TunnelStats {
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    get_requests: AtomicU64,
    post_requests: AtomicU64,
}

impl TunnelStats {
    pub(crate) fn add_read_bytes(&self, size: u64) {
        self.read_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn add_write_bytes(&self, size: u64) {
        self.write_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn add_get_request(&self) {
        self.get_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_post_request(&self) {
        self.post_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TunnelStatsSnapshot {
        TunnelStatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            get_requests: self.get_requests.load(Ordering::Relaxed),
            post_requests: self.post_requests.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_snapshot() {
        let stats = TunnelStats::default();
        stats.add_read_bytes(100);
        stats.add_write_bytes(200);
        stats.add_get_request();
        stats.add_post_request();
        stats.add_post_request();

        let snap = stats.snapshot();
        assert_eq!(snap.read_bytes, 100);
        assert_eq!(snap.write_bytes, 200);
        assert_eq!(snap.get_requests, 1);
        assert_eq!(snap.post_requests, 2);
    }
}
