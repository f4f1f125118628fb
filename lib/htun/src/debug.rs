/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::Level;

pub const TUNNEL_DEBUG_LOG_LEVEL: Level = Level::Debug;
pub const TUNNEL_DEBUG_LOG_TARGET: &str = "";

#[macro_export]
macro_rules! log_msg {
    ($s:literal, $($arg:tt)+) => (
        log::log!(target: $crate::TUNNEL_DEBUG_LOG_TARGET, $crate::TUNNEL_DEBUG_LOG_LEVEL, concat!(": ", $s), $($arg)+)
    )
}
