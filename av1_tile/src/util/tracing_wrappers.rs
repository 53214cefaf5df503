// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![allow(unused_imports, unused_macros)]

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(not(feature = "tracing"))]
pub use av1_macros::noop as instrument;

// Defined under a private name; `warn` would collide with the built-in lint
// attribute when re-exported directly.
#[cfg(not(feature = "tracing"))]
macro_rules! __noop_log {
    ($($arg:tt)+) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {
    __noop_log as debug, __noop_log as error, __noop_log as info, __noop_log as trace,
    __noop_log as warn,
};

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn log_macros_accept_format_arguments() {
        let value = 3;
        debug!(value, "debug {}", value);
        info!("info {value}");
        warn!("warn {}", value + 1);
        error!(?value, "error");
        trace!("trace");
    }
}
