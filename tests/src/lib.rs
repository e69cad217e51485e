//! # Message-Dispatch Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Cross-component dispatch scenarios
//!     ├── delivery.rs   # Strategy matrix, ordering, replay
//!     └── lifecycle.rs  # Clears, resets, local dispatch, counters
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p dispatch-tests
//!
//! # By category
//! cargo test -p dispatch-tests integration::
//!
//! # Benchmarks
//! cargo bench -p dispatch-tests
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;

use std::sync::Once;

/// Install a fmt subscriber once for the whole test binary; `RUST_LOG`
/// selects the level. Repeated calls are no-ops.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
