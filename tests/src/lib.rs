//! # Notification Gateway Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks for the hot pure functions
//! └── src/integration/  # End-to-end flows over the public API
//!     ├── harness.rs        # Gateway wired to in-memory fakes
//!     ├── lifecycle_flows.rs
//!     ├── http_flows.rs
//!     └── realtime_flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p gateway-tests
//! cargo test -p gateway-tests integration::http_flows
//! cargo bench -p gateway-tests
//! ```

#![allow(dead_code)]

pub mod integration;
