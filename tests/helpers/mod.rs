//! Shared test helpers for relay integration tests.
//!
//! Note: We use `helpers/mod.rs` instead of `helpers.rs` + `helpers/` because
//! Cargo auto-discovers top-level `.rs` files in `tests/` as integration tests.

pub mod effects;
pub mod fake_backend;
pub mod relay_harness;
