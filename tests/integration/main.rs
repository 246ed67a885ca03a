//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` maps to a file exercising one lifecycle area against mock
//! adapters. Everything runs on the host with no hardware.

mod connectivity_tests;
mod lifecycle_tests;
mod mocks;
mod provisioning_tests;
mod store_tests;
