//! Core library for the forgecore bare-metal inference engine.
//!
//! Built `no_std` in production; the `test` cfg relaxes this so the unit
//! test suites colocated with each module run under the ordinary `std`
//! harness (`cargo test`) instead of requiring a freestanding test runner.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), feature(alloc_error_handler))]
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

#[allow(special_module_name)]
pub mod lib;

pub mod build_info;
pub mod hal;
pub mod heap;
pub mod llm;
pub mod time;
