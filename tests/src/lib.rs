//! # Stone Test Suite
//!
//! Unified test crate for flows that cross crate boundaries.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs          # StoneApplication → adapter → kernel → response
//!     └── e2e_lifecycle.rs  # Kernel lifecycle over a built blueprint
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p stone-tests
//! cargo test -p stone-tests integration::flows::
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
