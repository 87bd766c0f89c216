//! Cross-crate integration flows.

pub mod e2e_lifecycle;
pub mod flows;
