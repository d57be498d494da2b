//! CLI command implementations.

pub mod bench;
pub mod common;
pub mod compare;
pub mod plan;
pub mod render;
