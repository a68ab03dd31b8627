//! Block structures and handling
//!
//! Provides core block data structures and utilities for the weisyn chain.

pub mod core;

pub use self::core::*;
