//! Lornu AI Compute Library
//!
//! Multi-provider compute system enumeration, create-operation tracking and
//! state change broadcasts.

pub mod api;
pub mod compute;
pub mod config;

pub use compute::{ComputeSystemManager, FanOutCoordinator, HttpComputeSystemProvider};
pub use config::ComputeConfig;
