//! Nexus Core - Formula-driven derived stats for RPG entities

pub mod attributes;
pub mod classes;
pub mod core;
pub mod engine;
pub mod formula;
pub mod lifecycle;
pub mod pipeline;
pub mod profile;

pub use engine::NexusEngine;
