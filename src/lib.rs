//! Booking lifecycle and availability engine for a peer-to-peer vehicle
//! rental marketplace.
//!
//! State lives in memory behind per-vehicle locks. Every accepted
//! mutation is journaled before it is applied, so a restart replays the
//! journal and lands in the same place. Payments and identity checks sit
//! behind the [`gateway`] traits: the engine instructs money movement
//! and never treats a booking as paid without an acknowledgment.
//!
//! Embedders spawn [`reaper::run_reaper`] and [`reaper::run_compactor`]
//! next to the engine; the constructor itself starts only the journal
//! writer task.

pub mod cancellation;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod inspection;
pub mod journal;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reaper;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
