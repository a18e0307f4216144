//! Self-play reinforcement-learning training engine for chess.
//!
//! The crate is organized around a training-control substrate: a seed manager
//! deriving named deterministic streams, a bounded replay buffer, polymorphic
//! agents over a small neural kernel, a Gym-like chess environment, versioned
//! checkpoints, training-health validation, convergence detection, a parallel
//! self-play engine, and a lifecycle controller on top of the iteration
//! orchestrator.

// === Public Modules (The Canonical Paths) ===
pub mod agent;
pub mod checkpoint;
pub mod chess;
pub mod config;
pub mod control;
pub mod convergence;
pub mod error;
pub mod gym;
pub mod replay;
pub mod seed;
pub mod selfplay;
pub mod train;
pub mod validate;

// === Private Implementation Details ===
mod nn;

// === Facades (Re-exporting internals) ===
// Expose the neural kernel configuration without making the whole module
// public API surface.
pub use crate::nn::{Activation, Mlp, NetworkConfig, OptimizerKind, WeightInit};

// === Convenience ===
pub use crate::config::TrainingConfig;
pub use crate::control::{ControlResult, LifecycleController};
pub use crate::error::{CaissaError, CaissaResult};
pub use crate::train::{RunReport, TrainingOrchestrator};
