//! Congestion prediction: statistical forecasting over the density
//! history, level classification with deduplicated alerts, an auxiliary
//! RL value-function risk signal, and the periodic broadcast service.

pub mod broadcast;
pub mod classifier;
pub mod engine;
pub mod rl_value;
