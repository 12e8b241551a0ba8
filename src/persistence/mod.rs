//! Best-effort batched persistence for detections, agent logs, system
//! events, and traffic history. CSV files stand in for the relational
//! tables; all disk I/O runs on a dedicated worker thread.

pub mod gateway;
pub mod tables;
