//! Incident reporting and backward route reconstruction from the
//! detection history.

pub mod inference;
