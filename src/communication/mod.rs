pub mod event_bridge;
