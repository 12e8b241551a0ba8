pub mod simulation_feed;
