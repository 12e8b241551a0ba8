pub mod junction;
pub mod network;
pub mod road;
pub mod vehicle;
