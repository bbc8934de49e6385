pub mod choices;
pub mod config;
pub mod deterministic;
pub mod sarsa;
pub mod shared;
pub mod traces;
