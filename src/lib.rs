pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod drain;
pub mod error;
pub mod events;
pub mod service;
pub mod shutdown;
pub mod simulation;
