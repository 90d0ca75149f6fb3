// Library exports for the Warden process supervisor

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod process;
