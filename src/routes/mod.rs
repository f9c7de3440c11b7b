pub mod alerts;
pub mod events;
pub mod health;
pub mod monitor;
pub mod performance;
