pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod models;
pub mod planner;
pub mod progress;
pub mod providers;
pub mod rain;
pub mod refresh;
pub mod ride_log;
pub mod runtime;
pub mod session;
pub mod speed;

pub use api::{create_router, AppState};
