pub mod commands;
pub mod controller;
pub mod event_bridge;
pub mod server;

pub use controller::{ControllerId, ControllerRegistry};
pub use server::{start, AppState, ServerConfig, ServerHandle};
