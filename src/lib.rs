mod image_utils;
mod routes;
mod server;
mod stream;

pub mod app;
pub mod camera;
pub mod config;
pub mod controller;
pub mod detection;
pub mod display;
pub mod overlay;
pub mod sampler;
pub mod session;
pub mod status;
pub mod telemetry;

pub use app::{build_controller, start_app};
