pub mod config;
pub mod document;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

pub use routes::build_router;
pub use state::AppState;
