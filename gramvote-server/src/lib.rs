pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod store;

pub use http::AppState;
pub use lifecycle::Engine;
