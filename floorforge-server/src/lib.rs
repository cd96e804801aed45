pub mod error;
pub mod routes;
pub mod settings;
pub mod state;
