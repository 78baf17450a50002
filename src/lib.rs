pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod publisher;
pub mod routes;
pub mod state;
pub mod transport;
