pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod payments;
pub mod schema;
pub mod status;
pub mod validation;
