pub mod admin;
pub mod app;
pub mod config;
pub mod error;
pub mod hub;
pub mod lock;
pub mod ot;
pub mod presence;
pub mod ws;
