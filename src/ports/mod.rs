//! # Ports
//!
//! Outbound contracts the domain depends on, kept free of any concrete
//! storage engine.

pub mod database;

pub use database::*;
