//! Towerlight: drive a printer's tower light and UI badge from its lifecycle state.

pub mod broadcast;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod output;
pub mod strobe;

pub use error::TowerLightError;
