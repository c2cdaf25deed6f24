//! p2p-desk - Core Library
//! Trade lifecycle engine for a P2P crypto desk: offers, requests, escrow, review

// Public modules
pub mod core;
pub mod feeds;
pub mod offers;
pub mod calculator;
pub mod ledger;
pub mod escrow;
pub mod desk;
pub mod viewer;
pub mod store;
pub mod accounts;
pub mod api;

// Re-exports
pub use core::{Config, Error, Result};
