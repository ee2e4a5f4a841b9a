//! Location and time tracking from the terminal. A tracking session samples the device
//! position and stores every sample with the backend, while the dashboard summarizes what
//! every user did today.
//!

pub mod analysis;
pub mod auth;
pub mod cli;
pub mod config;
pub mod location_api;
pub mod store;
pub mod tracker;
pub mod utils;
