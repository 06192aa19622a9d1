//! Booking Service - lesson reservations with escrow payments and live notifications.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod store;
