//! Subscription Service - subscription lifecycle and balance billing.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
