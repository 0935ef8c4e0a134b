//! Multi-tenant payment transaction engine.
//!
//! Drives authorizations, sales, captures, voids, refunds and ACH pre-notes
//! through an external card/ACH gateway, with idempotent requests, a
//! two-tier token model and bank-account verification.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;
pub mod interfaces;
