//! Bouncer - Admission Control Service
//!
//! This crate decides whether a request may proceed based on how many
//! requests its IP address or access token has made in the current
//! one-second window, and blocks identities that exceed their limit for a
//! cooldown period. Counts and blocks live in a shared counter store so any
//! number of instances can enforce the same limits.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
