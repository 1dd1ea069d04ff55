//! Bouncer - HTTP admission control
//!
//! This crate decides, per incoming HTTP request, whether a caller may reach
//! the application. Callers are identified by API key or, failing that, by
//! client IP, and counted in a fixed one-second window held in a shared
//! counting store. A caller exceeding its limit is rejected and blacklisted
//! for a configured penalty period.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod web;
