//! WebInsight - Website Analysis Gateway
//!
//! This crate gates an expensive website analysis pipeline behind an
//! IP-scoped rate limiter. Anonymous clients are counted against an hourly
//! and a daily fixed window kept in Redis, with an in-process store taking
//! over for any call Redis cannot serve.

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
