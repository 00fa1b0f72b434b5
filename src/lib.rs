//! Mizani Factor Scoring Library
//!
//! This library provides the core components for the Mizani multi-factor
//! composite scoring engine and its dependency-gated batch pipeline.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
