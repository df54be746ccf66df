//! Tether CLI - coordinated requests, batched writes and shared state from a shell.
//!
//! The binary is a thin layer over `tether-runtime`: every command builds the
//! runtime components it needs from the merged configuration, runs once and
//! reports through the structured output envelope in [`output`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod indicator;
pub mod logging;
pub mod output;
pub mod styles;
