//! # sigma-client
//!
//! Async client for the SigmaTCP protocol.  Talks to a bridge daemon over TCP
//! and exposes memory, fixed-point parameter, filter and programming
//! operations for one remote DSP.
//!
//! # Modules
//!
//! - **`error`** – [`ClientError`], the single error type of the crate.
//! - **`client`** – [`SigmaClient`] and its connection settings.

pub mod client;
pub mod error;

pub use client::{SigmaClient, SigmaClientConfig};
pub use error::ClientError;
