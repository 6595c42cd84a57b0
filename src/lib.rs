//! Receive a partitioned event stream as one merged sequence.
//!
//! One listener task per partition feeds a shared bounded channel; the
//! channel closes only after every listener has shut down. The CLI in
//! [`commands`] wires this to Kafka and either logs events or renders a
//! live counter.

pub mod commands;
pub mod config;
pub mod counter;
pub mod error;
pub mod kafka;
pub mod produce;
pub mod receive;
pub mod session;
pub mod test_utils;
pub mod transport;
