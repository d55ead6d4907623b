//! # sermio-hostd
//!
//! Host-side daemon for the serial I/O control link. Owns one [`Device`]
//! per attached board: reconciles `Output`/`Input` RPC calls against the
//! device's acknowledged state, retries in-flight commands on a timer, and
//! resyncs the link (handshake + full output read) whenever the device
//! reports protocol loss.
//!
//! The RPC transport itself — whatever publishes [`OutputHandle`] and
//! [`InputHandle`] methods to external callers — is this crate's
//! collaborator, not its concern; [`Device::run`] only needs a duplex byte
//! stream and hands out handles any transport can wrap.

mod command;
mod connection;
mod device;
mod error;
mod input;
mod output;

pub use command::{InputHandle, OutputHandle};
pub use connection::{open, FlushQueues, BAUD_RATE};
pub use device::Device;
pub use error::HostdError;
