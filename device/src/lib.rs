//! # sermio-device
//!
//! Firmware-side state machine for the serial I/O control link. This crate
//! owns the behavior the original AVR firmware for this link carried — the
//! periodic output/input tickers, the watchdog countdown, and the USART
//! byte handlers — as a single [`DeviceState`] struct driven entirely by
//! `&mut self` calls from the caller's interrupt handlers.
//!
//! There are no global statics and no interior mutability anywhere in this
//! crate: the board support package owns one `DeviceState` and one set of
//! hardware handles, and passes `&mut` references into whichever entry
//! point its interrupt vector calls. This mirrors how the hardware itself
//! serializes access (only one interrupt runs at a time), without needing a
//! critical section type to say so.

#![cfg_attr(not(test), no_std)]

mod hal;
mod state;

pub use hal::{InputBank, OutputBank, TxGate};
pub use sermio_proto::{DeviceToHost, HostToDevice, WatchdogCmd, WatchdogEvent};
pub use state::{DeviceState, LONG_PULSE_TICKS, SHORT_PULSE_TICKS};

/// Number of digital outputs the device drives.
pub use sermio_proto::NUM_OUTPUTS;
/// Number of digital inputs the device samples.
pub use sermio_proto::NUM_INPUTS;

/// Ticker frequency in Hz. The board support package's timer interrupt must
/// fire at this rate and call the `*_tick` entry points once per firing.
pub const HZ: u8 = 50;
