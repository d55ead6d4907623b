//! Hardware-abstraction traits the device state machine is generic over.
//!
//! The concrete register layout of the microcontroller (GPIO, USART, timer
//! peripherals) is a collaborator this crate never names directly. A board
//! support package implements these traits against real registers; this
//! crate only ever sees the bank-indexed view below.

/// The 16 digital output lines.
pub trait OutputBank {
    /// Drive output `output` (< [`crate::NUM_OUTPUTS`]) to `level`.
    fn set(&mut self, output: u8, level: bool);
}

/// The 8 digital input lines.
pub trait InputBank {
    /// Sample input `input` (< [`crate::NUM_INPUTS`]).
    fn get(&self, input: u8) -> bool;
}

/// The USART "data register empty" transmit interrupt.
///
/// Any state transition that raises a pending-transmit flag must call
/// [`TxGate::enable`]; the byte-selection loop disables it again once
/// [`crate::DeviceState::next_tx_byte`] returns `None`. Forgetting to enable
/// it stalls delivery indefinitely — there is no other trigger that re-polls
/// the pending flags.
pub trait TxGate {
    fn enable(&mut self);
    fn disable(&mut self);
}
