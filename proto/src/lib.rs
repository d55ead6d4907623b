//! # sermio-proto
//!
//! Wire types for the serial I/O control link between the host daemon and
//! the device firmware (see the system overview this protocol was built
//! for). Every message on the wire is a single byte; this crate is the one
//! place that knows how to turn those bytes into typed commands and back,
//! so the two peers can never disagree about the byte layout.

#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

/// Number of digital outputs the device drives.
pub const NUM_OUTPUTS: u8 = 16;
/// Number of digital inputs the device samples.
pub const NUM_INPUTS: u8 = 8;

/// The 14-value handshake sequence, one value per handshake byte's low
/// nibble. A random byte stream reaches the end of this sequence with
/// probability 16^-14, which is what makes it usable as a noise filter
/// against line garbage or bootloader chatter.
pub const MAGIC: [u8; 14] = [0x4, 0xa, 0x7, 0x5, 0x6, 0x2, 0x6, 0xa, 0x7, 0x5, 0x6, 0x2, 0x2, 0x1];

/// `MAGIC`, rendered as the ASCII bytes `0x50 | MAGIC[k]`. This is the
/// literal 14-byte sequence the host writes to (re)initialize a link.
pub const MAGIC_INIT_BYTES: &[u8; 14] = b"TZWUVRVZWUVRRQ";

/// A byte received that does not match any known opcode, or is a command
/// byte received while the device is not yet `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError(pub u8);

/// The watchdog subcommand carried in a [`HostToDevice::Watchdog`] byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogCmd {
    Start,
    Poke,
    Stop,
}

/// The watchdog event carried in a [`DeviceToHost::Watchdog`] byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    PokeAck,
    Warn,
    StopAck,
    /// Optional diagnostic: the watchdog fired. `0x43`.
    Detonated,
}

/// A message sent from the host to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostToDevice {
    /// Short pulse on output `output` (`output` < [`NUM_OUTPUTS`]).
    PulseShort { output: u8 },
    /// Long pulse on output `output` (`output` < [`NUM_OUTPUTS`]).
    PulseLong { output: u8 },
    /// Set output `output` to `value`.
    SetOutput { output: u8, value: bool },
    /// Watchdog start/poke/stop.
    Watchdog(WatchdogCmd),
    /// One byte of the handshake sequence. `nibble` is the raw low-nibble
    /// value, i.e. the next expected entry of [`MAGIC`] if the handshake is
    /// progressing correctly.
    Handshake { nibble: u8 },
    /// Acknowledge input `input` (`input` < [`NUM_INPUTS`]) with the
    /// observed value.
    AckInput { input: u8, value: bool },
    /// Request the current committed state of output `output`.
    ReadOutput { output: u8 },
}

impl HostToDevice {
    pub fn to_byte(self) -> u8 {
        match self {
            HostToDevice::PulseShort { output } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x00 | output
            }
            HostToDevice::PulseLong { output } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x10 | output
            }
            HostToDevice::SetOutput { output, value } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x20 | output | (u8::from(value) << 4)
            }
            HostToDevice::Watchdog(cmd) => {
                0x40 | match cmd {
                    WatchdogCmd::Start => 0,
                    WatchdogCmd::Poke => 1,
                    WatchdogCmd::Stop => 2,
                }
            }
            HostToDevice::Handshake { nibble } => {
                debug_assert!(nibble < 16);
                0x50 | nibble
            }
            HostToDevice::AckInput { input, value } => {
                debug_assert!(input < NUM_INPUTS);
                0x60 | input | (u8::from(value) << 3)
            }
            HostToDevice::ReadOutput { output } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x70 | output
            }
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        let nibble = byte & 0x0f;
        match byte & 0xf0 {
            0x00 => Ok(HostToDevice::PulseShort { output: nibble }),
            0x10 => Ok(HostToDevice::PulseLong { output: nibble }),
            0x20 | 0x30 => Ok(HostToDevice::SetOutput {
                output: byte & 0x0f,
                value: (byte >> 4) & 1 != 0,
            }),
            0x40 => match nibble {
                0 => Ok(HostToDevice::Watchdog(WatchdogCmd::Start)),
                1 => Ok(HostToDevice::Watchdog(WatchdogCmd::Poke)),
                2 => Ok(HostToDevice::Watchdog(WatchdogCmd::Stop)),
                _ => Err(DecodeError(byte)),
            },
            0x50 => Ok(HostToDevice::Handshake { nibble }),
            0x60 => Ok(HostToDevice::AckInput {
                input: byte & 0x07,
                value: (byte >> 3) & 1 != 0,
            }),
            0x70 => Ok(HostToDevice::ReadOutput { output: nibble }),
            _ => Err(DecodeError(byte)),
        }
    }
}

/// A message sent from the device to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceToHost {
    /// Pulse started on output `output`.
    PulseStarted { output: u8 },
    /// Pulse finished on output `output`.
    PulseFinished { output: u8 },
    /// Output `output` is committed to `value`.
    OutputState { output: u8, value: bool },
    /// A watchdog event.
    Watchdog(WatchdogEvent),
    /// Protocol error / handshake requested. `0x50`.
    ProtocolError,
    /// Handshake complete; a full state dump follows. `0x51`.
    HandshakeComplete,
    /// Input `input` changed to `value`.
    InputChanged { input: u8, value: bool },
}

impl DeviceToHost {
    pub fn to_byte(self) -> u8 {
        match self {
            DeviceToHost::PulseStarted { output } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x00 | output
            }
            DeviceToHost::PulseFinished { output } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x10 | output
            }
            DeviceToHost::OutputState { output, value } => {
                debug_assert!(output < NUM_OUTPUTS);
                0x20 | output | (u8::from(value) << 4)
            }
            DeviceToHost::Watchdog(event) => {
                0x40 | match event {
                    WatchdogEvent::PokeAck => 0,
                    WatchdogEvent::Warn => 1,
                    WatchdogEvent::StopAck => 2,
                    WatchdogEvent::Detonated => 3,
                }
            }
            DeviceToHost::ProtocolError => 0x50,
            DeviceToHost::HandshakeComplete => 0x51,
            DeviceToHost::InputChanged { input, value } => {
                debug_assert!(input < NUM_INPUTS);
                0x60 | input | (u8::from(value) << 3)
            }
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        let nibble = byte & 0x0f;
        match byte & 0xf0 {
            0x00 => Ok(DeviceToHost::PulseStarted { output: nibble }),
            0x10 => Ok(DeviceToHost::PulseFinished { output: nibble }),
            0x20 | 0x30 => Ok(DeviceToHost::OutputState {
                output: byte & 0x0f,
                value: (byte >> 4) & 1 != 0,
            }),
            0x40 => match nibble {
                0 => Ok(DeviceToHost::Watchdog(WatchdogEvent::PokeAck)),
                1 => Ok(DeviceToHost::Watchdog(WatchdogEvent::Warn)),
                2 => Ok(DeviceToHost::Watchdog(WatchdogEvent::StopAck)),
                3 => Ok(DeviceToHost::Watchdog(WatchdogEvent::Detonated)),
                _ => Err(DecodeError(byte)),
            },
            0x50 => match nibble {
                0 => Ok(DeviceToHost::ProtocolError),
                1 => Ok(DeviceToHost::HandshakeComplete),
                _ => Err(DecodeError(byte)),
            },
            0x60 => Ok(DeviceToHost::InputChanged {
                input: byte & 0x07,
                value: (byte >> 3) & 1 != 0,
            }),
            _ => Err(DecodeError(byte)),
        }
    }
}

#[cfg(feature = "use-std")]
impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognized protocol byte {:#04x}", self.0)
    }
}

#[cfg(feature = "use-std")]
impl std::error::Error for DecodeError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_to_device_round_trips() {
        let cases = [
            HostToDevice::PulseShort { output: 3 },
            HostToDevice::PulseLong { output: 15 },
            HostToDevice::SetOutput { output: 0, value: false },
            HostToDevice::SetOutput { output: 9, value: true },
            HostToDevice::Watchdog(WatchdogCmd::Start),
            HostToDevice::Watchdog(WatchdogCmd::Poke),
            HostToDevice::Watchdog(WatchdogCmd::Stop),
            HostToDevice::Handshake { nibble: 0xa },
            HostToDevice::AckInput { input: 2, value: true },
            HostToDevice::AckInput { input: 7, value: false },
            HostToDevice::ReadOutput { output: 5 },
        ];
        for case in cases {
            let byte = case.to_byte();
            assert_eq!(HostToDevice::from_byte(byte), Ok(case));
        }
    }

    #[test]
    fn device_to_host_round_trips() {
        let cases = [
            DeviceToHost::PulseStarted { output: 3 },
            DeviceToHost::PulseFinished { output: 3 },
            DeviceToHost::OutputState { output: 0, value: false },
            DeviceToHost::OutputState { output: 15, value: true },
            DeviceToHost::Watchdog(WatchdogEvent::PokeAck),
            DeviceToHost::Watchdog(WatchdogEvent::Warn),
            DeviceToHost::Watchdog(WatchdogEvent::StopAck),
            DeviceToHost::Watchdog(WatchdogEvent::Detonated),
            DeviceToHost::ProtocolError,
            DeviceToHost::HandshakeComplete,
            DeviceToHost::InputChanged { input: 2, value: true },
        ];
        for case in cases {
            let byte = case.to_byte();
            assert_eq!(DeviceToHost::from_byte(byte), Ok(case));
        }
    }

    #[test]
    fn concrete_byte_values_match_the_protocol_table() {
        assert_eq!(HostToDevice::PulseShort { output: 3 }.to_byte(), 0x03);
        assert_eq!(DeviceToHost::PulseStarted { output: 3 }.to_byte(), 0x03);
        assert_eq!(DeviceToHost::PulseFinished { output: 3 }.to_byte(), 0x13);
        assert_eq!(
            DeviceToHost::InputChanged { input: 2, value: true }.to_byte(),
            0x6a
        );
        assert_eq!(DeviceToHost::Watchdog(WatchdogEvent::Warn).to_byte(), 0x41);
        assert_eq!(
            DeviceToHost::Watchdog(WatchdogEvent::Detonated).to_byte(),
            0x43
        );
        assert_eq!(DeviceToHost::ProtocolError.to_byte(), 0x50);
        assert_eq!(DeviceToHost::HandshakeComplete.to_byte(), 0x51);
    }

    #[test]
    fn magic_init_bytes_match_magic_nibbles() {
        for (ascii, nibble) in MAGIC_INIT_BYTES.iter().zip(MAGIC.iter()) {
            assert_eq!(*ascii, 0x50 | nibble);
        }
    }

    #[test]
    fn unrecognized_opcode_is_rejected() {
        assert_eq!(HostToDevice::from_byte(0x43), Err(DecodeError(0x43)));
        assert_eq!(HostToDevice::from_byte(0x80), Err(DecodeError(0x80)));
        assert_eq!(DeviceToHost::from_byte(0x52), Err(DecodeError(0x52)));
    }
}
