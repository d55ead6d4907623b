use crate::hal::{InputBank, OutputBank, TxGate};
use crate::{HZ, NUM_INPUTS, NUM_OUTPUTS};
use sermio_proto::{DeviceToHost, HostToDevice, WatchdogCmd, WatchdogEvent, MAGIC};

/// Duration of a short pulse, in ticks (~200ms at [`HZ`] == 50).
pub const SHORT_PULSE_TICKS: u8 = HZ / 5;
/// Duration of a long pulse, in ticks (~5s at [`HZ`] == 50).
pub const LONG_PULSE_TICKS: u8 = HZ * 5;
/// Ticks between re-announcing an unacknowledged input change (~1s).
const INPUT_RETRY_TICKS: u8 = HZ;
/// Watchdog reload value in seconds.
const WATCHDOG_SECS: u8 = 60;
/// Watchdog warning threshold in seconds remaining.
const WATCHDOG_WARN_SECS: u8 = 15;

#[derive(Clone, Copy)]
enum PulseKind {
    Short,
    Long,
}

impl PulseKind {
    fn ticks(self) -> u8 {
        match self {
            PulseKind::Short => SHORT_PULSE_TICKS,
            PulseKind::Long => LONG_PULSE_TICKS,
        }
    }
}

#[derive(Default)]
struct Watchdog {
    /// Ticks remaining until the next one-second boundary.
    ticks: u8,
    /// Seconds remaining until detonation.
    secs: u8,
    running: bool,
    ack_pending: bool,
    warn_pending: bool,
    off_pending: bool,
}

impl Watchdog {
    fn start_or_poke(&mut self) {
        self.running = true;
        self.secs = WATCHDOG_SECS;
        self.ticks = HZ;
        self.ack_pending = true;
    }

    fn stop(&mut self) {
        self.running = false;
        self.off_pending = true;
    }
}

/// All device-side state for the hardware lifetime (power-on to reset).
///
/// Every field here is reachable only from interrupt context (the periodic
/// ticker and the two USART handlers); mutual exclusion follows from the
/// hardware's single-handler-at-a-time guarantee, so this struct is always
/// accessed through a single `&mut DeviceState` at a time, never shared.
pub struct DeviceState {
    pulse_remaining: [u8; NUM_OUTPUTS as usize],
    output_state: [bool; NUM_OUTPUTS as usize],
    ack_pending_pulse: [bool; NUM_OUTPUTS as usize],
    ack_pending_done: [bool; NUM_OUTPUTS as usize],
    ack_pending_state: [bool; NUM_OUTPUTS as usize],
    input_sampled: [bool; NUM_INPUTS as usize],
    input_pending: [bool; NUM_INPUTS as usize],
    input_retry: [u8; NUM_INPUTS as usize],
    wd: Watchdog,
    handshake_index: u8,
    active: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        DeviceState {
            pulse_remaining: [0; NUM_OUTPUTS as usize],
            output_state: [false; NUM_OUTPUTS as usize],
            ack_pending_pulse: [false; NUM_OUTPUTS as usize],
            ack_pending_done: [false; NUM_OUTPUTS as usize],
            ack_pending_state: [false; NUM_OUTPUTS as usize],
            input_sampled: [false; NUM_INPUTS as usize],
            input_pending: [false; NUM_INPUTS as usize],
            input_retry: [0; NUM_INPUTS as usize],
            wd: Watchdog::default(),
            handshake_index: 0,
            active: false,
        }
    }

    /// Whether a host session is established. Commands other than handshake
    /// bytes are rejected while this is false.
    pub fn is_active(&self) -> bool {
        self.active
    }

    // ---- periodic tickers, called at ~HZ from the timer interrupt ----

    /// Drive each output line and retire finished pulses. Runs every tick.
    pub fn output_tick(&mut self, outputs: &mut impl OutputBank, gate: &mut impl TxGate) {
        for i in 0..NUM_OUTPUTS {
            let idx = i as usize;
            if self.pulse_remaining[idx] > 0 {
                outputs.set(i, !self.output_state[idx]);
                self.pulse_remaining[idx] -= 1;
                if self.pulse_remaining[idx] == 0 {
                    self.ack_pending_done[idx] = true;
                    gate.enable();
                }
            } else {
                outputs.set(i, self.output_state[idx]);
            }
        }
    }

    /// Sample each input line and (re)announce changes. Runs every tick.
    pub fn input_tick(&mut self, inputs: &impl InputBank, gate: &mut impl TxGate) {
        for i in 0..NUM_INPUTS {
            let idx = i as usize;
            if self.input_retry[idx] > 0 {
                self.input_retry[idx] -= 1;
                if self.input_retry[idx] == 0 {
                    self.input_pending[idx] = true;
                    self.input_retry[idx] = INPUT_RETRY_TICKS;
                    gate.enable();
                }
            }

            let sample = inputs.get(i);
            if sample != self.input_sampled[idx] {
                self.input_sampled[idx] = sample;
                self.input_pending[idx] = true;
                self.input_retry[idx] = INPUT_RETRY_TICKS;
                gate.enable();
            }
        }
    }

    /// Advance the watchdog countdown. Runs every tick; a no-op unless the
    /// watchdog is running.
    ///
    /// Returns `Some` only at the instant of detonation: the diagnostic byte
    /// is best-effort and bypasses the normal pending-flag queue, since by
    /// the time it would be sent the session is already being torn down.
    pub fn watchdog_tick(&mut self, gate: &mut impl TxGate) -> Option<DeviceToHost> {
        if !self.wd.running {
            return None;
        }
        self.wd.ticks -= 1;
        if self.wd.ticks != 0 {
            return None;
        }
        self.wd.ticks = HZ;
        self.wd.secs -= 1;

        if self.wd.secs == WATCHDOG_WARN_SECS {
            self.wd.warn_pending = true;
            gate.enable();
        }

        if self.wd.secs == 0 {
            self.wd.running = false;
            self.active = false;
            self.pulse_remaining[0] = SHORT_PULSE_TICKS;
            gate.disable();
            return Some(DeviceToHost::Watchdog(WatchdogEvent::Detonated));
        }

        None
    }

    // ---- USART receive handler ----

    /// Handle one received byte.
    ///
    /// Returns `Some` for the two bytes that bypass the normal
    /// pending-flag queue and transmit immediately: a protocol error (also
    /// raised for a frame/parity/overrun error reported by the UART, which
    /// the caller should translate into a call here with a byte that will
    /// be rejected, or handle before ever calling `on_byte`) and handshake
    /// completion.
    pub fn on_byte(&mut self, byte: u8, gate: &mut impl TxGate) -> Option<DeviceToHost> {
        if byte & 0xf0 == 0x50 {
            return self.on_handshake_byte(byte & 0x0f, gate);
        }

        if !self.active {
            return Some(self.on_error(gate));
        }

        match HostToDevice::from_byte(byte) {
            Ok(HostToDevice::PulseShort { output }) => {
                self.start_pulse(output, PulseKind::Short, gate);
                None
            }
            Ok(HostToDevice::PulseLong { output }) => {
                self.start_pulse(output, PulseKind::Long, gate);
                None
            }
            Ok(HostToDevice::SetOutput { output, value }) => {
                self.output_state[output as usize] = value;
                self.ack_pending_state[output as usize] = true;
                gate.enable();
                None
            }
            Ok(HostToDevice::Watchdog(cmd)) => {
                match cmd {
                    WatchdogCmd::Start | WatchdogCmd::Poke => self.wd.start_or_poke(),
                    WatchdogCmd::Stop => self.wd.stop(),
                }
                gate.enable();
                None
            }
            Ok(HostToDevice::AckInput { input, value }) => {
                self.ack_input(input, value, gate);
                None
            }
            Ok(HostToDevice::ReadOutput { output }) => {
                self.ack_pending_state[output as usize] = true;
                gate.enable();
                None
            }
            Ok(HostToDevice::Handshake { .. }) => unreachable!("handled above"),
            Err(_) => Some(self.on_error(gate)),
        }
    }

    fn on_handshake_byte(&mut self, nibble: u8, gate: &mut impl TxGate) -> Option<DeviceToHost> {
        if nibble == MAGIC[self.handshake_index as usize] {
            self.handshake_index += 1;
            if self.handshake_index as usize == MAGIC.len() {
                self.activate(gate);
                self.handshake_index = 0;
                return Some(DeviceToHost::HandshakeComplete);
            }
            None
        } else if nibble == MAGIC[0] {
            self.handshake_index = 1;
            self.active = false;
            gate.disable();
            None
        } else {
            self.handshake_index = 0;
            self.active = false;
            gate.disable();
            None
        }
    }

    fn activate(&mut self, gate: &mut impl TxGate) {
        self.active = true;
        for i in 0..NUM_OUTPUTS as usize {
            self.ack_pending_state[i] = true;
        }
        for i in 0..NUM_INPUTS as usize {
            self.input_retry[i] = INPUT_RETRY_TICKS;
            self.input_pending[i] = true;
        }
        if self.wd.running {
            self.wd.warn_pending = true;
        } else {
            self.wd.off_pending = true;
        }
        gate.enable();
    }

    fn on_error(&mut self, gate: &mut impl TxGate) -> DeviceToHost {
        self.active = false;
        self.handshake_index = 0;
        gate.disable();
        DeviceToHost::ProtocolError
    }

    fn start_pulse(&mut self, output: u8, kind: PulseKind, gate: &mut impl TxGate) {
        let idx = output as usize;
        self.pulse_remaining[idx] = kind.ticks();
        self.ack_pending_pulse[idx] = true;
        gate.enable();
    }

    fn ack_input(&mut self, input: u8, value: bool, gate: &mut impl TxGate) {
        let idx = input as usize;
        if self.input_sampled[idx] == value {
            self.input_retry[idx] = 0;
        } else {
            self.input_pending[idx] = true;
            self.input_retry[idx] = INPUT_RETRY_TICKS;
            gate.enable();
        }
    }

    // ---- USART transmit-empty handler ----

    /// Select the next byte to transmit, in strict priority order. Returns
    /// `None` once nothing is pending; the caller should disable the
    /// transmit-empty interrupt in that case.
    pub fn next_tx_byte(&mut self) -> Option<DeviceToHost> {
        if !self.active {
            return None;
        }

        if self.wd.warn_pending {
            self.wd.warn_pending = false;
            return Some(DeviceToHost::Watchdog(WatchdogEvent::Warn));
        }
        if self.wd.off_pending {
            self.wd.off_pending = false;
            return Some(DeviceToHost::Watchdog(WatchdogEvent::StopAck));
        }
        if self.wd.ack_pending {
            self.wd.ack_pending = false;
            return Some(DeviceToHost::Watchdog(WatchdogEvent::PokeAck));
        }

        for i in 0..NUM_OUTPUTS {
            let idx = i as usize;
            if self.ack_pending_pulse[idx] {
                self.ack_pending_pulse[idx] = false;
                return Some(DeviceToHost::PulseStarted { output: i });
            }
            if self.ack_pending_done[idx] {
                self.ack_pending_done[idx] = false;
                return Some(DeviceToHost::PulseFinished { output: i });
            }
            if self.ack_pending_state[idx] {
                self.ack_pending_state[idx] = false;
                return Some(DeviceToHost::OutputState {
                    output: i,
                    value: self.output_state[idx],
                });
            }
        }

        for i in 0..NUM_INPUTS {
            let idx = i as usize;
            if self.input_pending[idx] {
                self.input_pending[idx] = false;
                return Some(DeviceToHost::InputChanged {
                    input: i,
                    value: self.input_sampled[idx],
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct MockOutputs {
        lines: [bool; NUM_OUTPUTS as usize],
    }
    impl OutputBank for MockOutputs {
        fn set(&mut self, output: u8, level: bool) {
            self.lines[output as usize] = level;
        }
    }

    #[derive(Default)]
    struct MockInputs {
        lines: [bool; NUM_INPUTS as usize],
    }
    impl InputBank for MockInputs {
        fn get(&self, input: u8) -> bool {
            self.lines[input as usize]
        }
    }

    #[derive(Default)]
    struct MockGate {
        enabled: bool,
        enable_calls: u32,
    }
    impl TxGate for MockGate {
        fn enable(&mut self) {
            self.enabled = true;
            self.enable_calls += 1;
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
    }

    fn handshake(dev: &mut DeviceState, gate: &mut MockGate) -> Vec<DeviceToHost> {
        let mut out = Vec::new();
        for &nibble in MAGIC.iter() {
            let byte = 0x50 | nibble;
            if let Some(msg) = dev.on_byte(byte, gate) {
                out.push(msg);
            }
        }
        out
    }

    fn drain_tx(dev: &mut DeviceState) -> Vec<DeviceToHost> {
        let mut out = Vec::new();
        while let Some(msg) = dev.next_tx_byte() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn handshake_activates_and_requests_full_state() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        assert!(!dev.is_active());

        let direct = handshake(&mut dev, &mut gate);
        assert_eq!(direct, vec![DeviceToHost::HandshakeComplete]);
        assert!(dev.is_active());

        let mut queued = drain_tx(&mut dev);
        // 16 output-state reports, then 8 input-change notifications, then
        // the watchdog-off ack, in that priority order.
        let outputs: Vec<_> = queued.drain(..16).collect();
        for (i, msg) in outputs.into_iter().enumerate() {
            assert_eq!(
                msg,
                DeviceToHost::OutputState {
                    output: i as u8,
                    value: false
                }
            );
        }
        let inputs: Vec<_> = queued.drain(..8).collect();
        for (i, msg) in inputs.into_iter().enumerate() {
            assert_eq!(
                msg,
                DeviceToHost::InputChanged {
                    input: i as u8,
                    value: false
                }
            );
        }
        assert_eq!(
            queued,
            vec![DeviceToHost::Watchdog(WatchdogEvent::StopAck)]
        );
    }

    #[test]
    fn handshake_restarts_on_mismatch_then_reanchors_on_first_byte() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        assert_eq!(dev.on_byte(0x50 | MAGIC[0], &mut gate), None);
        assert_eq!(dev.on_byte(0x50 | MAGIC[1], &mut gate), None);
        // mismatch: restarts at 0, but this byte happens to equal magic[0]...
        assert_eq!(dev.on_byte(0x50 | 0xf, &mut gate), None); // garbage, != magic[0]
        assert_eq!(dev.handshake_index, 0);
        assert_eq!(dev.on_byte(0x50 | MAGIC[0], &mut gate), None);
        assert_eq!(dev.handshake_index, 1);
    }

    #[test]
    fn short_pulse_inverts_then_restores_and_acks() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);

        let mut outputs = MockOutputs::default();
        assert_eq!(dev.on_byte(0x03, &mut gate), None); // short pulse, output 3
        assert_eq!(drain_tx(&mut dev), vec![DeviceToHost::PulseStarted { output: 3 }]);

        for _ in 0..SHORT_PULSE_TICKS {
            dev.output_tick(&mut outputs, &mut gate);
            assert!(outputs.lines[3]); // inverted from committed false -> true
        }
        assert_eq!(drain_tx(&mut dev), vec![DeviceToHost::PulseFinished { output: 3 }]);
        dev.output_tick(&mut outputs, &mut gate);
        assert!(!outputs.lines[3]); // back to committed state
    }

    #[test]
    fn replaying_pulse_start_restarts_counter_without_extra_waiters() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);

        let mut outputs = MockOutputs::default();
        dev.on_byte(0x13, &mut gate); // long pulse, output 3
        drain_tx(&mut dev);
        for _ in 0..10 {
            dev.output_tick(&mut outputs, &mut gate);
        }
        // replay the same long-pulse byte midway through
        dev.on_byte(0x13, &mut gate);
        assert_eq!(
            drain_tx(&mut dev),
            vec![DeviceToHost::PulseStarted { output: 3 }]
        );
        assert_eq!(dev.pulse_remaining[3], LONG_PULSE_TICKS);
    }

    #[test]
    fn input_change_is_announced_once_then_retried_until_acked() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);

        let mut inputs = MockInputs::default();
        inputs.lines[2] = true;
        dev.input_tick(&mut inputs, &mut gate);
        assert_eq!(
            drain_tx(&mut dev),
            vec![DeviceToHost::InputChanged { input: 2, value: true }]
        );

        // no ack: after ~1s (HZ ticks) it's re-announced
        for _ in 0..HZ {
            dev.input_tick(&mut inputs, &mut gate);
        }
        assert_eq!(
            drain_tx(&mut dev),
            vec![DeviceToHost::InputChanged { input: 2, value: true }]
        );

        // host acks with the matching value: retries stop
        dev.on_byte(0x6a, &mut gate); // ack input 2, value 1
        for _ in 0..HZ {
            dev.input_tick(&mut inputs, &mut gate);
        }
        assert_eq!(drain_tx(&mut dev), vec![]);
    }

    #[test]
    fn duplicate_input_ack_is_idempotent() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);

        let mut inputs = MockInputs::default();
        inputs.lines[0] = true;
        dev.input_tick(&mut inputs, &mut gate);
        drain_tx(&mut dev);
        dev.on_byte(0x68, &mut gate); // ack input 0 = 1
        assert_eq!(dev.input_retry[0], 0);
        dev.on_byte(0x68, &mut gate);
        dev.on_byte(0x68, &mut gate);
        assert_eq!(dev.input_retry[0], 0);
        assert!(!dev.input_pending[0]);
    }

    #[test]
    fn watchdog_warns_once_then_detonates_pulsing_output_zero() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);

        dev.on_byte(0x40, &mut gate); // watchdog start
        assert_eq!(
            drain_tx(&mut dev),
            vec![DeviceToHost::Watchdog(WatchdogEvent::PokeAck)]
        );

        let mut outputs = MockOutputs::default();
        let mut warn_count = 0;
        let mut detonated = None;
        for _ in 0..(60 * HZ as u32) {
            dev.output_tick(&mut outputs, &mut gate);
            if let Some(msg) = dev.watchdog_tick(&mut gate) {
                detonated = Some(msg);
                break;
            }
            for msg in drain_tx(&mut dev) {
                if msg == DeviceToHost::Watchdog(WatchdogEvent::Warn) {
                    warn_count += 1;
                }
            }
        }
        assert_eq!(warn_count, 1);
        assert_eq!(
            detonated,
            Some(DeviceToHost::Watchdog(WatchdogEvent::Detonated))
        );
        assert!(!dev.is_active());
        assert_eq!(dev.pulse_remaining[0], SHORT_PULSE_TICKS);
    }

    #[test]
    fn frame_error_resets_session_and_requests_handshake() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        handshake(&mut dev, &mut gate);
        drain_tx(&mut dev);
        assert!(dev.is_active());

        assert_eq!(dev.on_byte(0xff, &mut gate), Some(DeviceToHost::ProtocolError));
        assert!(!dev.is_active());
        assert!(!gate.enabled);
    }

    #[test]
    fn commands_rejected_before_handshake() {
        let mut dev = DeviceState::new();
        let mut gate = MockGate::default();
        assert_eq!(dev.on_byte(0x03, &mut gate), Some(DeviceToHost::ProtocolError));
    }
}
