use crate::command::{Command, InputHandle, OutputHandle};
use crate::connection::{self, FlushQueues};
use crate::input::Input;
use crate::output::{Output, PulsePending};
use sermio_proto::{DeviceToHost, HostToDevice, MAGIC};
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

const NUM_OUTPUTS: usize = sermio_proto::NUM_OUTPUTS as usize;
const NUM_INPUTS: usize = sermio_proto::NUM_INPUTS as usize;

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const LONG_PULSE_RETRY: Duration = Duration::from_secs(10);

/// Host-side state for one attached device, and the event loop that drives
/// it. Owns all sixteen outputs and eight inputs for the life of the
/// serial file descriptor; on reopen a fresh `Device` is built and the
/// handshake is resent from scratch.
pub struct Device {
    outputs: [Output; NUM_OUTPUTS],
    inputs: [Input; NUM_INPUTS],
    commands: Receiver<Command>,
    command_sender: Sender<Command>,
}

impl Device {
    pub fn new() -> Self {
        let (command_sender, commands) = mpsc::channel();
        Device {
            outputs: Default::default(),
            inputs: Default::default(),
            commands,
            command_sender,
        }
    }

    /// A cloneable handle to output `index`. Panics if `index >= 16`, the
    /// same contract the wire protocol itself enforces on every output
    /// byte.
    pub fn output(&self, index: u8) -> OutputHandle {
        assert!((index as usize) < NUM_OUTPUTS, "output index out of range");
        OutputHandle::new(index, self.command_sender.clone())
    }

    /// A cloneable handle to input `index`. Panics if `index >= 8`.
    pub fn input(&self, index: u8) -> InputHandle {
        assert!((index as usize) < NUM_INPUTS, "input index out of range");
        InputHandle::new(index, self.command_sender.clone())
    }

    /// Run the event loop forever: service queued RPC calls, read and
    /// dispatch device bytes, and retire due retry timers. Returns only on
    /// a local I/O error, which is fatal (there is nothing to recover to).
    pub fn run(mut self, port: &mut (impl Read + Write + FlushQueues)) -> io::Result<()> {
        self.init_link(port)?;
        loop {
            while let Ok(cmd) = self.commands.try_recv() {
                self.dispatch_command(cmd, port)?;
            }

            if let Some(byte) = connection::read_byte(port)? {
                tracing::trace!(byte, "RECV");
                self.on_byte(byte, port)?;
            }

            self.poll_retries(port)?;
        }
    }

    fn send(port: &mut impl Write, msg: HostToDevice) -> io::Result<()> {
        let byte = msg.to_byte();
        tracing::trace!(byte, ?msg, "SEND");
        connection::write_byte(port, byte)
    }

    /// Establish the link at process startup: write the magic handshake
    /// sequence, then request every output's current state and arm a
    /// retry. Called exactly once, before the event loop starts — the
    /// host has no believed output values yet, so there's nothing to
    /// push, only state to pull.
    fn init_link(&mut self, port: &mut impl Write) -> io::Result<()> {
        tracing::debug!("initializing link");
        for &nibble in MAGIC.iter() {
            Self::send(port, HostToDevice::Handshake { nibble })?;
        }

        let now = Instant::now();
        for i in 0..NUM_OUTPUTS as u8 {
            let idx = i as usize;
            if !self.outputs[idx].state_read_pending {
                Self::send(port, HostToDevice::ReadOutput { output: i })?;
                self.outputs[idx].state_read_pending = true;
                self.outputs[idx].read_retry = Some(now + RETRY_INTERVAL);
            }
        }
        Ok(())
    }

    /// Recover the link after protocol loss: flush whatever is sitting in
    /// the OS's serial queues, rewrite the magic handshake sequence, and
    /// for every output not already awaiting a read, push the host's
    /// believed value back to the device rather than trusting whatever
    /// the device reports spontaneously after reconnecting. Triggered on
    /// a reported protocol error and on any unparseable byte.
    fn recover_link(&mut self, port: &mut (impl Write + FlushQueues)) -> io::Result<()> {
        tracing::debug!("recovering link");
        port.flush_queues()?;
        for &nibble in MAGIC.iter() {
            Self::send(port, HostToDevice::Handshake { nibble })?;
        }

        let now = Instant::now();
        for i in 0..NUM_OUTPUTS as u8 {
            let idx = i as usize;
            if !self.outputs[idx].state_read_pending {
                let value = self.outputs[idx].state;
                Self::send(port, HostToDevice::SetOutput { output: i, value })?;
                self.outputs[idx].state_pending = true;
                self.outputs[idx].set_retry = Some(now + RETRY_INTERVAL);
            }
        }
        Ok(())
    }

    fn dispatch_command(&mut self, cmd: Command, port: &mut impl Write) -> io::Result<()> {
        match cmd {
            Command::GetOutput(i, reply) => {
                let o = &mut self.outputs[i as usize];
                if o.state_read_pending {
                    o.read_waiters.push_back(reply);
                } else {
                    reply.send(o.state as u8).ok();
                }
                Ok(())
            }
            Command::SetOutput(i, value, reply) => self.request_set(i, value, reply, port),
            Command::Pulse(i, is_long, reply) => self.request_pulse(i, is_long, reply, port),
            Command::GetInput(i, reply) => {
                reply.send(self.inputs[i as usize].state as u8).ok();
                Ok(())
            }
        }
    }

    /// A set that agrees with both the cache and the absence of a pending
    /// read completes immediately; anything else pushes the new value to
    /// the device and queues the caller. A read already in flight is
    /// completed early with the new intended value: the device is about
    /// to be told to become that value regardless of what it last
    /// reported.
    fn request_set(
        &mut self,
        i: u8,
        value: bool,
        reply: crate::command::Reply<()>,
        port: &mut impl Write,
    ) -> io::Result<()> {
        let idx = i as usize;
        let read_in_flight = self.outputs[idx].state_read_pending;
        let cached = self.outputs[idx].state;

        if !read_in_flight && cached == value {
            reply.send(()).ok();
            return Ok(());
        }

        if read_in_flight {
            let o = &mut self.outputs[idx];
            o.state_read_pending = false;
            o.read_retry = None;
            for waiter in o.read_waiters.drain(..) {
                waiter.send(value as u8).ok();
            }
        }

        Self::send(port, HostToDevice::SetOutput { output: i, value })?;
        self.outputs[idx].state = value;
        self.outputs[idx].state_pending = true;
        self.outputs[idx].set_retry = Some(Instant::now() + RETRY_INTERVAL);
        self.outputs[idx].set_waiters.push_back(reply);
        Ok(())
    }

    fn request_pulse(
        &mut self,
        i: u8,
        is_long: bool,
        reply: crate::command::Reply<()>,
        port: &mut impl Write,
    ) -> io::Result<()> {
        let idx = i as usize;
        if self.outputs[idx].pulse_pending == PulsePending::Idle {
            let msg = if is_long {
                HostToDevice::PulseLong { output: i }
            } else {
                HostToDevice::PulseShort { output: i }
            };
            Self::send(port, msg)?;
            let o = &mut self.outputs[idx];
            o.pulse_pending = if is_long {
                PulsePending::Long
            } else {
                PulsePending::Short
            };
            o.pulse_retry =
                Some(Instant::now() + if is_long { LONG_PULSE_RETRY } else { RETRY_INTERVAL });
        }
        self.outputs[idx].pulse_waiters.push_back(reply);
        Ok(())
    }

    /// Receive-dispatch table, per the wire protocol's device→host bytes.
    fn on_byte(&mut self, byte: u8, port: &mut (impl Write + FlushQueues)) -> io::Result<()> {
        match DeviceToHost::from_byte(byte) {
            Ok(DeviceToHost::PulseStarted { .. }) => Ok(()),
            Ok(DeviceToHost::PulseFinished { output }) => {
                let o = &mut self.outputs[output as usize];
                o.pulse_pending = PulsePending::Idle;
                o.pulse_retry = None;
                for waiter in o.pulse_waiters.drain(..) {
                    waiter.send(()).ok();
                }
                Ok(())
            }
            Ok(DeviceToHost::OutputState { output, value }) => {
                self.on_output_state(output, value, port)
            }
            Ok(DeviceToHost::Watchdog(event)) => {
                tracing::debug!(?event, "watchdog event (observed only)");
                Ok(())
            }
            Ok(DeviceToHost::ProtocolError) => self.recover_link(port),
            Ok(DeviceToHost::HandshakeComplete) => Ok(()),
            Ok(DeviceToHost::InputChanged { input, value }) => {
                self.inputs[input as usize].state = value;
                Self::send(port, HostToDevice::AckInput { input, value })
            }
            Err(_) => self.recover_link(port),
        }
    }

    fn on_output_state(&mut self, output: u8, value: bool, port: &mut impl Write) -> io::Result<()> {
        let idx = output as usize;
        if self.outputs[idx].state_read_pending {
            let o = &mut self.outputs[idx];
            o.state = value;
            o.state_read_pending = false;
            o.read_retry = None;
            for waiter in o.read_waiters.drain(..) {
                waiter.send(value as u8).ok();
            }
            Ok(())
        } else if self.outputs[idx].state == value {
            let o = &mut self.outputs[idx];
            o.state_pending = false;
            o.set_retry = None;
            for waiter in o.set_waiters.drain(..) {
                waiter.send(()).ok();
            }
            Ok(())
        } else {
            let value = self.outputs[idx].state;
            Self::send(port, HostToDevice::SetOutput { output, value })
        }
    }

    fn poll_retries(&mut self, port: &mut impl Write) -> io::Result<()> {
        let now = Instant::now();
        for i in 0..NUM_OUTPUTS as u8 {
            let idx = i as usize;

            if self.outputs[idx].set_retry.is_some_and(|d| now >= d) {
                let value = self.outputs[idx].state;
                Self::send(port, HostToDevice::SetOutput { output: i, value })?;
                self.outputs[idx].set_retry = Some(now + RETRY_INTERVAL);
            }

            if self.outputs[idx].read_retry.is_some_and(|d| now >= d) {
                Self::send(port, HostToDevice::ReadOutput { output: i })?;
                self.outputs[idx].read_retry = Some(now + RETRY_INTERVAL);
            }

            if self.outputs[idx].pulse_retry.is_some_and(|d| now >= d) {
                let is_long = self.outputs[idx].pulse_pending == PulsePending::Long;
                let msg = if is_long {
                    HostToDevice::PulseLong { output: i }
                } else {
                    HostToDevice::PulseShort { output: i }
                };
                Self::send(port, msg)?;
                let interval = if is_long { LONG_PULSE_RETRY } else { RETRY_INTERVAL };
                self.outputs[idx].pulse_retry = Some(now + interval);
            }
        }
        Ok(())
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}
