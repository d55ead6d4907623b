use std::io;
use std::sync::mpsc::{self, Sender, SyncSender};

/// A single-slot completion channel for one RPC call. The event loop sends
/// exactly one reply down this and then drops it.
pub(crate) type Reply<T> = SyncSender<T>;

/// One request queued onto the device event loop. Every RPC surface method
/// (`GetState`, `SetState`, `Pulse`) is translated into one of these and
/// handled on the loop thread, alongside the serial reads and retry
/// timers — this is what keeps waiter-queue access single-threaded without
/// a lock, matching the reconciliation logic's assumption that it alone
/// touches this state.
pub(crate) enum Command {
    GetOutput(u8, Reply<u8>),
    SetOutput(u8, bool, Reply<()>),
    Pulse(u8, bool, Reply<()>),
    GetInput(u8, Reply<u8>),
}

fn call<T>(
    commands: &Sender<Command>,
    make: impl FnOnce(Reply<T>) -> Command,
) -> io::Result<T> {
    let (tx, rx) = mpsc::sync_channel(1);
    commands
        .send(make(tx))
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device event loop is gone"))?;
    rx.recv()
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device event loop is gone"))
}

/// A handle to one of the 16 published outputs.
#[derive(Clone)]
pub struct OutputHandle {
    index: u8,
    commands: Sender<Command>,
}

impl OutputHandle {
    pub(crate) fn new(index: u8, commands: Sender<Command>) -> Self {
        Self { index, commands }
    }

    /// Which output this handle addresses (0..16).
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Block until the device's committed state for this output is known.
    pub fn get_state(&self) -> io::Result<u8> {
        let index = self.index;
        call(&self.commands, |reply| Command::GetOutput(index, reply))
    }

    /// Block until the device has acknowledged (or the cache already
    /// agreed with) the requested value.
    pub fn set_state(&self, value: bool) -> io::Result<()> {
        let index = self.index;
        call(&self.commands, |reply| {
            Command::SetOutput(index, value, reply)
        })
    }

    /// Block until a pulse (long if `is_long`) has started and finished.
    pub fn pulse(&self, is_long: bool) -> io::Result<()> {
        let index = self.index;
        call(&self.commands, |reply| {
            Command::Pulse(index, is_long, reply)
        })
    }
}

/// A handle to one of the 8 published inputs.
#[derive(Clone)]
pub struct InputHandle {
    index: u8,
    commands: Sender<Command>,
}

impl InputHandle {
    pub(crate) fn new(index: u8, commands: Sender<Command>) -> Self {
        Self { index, commands }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// The last value the device reported for this input.
    pub fn get_state(&self) -> io::Result<u8> {
        let index = self.index;
        call(&self.commands, |reply| Command::GetInput(index, reply))
    }
}
