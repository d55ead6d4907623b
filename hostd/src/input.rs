/// Host-side bookkeeping for one input line. Unlike outputs, input RPCs
/// never wait on the device: a `GetState` call is answered straight from
/// the last value the device reported, so there is nothing here but the
/// cached bit itself.
#[derive(Default)]
pub(crate) struct Input {
    pub(crate) state: bool,
}
