use crate::ExecEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// The queue had no room, the record is lost.
    Dropped(i64),
    /// Requested length is larger than the record.
    OutOfBound,
}

/// Bounded multi-producer queue towards user space. Implementations drop
/// what does not fit and never block.
pub trait EventSink {
    fn output(&self, data: &[u8]) -> Result<(), EmitError>;
}

/// Submits the first `len` bytes of `event`, never the whole record.
#[inline(always)]
pub fn emit<S: EventSink>(sink: &S, event: &ExecEvent, len: usize) -> Result<(), EmitError> {
    let data = event.as_bytes(len).ok_or(EmitError::OutOfBound)?;
    sink.output(data)
}
