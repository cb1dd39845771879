//! Capture of one exec event into the per-CPU scratch record.
//!
//! Runs to completion in a single pass: each field is read once, a failed
//! read either degrades the record (argv) or abandons it (path, cwd), and
//! nothing is ever retried.

use crate::emit::{emit, EmitError, EventSink};
use crate::path::{self, DentryWalk, PathRef};
use crate::{
    ExecEvent, ProbeConfig, ReadError, Segments, ARGV_LEN, CWD_MAX, PATH_MAX, TASK_COMM_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    NoScratch,
    Unconfigured,
    Filename(ReadError),
    Cwd(path::Error),
    OutOfBound,
    Emit(EmitError),
}

impl From<EmitError> for ProbeError {
    fn from(value: EmitError) -> Self {
        Self::Emit(value)
    }
}

/// View of the task that just exec'd, as seen from the tracepoint.
pub trait ExecContext {
    type Fs: DentryWalk;

    fn tgid(&self) -> u32;

    fn parent_tgid(&self) -> Result<u32, ReadError>;

    fn comm(&self) -> [u8; TASK_COMM_LEN];

    /// Copies the head of the `[arg_start, arg_end)` user area into `dst`,
    /// at most `dst.len()` bytes, and returns the amount copied.
    fn read_args(&self, dst: &mut [u8]) -> Result<usize, ReadError>;

    /// Copies the executable path from the event payload, null included,
    /// and returns the amount copied.
    fn read_filename(&self, dst: &mut [u8]) -> Result<usize, ReadError>;

    fn fs(&self) -> &Self::Fs;

    #[allow(clippy::type_complexity)]
    fn pwd(
        &self,
    ) -> Result<
        PathRef<<Self::Fs as DentryWalk>::Dentry, <Self::Fs as DentryWalk>::Mount>,
        ReadError,
    >;
}

/// Source of the per-CPU scratch record.
pub trait ScratchPool {
    fn acquire(&mut self) -> Option<&mut ExecEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Captured {
    /// Bytes of the record to transmit.
    pub len: usize,
    /// argv was requested but could not be read.
    pub argv_degraded: bool,
}

/// Fills `event` from `ctx` and returns the length of its populated prefix.
///
/// The header is rewritten entirely. Bytes of `event.buf` beyond the new
/// segment lengths keep whatever a previous invocation left there and are
/// not part of the returned length.
#[inline(always)]
pub fn capture<C: ExecContext>(
    ctx: &C,
    segments: Segments,
    event: &mut ExecEvent,
) -> Result<Captured, ProbeError> {
    let header = &mut event.header;
    header.pid = ctx.tgid();
    header.ppid = ctx.parent_tgid().unwrap_or(0);
    header.comm = ctx.comm();
    header.argv_size = 0;
    header.path_size = 0;
    header.cwd_size = 0;

    let mut argv_degraded = false;
    let mut argv_len = 0;
    if segments.contains(Segments::ARGV) {
        match event.buf.get_mut(..ARGV_LEN).map(|dst| ctx.read_args(dst)) {
            Some(Ok(n)) if n <= ARGV_LEN => argv_len = n,
            _ => argv_degraded = true,
        }
    }
    event.header.argv_size = argv_len as u32;

    let path_dst = event
        .buf
        .get_mut(argv_len..argv_len + PATH_MAX)
        .ok_or(ProbeError::OutOfBound)?;
    let path_len = ctx.read_filename(path_dst).map_err(ProbeError::Filename)?;
    if path_len > PATH_MAX {
        return Err(ProbeError::OutOfBound);
    }
    event.header.path_size = path_len as u32;

    if segments.contains(Segments::CWD) {
        let cwd_start = argv_len + path_len;
        if cwd_start > ARGV_LEN + PATH_MAX {
            return Err(ProbeError::OutOfBound);
        }
        let cwd_dst = event
            .buf
            .get_mut(cwd_start..cwd_start + CWD_MAX)
            .ok_or(ProbeError::OutOfBound)?;
        let pwd = ctx
            .pwd()
            .map_err(|e| ProbeError::Cwd(path::Error::Read(e)))?;
        let cwd_len = path::resolve(ctx.fs(), pwd, cwd_dst).map_err(ProbeError::Cwd)?;
        event.header.cwd_size = cwd_len as u32;
    }

    let len = event.wire_len().ok_or(ProbeError::OutOfBound)?;

    Ok(Captured { len, argv_degraded })
}

/// Probe body: acquire scratch, capture, emit. At most one record leaves
/// per call.
#[inline(always)]
pub fn handle_exec<C, P, S>(
    ctx: &C,
    config: &ProbeConfig,
    pool: &mut P,
    sink: &S,
) -> Result<Captured, ProbeError>
where
    C: ExecContext,
    P: ScratchPool,
    S: EventSink,
{
    let event = pool.acquire().ok_or(ProbeError::NoScratch)?;

    if !config.offsets.is_resolved() {
        return Err(ProbeError::Unconfigured);
    }

    let captured = capture(ctx, config.segments(), event)?;
    emit(sink, event, captured.len)?;

    Ok(captured)
}
