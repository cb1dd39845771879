#![cfg_attr(target_arch = "bpf", no_std)]

pub mod config;
pub mod emit;
pub mod event;
pub mod path;
pub mod probe;

#[cfg(not(target_arch = "bpf"))]
pub mod record;

#[cfg(test)]
mod sim;

pub use config::{KernelOffsets, ProbeConfig, Segments};
pub use event::{EventHeader, ExecEvent, HEADER_SIZE};

/// Longest single path component (limits.h).
pub const NAME_MAX: usize = 255;
/// Capacity of the executable path segment (limits.h).
pub const PATH_MAX: usize = 4096;
/// Capacity of the working directory segment.
pub const CWD_MAX: usize = 4096;
// ARG_MAX is 128KB and also covers environ, we only keep the head of argv
pub const ARGV_LEN: usize = 4096;
pub const BUF_MAX: usize = ARGV_LEN + PATH_MAX + CWD_MAX;

/// Upper bound on dentry walk steps, mount crossings included.
pub const MAX_PATH_COMPONENTS: usize = 16;
pub const TASK_COMM_LEN: usize = 16;

/// Byte size of the ring buffer shared with user space.
pub const RINGBUF_SIZE: u32 = 16 * 1024;

/// A failed kernel or user memory read, carrying the helper return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadError(pub i64);
