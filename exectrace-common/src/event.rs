use core::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::{BUF_MAX, TASK_COMM_LEN};

/// Fixed part of every record, followed on the wire by
/// `[argv][path][cwd chain]` sized by the three length fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EventHeader {
    pub pid: u32,
    pub ppid: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub path_size: u32,
    pub argv_size: u32,
    pub cwd_size: u32,
}

pub const HEADER_SIZE: usize = size_of::<EventHeader>();

impl EventHeader {
    /// Sum of the three segment lengths, `None` on overflow.
    #[inline(always)]
    pub fn payload_len(&self) -> Option<usize> {
        (self.argv_size as usize)
            .checked_add(self.path_size as usize)?
            .checked_add(self.cwd_size as usize)
    }
}

/// Per-CPU scratch record. Oversized on purpose: only
/// `HEADER_SIZE + payload_len()` bytes of it are ever transmitted.
#[repr(C)]
pub struct ExecEvent {
    pub header: EventHeader,
    pub buf: [u8; BUF_MAX],
}

impl ExecEvent {
    pub const fn zeroed() -> Self {
        Self {
            header: EventHeader {
                pid: 0,
                ppid: 0,
                comm: [0; TASK_COMM_LEN],
                path_size: 0,
                argv_size: 0,
                cwd_size: 0,
            },
            buf: [0; BUF_MAX],
        }
    }

    /// Total length of the populated prefix, checked against the physical
    /// record size.
    #[inline(always)]
    pub fn wire_len(&self) -> Option<usize> {
        let total = HEADER_SIZE.checked_add(self.header.payload_len()?)?;
        if total > size_of::<Self>() {
            return None;
        }
        Some(total)
    }

    /// The first `len` bytes of the record as laid out in memory.
    #[inline(always)]
    pub fn as_bytes(&self, len: usize) -> Option<&[u8]> {
        if len > size_of::<Self>() {
            return None;
        }
        // ExecEvent is repr(C) with only u8/u32 fields and no padding
        let all = unsafe {
            core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>())
        };
        all.get(..len)
    }
}
