use bytemuck::{Pod, Zeroable};

/// Optional variable-length segments. The executable path is always
/// captured, a disabled segment goes on the wire with length 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments(u32);

impl Segments {
    pub const ARGV: Segments = Segments(1 << 0);
    pub const CWD: Segments = Segments(1 << 1);
    pub const ALL: Segments = Segments(Self::ARGV.0 | Self::CWD.0);
    pub const NONE: Segments = Segments(0);

    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        Segments(bits & Self::ALL.0)
    }

    #[inline(always)]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(&self, other: Segments) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn without(self, other: Segments) -> Self {
        Segments(self.0 & !other.0)
    }
}

impl Default for Segments {
    fn default() -> Self {
        Self::ALL
    }
}

/// Byte offsets of the kernel structure fields read by the probe. They
/// differ between kernel builds, so the loader resolves them from BTF.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct KernelOffsets {
    // task_struct
    pub task_real_parent: u32,
    pub task_tgid: u32,
    pub task_mm: u32,
    pub task_fs: u32,
    // mm_struct
    pub mm_arg_start: u32,
    pub mm_arg_end: u32,
    // fs_struct
    pub fs_pwd: u32,
    // path
    pub path_mnt: u32,
    pub path_dentry: u32,
    // dentry
    pub dentry_parent: u32,
    pub dentry_name: u32,
    // qstr
    pub qstr_len: u32,
    pub qstr_name: u32,
    // vfsmount
    pub vfsmount_root: u32,
    // mount
    pub mount_mnt: u32,
    pub mount_parent: u32,
    pub mount_mountpoint: u32,
    /// Offset of the `__data_loc char[] filename` field in the
    /// sched_process_exec payload.
    pub filename_loc: u32,
}

impl KernelOffsets {
    /// Offsets that are always non-zero on a real kernel. A table where one
    /// of them is zero was never filled in.
    #[inline(always)]
    pub fn is_resolved(&self) -> bool {
        self.task_real_parent != 0
            && self.task_mm != 0
            && self.task_fs != 0
            && self.mount_parent != 0
            && self.filename_loc != 0
    }
}

/// Read-only global patched by the loader before the program is loaded.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ProbeConfig {
    pub segments: u32,
    pub offsets: KernelOffsets,
}

impl ProbeConfig {
    pub const fn zeroed() -> Self {
        Self {
            segments: 0,
            offsets: KernelOffsets {
                task_real_parent: 0,
                task_tgid: 0,
                task_mm: 0,
                task_fs: 0,
                mm_arg_start: 0,
                mm_arg_end: 0,
                fs_pwd: 0,
                path_mnt: 0,
                path_dentry: 0,
                dentry_parent: 0,
                dentry_name: 0,
                qstr_len: 0,
                qstr_name: 0,
                vfsmount_root: 0,
                mount_mnt: 0,
                mount_parent: 0,
                mount_mountpoint: 0,
                filename_loc: 0,
            },
        }
    }

    pub fn new(segments: Segments, offsets: KernelOffsets) -> Self {
        Self {
            segments: segments.bits(),
            offsets,
        }
    }

    #[inline(always)]
    pub fn segments(&self) -> Segments {
        Segments::from_bits(self.segments)
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProbeConfig {}
