use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task,
        bpf_probe_read_kernel, bpf_probe_read_kernel_str_bytes, bpf_probe_read_user_buf,
    },
    programs::TracePointContext,
    EbpfContext,
};
use exectrace_common::{
    path::{DentryWalk, PathRef},
    probe::ExecContext,
    KernelOffsets, ReadError, TASK_COMM_LEN,
};

const EFAULT: i64 = 14;

/// Address of a kernel object. Never dereferenced directly, every access
/// goes through a probe read.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KPtr(*const u8);

impl KPtr {
    #[inline(always)]
    fn field(self, offset: u32) -> KPtr {
        KPtr(self.0.wrapping_add(offset as usize))
    }

    #[inline(always)]
    fn read<T: Copy>(self, offset: u32) -> Result<T, ReadError> {
        unsafe { bpf_probe_read_kernel(self.field(offset).0 as *const T) }.map_err(ReadError)
    }

    #[inline(always)]
    fn read_ptr(self, offset: u32) -> Result<KPtr, ReadError> {
        let ptr: *const u8 = self.read(offset)?;
        if ptr.is_null() {
            return Err(ReadError(-EFAULT));
        }
        Ok(KPtr(ptr))
    }

    // container_of
    #[inline(always)]
    fn outer(self, offset: u32) -> KPtr {
        KPtr(self.0.wrapping_sub(offset as usize))
    }
}

/// dentry and mount accessors driven by the loader provided offsets.
pub struct KernelFs<'a> {
    off: &'a KernelOffsets,
}

impl DentryWalk for KernelFs<'_> {
    type Dentry = KPtr;
    type Mount = KPtr;

    #[inline(always)]
    fn parent(&self, dentry: KPtr) -> Result<KPtr, ReadError> {
        dentry.read_ptr(self.off.dentry_parent)
    }

    #[inline(always)]
    fn name_len(&self, dentry: KPtr) -> Result<usize, ReadError> {
        let len: u32 = dentry.read(self.off.dentry_name + self.off.qstr_len)?;
        Ok(len as usize)
    }

    #[inline(always)]
    fn read_name(&self, dentry: KPtr, dst: &mut [u8]) -> Result<(), ReadError> {
        let name = dentry.read_ptr(self.off.dentry_name + self.off.qstr_name)?;
        unsafe { bpf_probe_read_kernel_str_bytes(name.0, dst) }.map_err(ReadError)?;
        Ok(())
    }

    #[inline(always)]
    fn mount_root(&self, mnt: KPtr) -> Result<KPtr, ReadError> {
        mnt.read_ptr(self.off.mount_mnt + self.off.vfsmount_root)
    }

    #[inline(always)]
    fn mount_parent(&self, mnt: KPtr) -> Result<KPtr, ReadError> {
        mnt.read_ptr(self.off.mount_parent)
    }

    #[inline(always)]
    fn mountpoint(&self, mnt: KPtr) -> Result<KPtr, ReadError> {
        mnt.read_ptr(self.off.mount_mountpoint)
    }
}

/// The current task inside `sched_process_exec`.
pub struct CurrentExec<'a> {
    ctx: &'a TracePointContext,
    task: KPtr,
    fs: KernelFs<'a>,
}

impl<'a> CurrentExec<'a> {
    #[inline(always)]
    pub fn new(ctx: &'a TracePointContext, off: &'a KernelOffsets) -> Self {
        let task = unsafe { bpf_get_current_task() } as *const u8;
        Self {
            ctx,
            task: KPtr(task),
            fs: KernelFs { off },
        }
    }

    #[inline(always)]
    fn off(&self) -> &KernelOffsets {
        self.fs.off
    }
}

impl<'a> ExecContext for CurrentExec<'a> {
    type Fs = KernelFs<'a>;

    #[inline(always)]
    fn tgid(&self) -> u32 {
        (bpf_get_current_pid_tgid() >> 32) as u32
    }

    #[inline(always)]
    fn parent_tgid(&self) -> Result<u32, ReadError> {
        let parent = self.task.read_ptr(self.off().task_real_parent)?;
        let tgid: i32 = parent.read(self.off().task_tgid)?;
        Ok(tgid as u32)
    }

    #[inline(always)]
    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0; TASK_COMM_LEN])
    }

    #[inline(always)]
    fn read_args(&self, dst: &mut [u8]) -> Result<usize, ReadError> {
        let mm = self.task.read_ptr(self.off().task_mm)?;
        let start: u64 = mm.read(self.off().mm_arg_start)?;
        let end: u64 = mm.read(self.off().mm_arg_end)?;

        let len = core::cmp::min(end.saturating_sub(start) as usize, dst.len());
        if len == 0 {
            return Ok(0);
        }
        let dst = dst.get_mut(..len).ok_or(ReadError(-EFAULT))?;
        unsafe { bpf_probe_read_user_buf(start as *const u8, dst) }.map_err(ReadError)?;
        Ok(len)
    }

    #[inline(always)]
    fn read_filename(&self, dst: &mut [u8]) -> Result<usize, ReadError> {
        // __data_loc: offset from the start of the record in the low 16 bits
        let loc: u32 = unsafe { self.ctx.read_at(self.off().filename_loc as usize) }
            .map_err(ReadError)?;
        let src = (self.ctx.as_ptr() as *const u8).wrapping_add((loc & 0xFFFF) as usize);
        let name = unsafe { bpf_probe_read_kernel_str_bytes(src, dst) }.map_err(ReadError)?;
        // count the terminating null like the raw helper does
        Ok(name.len() + 1)
    }

    #[inline(always)]
    fn fs(&self) -> &KernelFs<'a> {
        &self.fs
    }

    #[inline(always)]
    fn pwd(&self) -> Result<PathRef<KPtr, KPtr>, ReadError> {
        let fs = self.task.read_ptr(self.off().task_fs)?;
        let pwd = fs.field(self.off().fs_pwd);
        let dentry = pwd.read_ptr(self.off().path_dentry)?;
        let vfsmnt = pwd.read_ptr(self.off().path_mnt)?;
        Ok(PathRef {
            dentry,
            mnt: vfsmnt.outer(self.off().mount_mnt),
        })
    }
}
