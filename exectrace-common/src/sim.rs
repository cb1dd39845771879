//! In-memory stand-ins for the kernel side, used by the host tests.

use std::cell::{Cell, RefCell};

use crate::emit::{EmitError, EventSink};
use crate::path::{DentryWalk, PathRef};
use crate::probe::{ExecContext, ScratchPool};
use crate::{ExecEvent, KernelOffsets, ReadError, TASK_COMM_LEN};

const EFAULT: i64 = -14;
const EAGAIN: i64 = -11;

pub fn resolved_offsets() -> KernelOffsets {
    KernelOffsets {
        task_real_parent: 2456,
        task_tgid: 2444,
        task_mm: 2312,
        task_fs: 3024,
        mm_arg_start: 368,
        mm_arg_end: 376,
        fs_pwd: 40,
        path_mnt: 0,
        path_dentry: 8,
        dentry_parent: 24,
        dentry_name: 32,
        qstr_len: 4,
        qstr_name: 8,
        vfsmount_root: 0,
        mount_mnt: 32,
        mount_parent: 16,
        mount_mountpoint: 24,
        filename_loc: 8,
    }
}

struct SimDentry {
    name: String,
    parent: usize,
    poisoned: bool,
}

struct SimMount {
    root: usize,
    parent: usize,
    mountpoint: usize,
}

/// Dentry and mount graph. Dentry 0 and mount 0 are the global root.
pub struct SimFs {
    dentries: Vec<SimDentry>,
    mounts: Vec<SimMount>,
}

impl SimFs {
    pub fn new() -> Self {
        Self {
            dentries: vec![SimDentry {
                name: "/".into(),
                parent: 0,
                poisoned: false,
            }],
            mounts: vec![SimMount {
                root: 0,
                parent: 0,
                mountpoint: 0,
            }],
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn root_mount(&self) -> usize {
        0
    }

    fn add(&mut self, name: &str, parent: Option<usize>) -> usize {
        let id = self.dentries.len();
        self.dentries.push(SimDentry {
            name: name.into(),
            parent: parent.unwrap_or(id),
            poisoned: false,
        });
        id
    }

    /// Creates (or finds) each component of `path` below `from`.
    pub fn mkdir_p(&mut self, from: usize, path: &str) -> usize {
        let mut cur = from;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            let existing = self
                .dentries
                .iter()
                .enumerate()
                .position(|(i, d)| i != cur && d.parent == cur && d.name == name);
            cur = match existing {
                Some(i) => i,
                None => self.add(name, Some(cur)),
            };
        }
        cur
    }

    /// Mounts a fresh filesystem on `mountpoint`, returns the mount and its
    /// root dentry.
    pub fn mount(&mut self, parent: usize, mountpoint: usize) -> (usize, usize) {
        let root = self.add("/", None);
        (self.bind(parent, root, mountpoint), root)
    }

    /// Mounts the existing `source` dentry on `mountpoint`.
    pub fn bind(&mut self, parent: usize, source: usize, mountpoint: usize) -> usize {
        self.mounts.push(SimMount {
            root: source,
            parent,
            mountpoint,
        });
        self.mounts.len() - 1
    }

    /// A self-parented dentry that is no mount's root.
    pub fn detached_root(&mut self, name: &str) -> usize {
        self.add(name, None)
    }

    /// Makes every read on `dentry` fail.
    pub fn poison(&mut self, dentry: usize) {
        self.dentries[dentry].poisoned = true;
    }

    fn dentry(&self, id: usize) -> Result<&SimDentry, ReadError> {
        match self.dentries.get(id) {
            Some(d) if !d.poisoned => Ok(d),
            _ => Err(ReadError(EFAULT)),
        }
    }

    fn mnt(&self, id: usize) -> Result<&SimMount, ReadError> {
        self.mounts.get(id).ok_or(ReadError(EFAULT))
    }
}

impl DentryWalk for SimFs {
    type Dentry = usize;
    type Mount = usize;

    fn parent(&self, dentry: usize) -> Result<usize, ReadError> {
        Ok(self.dentry(dentry)?.parent)
    }

    fn name_len(&self, dentry: usize) -> Result<usize, ReadError> {
        Ok(self.dentry(dentry)?.name.len())
    }

    fn read_name(&self, dentry: usize, dst: &mut [u8]) -> Result<(), ReadError> {
        let name = self.dentry(dentry)?.name.as_bytes();
        if dst.len() != name.len() + 1 {
            return Err(ReadError(EFAULT));
        }
        dst[..name.len()].copy_from_slice(name);
        dst[name.len()] = 0;
        Ok(())
    }

    fn mount_root(&self, mnt: usize) -> Result<usize, ReadError> {
        Ok(self.mnt(mnt)?.root)
    }

    fn mount_parent(&self, mnt: usize) -> Result<usize, ReadError> {
        Ok(self.mnt(mnt)?.parent)
    }

    fn mountpoint(&self, mnt: usize) -> Result<usize, ReadError> {
        Ok(self.mnt(mnt)?.mountpoint)
    }
}

/// A task right after exec, with knobs to make each read fail.
pub struct SimTask {
    pid: u32,
    ppid: Option<u32>,
    comm: [u8; TASK_COMM_LEN],
    args: Option<Vec<u8>>,
    filename: Option<Vec<u8>>,
    fs: SimFs,
    pwd: Option<PathRef<usize, usize>>,
}

impl SimTask {
    pub fn exec(filename: &str, argv: &[&str], cwd: &str) -> Self {
        let mut args = vec![];
        for a in argv {
            args.extend_from_slice(a.as_bytes());
            args.push(0);
        }

        let mut fs = SimFs::new();
        let dentry = fs.mkdir_p(fs.root(), cwd);
        let comm = filename.rsplit('/').next().unwrap_or(filename);

        Self {
            pid: 100,
            ppid: Some(1),
            comm: [0; TASK_COMM_LEN],
            args: Some(args),
            filename: Some(filename.as_bytes().to_vec()),
            pwd: Some(PathRef {
                dentry,
                mnt: fs.root_mount(),
            }),
            fs,
        }
        .with_comm(comm)
    }

    pub fn with_ids(mut self, pid: u32, ppid: u32) -> Self {
        self.pid = pid;
        self.ppid = Some(ppid);
        self
    }

    /// Sets the task name the way the kernel does, truncated and null
    /// terminated.
    pub fn with_comm(mut self, comm: &str) -> Self {
        let n = comm.len().min(TASK_COMM_LEN - 1);
        self.comm = [0; TASK_COMM_LEN];
        self.comm[..n].copy_from_slice(&comm.as_bytes()[..n]);
        self
    }

    pub fn with_unreadable_args(mut self) -> Self {
        self.args = None;
        self
    }

    pub fn with_unreadable_filename(mut self) -> Self {
        self.filename = None;
        self
    }

    pub fn with_unreadable_pwd(mut self) -> Self {
        self.pwd = None;
        self
    }

    /// Makes every read on the dentry at `path` fail.
    pub fn with_unreadable_dir(mut self, path: &str) -> Self {
        let dentry = self.fs.mkdir_p(self.fs.root(), path);
        self.fs.poison(dentry);
        self
    }

    pub fn with_unreadable_parent(mut self) -> Self {
        self.ppid = None;
        self
    }
}

impl ExecContext for SimTask {
    type Fs = SimFs;

    fn tgid(&self) -> u32 {
        self.pid
    }

    fn parent_tgid(&self) -> Result<u32, ReadError> {
        self.ppid.ok_or(ReadError(EFAULT))
    }

    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        self.comm
    }

    fn read_args(&self, dst: &mut [u8]) -> Result<usize, ReadError> {
        let args = self.args.as_ref().ok_or(ReadError(EFAULT))?;
        let n = args.len().min(dst.len());
        dst[..n].copy_from_slice(&args[..n]);
        Ok(n)
    }

    // behaves like bpf_probe_read_kernel_str: truncates and always
    // terminates
    fn read_filename(&self, dst: &mut [u8]) -> Result<usize, ReadError> {
        let name = self.filename.as_ref().ok_or(ReadError(EFAULT))?;
        if dst.is_empty() {
            return Err(ReadError(EFAULT));
        }
        let n = name.len().min(dst.len() - 1);
        dst[..n].copy_from_slice(&name[..n]);
        dst[n] = 0;
        Ok(n + 1)
    }

    fn fs(&self) -> &SimFs {
        &self.fs
    }

    fn pwd(&self) -> Result<PathRef<usize, usize>, ReadError> {
        self.pwd.ok_or(ReadError(EFAULT))
    }
}

/// Scratch pool holding a single boxed record, or none at all.
pub struct BoxScratch(Option<Box<ExecEvent>>);

impl BoxScratch {
    pub fn new() -> Self {
        Self(Some(Box::new(ExecEvent::zeroed())))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl ScratchPool for BoxScratch {
    fn acquire(&mut self) -> Option<&mut ExecEvent> {
        self.0.as_deref_mut()
    }
}

/// Fixed capacity queue accounting records the way the BPF ring buffer
/// does: an 8 byte header per record, 8 byte aligned.
pub struct SimQueue {
    capacity: usize,
    used: Cell<usize>,
    records: RefCell<Vec<Vec<u8>>>,
}

impl SimQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Cell::new(0),
            records: RefCell::new(vec![]),
        }
    }

    /// Consumes everything queued so far.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.used.set(0);
        self.records.take()
    }
}

impl EventSink for SimQueue {
    fn output(&self, data: &[u8]) -> Result<(), EmitError> {
        let cost = (data.len() + 8 + 7) & !7;
        if self.used.get() + cost > self.capacity {
            return Err(EmitError::Dropped(EAGAIN));
        }
        self.used.set(self.used.get() + cost);
        self.records.borrow_mut().push(data.to_vec());
        Ok(())
    }
}
