use std::path::Path;

use anyhow::{bail, Context as _};
use exectrace_common::KernelOffsets;
use tracing::{debug, warn};

use crate::btf::Btf;

const EXEC_FORMAT: &str = "events/sched/sched_process_exec/format";
const TRACEFS_ROOTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

// common header (8 bytes) followed by the filename __data_loc on every
// kernel shipping this tracepoint so far
pub const DEFAULT_FILENAME_LOC: u32 = 8;

/// Resolves every offset from the running kernel.
pub fn discover() -> anyhow::Result<KernelOffsets> {
    let btf = Btf::from_sys_fs().context("kernel BTF is required, pass --offsets otherwise")?;
    from_btf(&btf, tracepoint_filename_loc())
}

pub fn from_btf(btf: &Btf, filename_loc: u32) -> anyhow::Result<KernelOffsets> {
    let offsets = KernelOffsets {
        task_real_parent: btf.member_offset("task_struct", &["real_parent"])?,
        task_tgid: btf.member_offset("task_struct", &["tgid"])?,
        task_mm: btf.member_offset("task_struct", &["mm"])?,
        task_fs: btf.member_offset("task_struct", &["fs"])?,
        mm_arg_start: btf.member_offset("mm_struct", &["arg_start"])?,
        mm_arg_end: btf.member_offset("mm_struct", &["arg_end"])?,
        fs_pwd: btf.member_offset("fs_struct", &["pwd"])?,
        path_mnt: btf.member_offset("path", &["mnt"])?,
        path_dentry: btf.member_offset("path", &["dentry"])?,
        dentry_parent: btf.member_offset("dentry", &["d_parent"])?,
        dentry_name: btf.member_offset("dentry", &["d_name"])?,
        qstr_len: btf.member_offset("qstr", &["len"])?,
        qstr_name: btf.member_offset("qstr", &["name"])?,
        vfsmount_root: btf.member_offset("vfsmount", &["mnt_root"])?,
        mount_mnt: btf.member_offset("mount", &["mnt"])?,
        mount_parent: btf.member_offset("mount", &["mnt_parent"])?,
        mount_mountpoint: btf.member_offset("mount", &["mnt_mountpoint"])?,
        filename_loc,
    };
    debug!(?offsets, "resolved kernel offsets from BTF");
    Ok(offsets)
}

/// Offset of the filename `__data_loc` in the sched_process_exec payload,
/// read from the tracepoint format file.
pub fn tracepoint_filename_loc() -> u32 {
    for root in TRACEFS_ROOTS {
        let path = Path::new(root).join(EXEC_FORMAT);
        let Ok(format) = std::fs::read_to_string(&path) else {
            continue;
        };
        match filename_loc_from_format(&format) {
            Some(loc) => return loc,
            None => warn!("no filename field in {}", path.display()),
        }
    }
    debug!("tracefs not available, assuming filename at offset {DEFAULT_FILENAME_LOC}");
    DEFAULT_FILENAME_LOC
}

pub fn filename_loc_from_format(format: &str) -> Option<u32> {
    format
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("field:"))
        .find(|l| {
            l.split(';')
                .next()
                .is_some_and(|decl| decl.contains("__data_loc") && decl.ends_with(" filename"))
        })?
        .split(';')
        .find_map(|attr| attr.trim().strip_prefix("offset:"))?
        .parse()
        .ok()
}

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<KernelOffsets> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let offsets: KernelOffsets =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    if !offsets.is_resolved() {
        bail!("{}: offsets table is incomplete", path.display());
    }
    Ok(offsets)
}

pub fn to_toml(offsets: &KernelOffsets) -> anyhow::Result<String> {
    Ok(toml::to_string(offsets)?)
}
