//! Working directory reconstruction from a dentry/mount pair.
//!
//! Dentries only link to their parent, so the walk produces the path
//! leaf first: `/mnt/dir1/dir2` is written as `dir2\0dir1\0mnt\0`.
//! Reversing the components and replacing each null with a separator is
//! left to user space (see [`crate::record`]).

use crate::{ReadError, MAX_PATH_COMPONENTS, NAME_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Component name longer than `NAME_MAX`.
    NameTooLong,
    /// Component does not fit in the remaining output.
    OutOfSpace,
    Read(ReadError),
}

impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        Self::Read(value)
    }
}

/// Fallible accessors over the kernel's dentry and mount graph.
pub trait DentryWalk {
    type Dentry: Copy + PartialEq;
    type Mount: Copy + PartialEq;

    fn parent(&self, dentry: Self::Dentry) -> Result<Self::Dentry, ReadError>;

    fn name_len(&self, dentry: Self::Dentry) -> Result<usize, ReadError>;

    /// Reads the dentry name and its trailing null into `dst`, which is
    /// exactly `name_len + 1` bytes long.
    fn read_name(&self, dentry: Self::Dentry, dst: &mut [u8]) -> Result<(), ReadError>;

    fn mount_root(&self, mnt: Self::Mount) -> Result<Self::Dentry, ReadError>;

    /// The mount this one is attached to. The global root mount is its
    /// own parent.
    fn mount_parent(&self, mnt: Self::Mount) -> Result<Self::Mount, ReadError>;

    /// Dentry in the parent mount this mount is attached on.
    fn mountpoint(&self, mnt: Self::Mount) -> Result<Self::Dentry, ReadError>;
}

/// A `struct path`: a dentry and the mount it was reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRef<D, M> {
    pub dentry: D,
    pub mnt: M,
}

// Appends the dentry name at `off`, returning the new offset.
#[inline(always)]
fn append_name<W: DentryWalk>(
    walk: &W,
    dentry: W::Dentry,
    out: &mut [u8],
    off: usize,
) -> Result<usize, Error> {
    let len = walk.name_len(dentry)?;
    if len > NAME_MAX {
        return Err(Error::NameTooLong);
    }

    // also keep the trailing \0
    let end = off + len + 1;
    let dst = out.get_mut(off..end).ok_or(Error::OutOfSpace)?;
    walk.read_name(dentry, dst)?;

    Ok(end)
}

/// Walks from `start` up to the global root writing null-terminated
/// components into `out`, innermost first, and returns the number of bytes
/// written.
///
/// The walk stops after `MAX_PATH_COMPONENTS` steps (a mount crossing uses
/// one), truncating deeper paths. A component that is too long or does not
/// fit fails the walk only if nothing was written yet, otherwise the partial
/// chain is returned. A failed read always fails the walk.
#[inline(always)]
pub fn resolve<W: DentryWalk>(
    walk: &W,
    start: PathRef<W::Dentry, W::Mount>,
    out: &mut [u8],
) -> Result<usize, Error> {
    let mut dentry = start.dentry;
    let mut mnt = start.mnt;
    let mut mnt_root = walk.mount_root(mnt)?;
    let mut mnt_parent = walk.mount_parent(mnt)?;
    let mut off = 0;

    for _ in 0..MAX_PATH_COMPONENTS {
        let d_parent = walk.parent(dentry)?;

        if dentry == mnt_root || dentry == d_parent {
            if dentry != mnt_root {
                // reached a root which is not the mount root, escaped?
                break;
            }
            if mnt == mnt_parent {
                // global root
                break;
            }

            // continue from the mountpoint in the parent mount
            dentry = walk.mountpoint(mnt)?;
            mnt = mnt_parent;
            mnt_parent = walk.mount_parent(mnt)?;
            mnt_root = walk.mount_root(mnt)?;
            continue;
        }

        match append_name(walk, dentry, out, off) {
            Ok(end) => off = end,
            Err(Error::NameTooLong | Error::OutOfSpace) if off > 0 => break,
            Err(e) => return Err(e),
        }

        dentry = d_parent;
    }

    Ok(off)
}
