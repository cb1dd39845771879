//! User space view over a record received from the ring buffer.

use std::fmt;
use std::path::Path;

use crate::{EventHeader, Segments, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    ShortHeader(usize),
    ShortPayload { expected: usize, got: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortHeader(n) => write!(f, "record too short for header: {n} bytes"),
            Self::ShortPayload { expected, got } => {
                write!(f, "record payload truncated: expected {expected} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

fn cstr_lossy(b: &[u8]) -> String {
    let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
    String::from_utf8_lossy(&b[..end]).into_owned()
}

/// Borrowed, sliced view of one exec record.
#[derive(Debug, Clone, Copy)]
pub struct ExecRecord<'a> {
    header: EventHeader,
    argv: &'a [u8],
    path: &'a [u8],
    cwd: &'a [u8],
}

impl<'a> ExecRecord<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        let head = data
            .get(..HEADER_SIZE)
            .ok_or(DecodeError::ShortHeader(data.len()))?;
        let header: EventHeader = bytemuck::pod_read_unaligned(head);

        let argv_end = HEADER_SIZE + header.argv_size as usize;
        let path_end = argv_end + header.path_size as usize;
        let cwd_end = path_end + header.cwd_size as usize;
        if data.len() < cwd_end {
            return Err(DecodeError::ShortPayload {
                expected: cwd_end,
                got: data.len(),
            });
        }

        Ok(Self {
            header,
            argv: &data[HEADER_SIZE..argv_end],
            path: &data[argv_end..path_end],
            cwd: &data[path_end..cwd_end],
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn comm(&self) -> String {
        cstr_lossy(&self.header.comm)
    }

    /// Executable path as passed to exec, possibly relative.
    pub fn path(&self) -> String {
        cstr_lossy(self.path)
    }

    /// Arguments split on their null separators.
    pub fn argv(&self) -> Vec<String> {
        if self.argv.is_empty() {
            return vec![];
        }
        let raw = self.argv.strip_suffix(b"\0").unwrap_or(self.argv);
        raw.split(|&b| b == 0)
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    /// Raw leaf-to-root component chain.
    pub fn cwd_components(&self) -> impl DoubleEndedIterator<Item = &'a [u8]> {
        let raw = self.cwd.strip_suffix(b"\0").unwrap_or(self.cwd);
        raw.split(|&b| b == 0).filter(|c| !c.is_empty())
    }

    /// Absolute working directory, components reversed and joined with `/`.
    pub fn cwd(&self) -> String {
        let mut out = String::new();
        for c in self.cwd_components().rev() {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(c));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Executable path, joined onto the working directory when relative and
    /// `segments` says the directory was captured. An empty chain is `/`.
    pub fn executable(&self, segments: Segments) -> String {
        let path = self.path();
        if path.starts_with('/') || !segments.contains(Segments::CWD) {
            return path;
        }
        Path::new(&self.cwd()).join(path).to_string_lossy().into_owned()
    }
}
