//! Just enough of the BTF format to look up struct member offsets in the
//! running kernel's type information.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context as _};

pub const VMLINUX: &str = "/sys/kernel/btf/vmlinux";

const BTF_MAGIC: u16 = 0xeb9f;
const HEADER_LEN: usize = 24;
const TYPE_LEN: usize = 12;

const KIND_INT: u32 = 1;
const KIND_PTR: u32 = 2;
const KIND_ARRAY: u32 = 3;
const KIND_STRUCT: u32 = 4;
const KIND_UNION: u32 = 5;
const KIND_ENUM: u32 = 6;
const KIND_FWD: u32 = 7;
const KIND_TYPEDEF: u32 = 8;
const KIND_VOLATILE: u32 = 9;
const KIND_CONST: u32 = 10;
const KIND_RESTRICT: u32 = 11;
const KIND_FUNC: u32 = 12;
const KIND_FUNC_PROTO: u32 = 13;
const KIND_VAR: u32 = 14;
const KIND_DATASEC: u32 = 15;
const KIND_FLOAT: u32 = 16;
const KIND_DECL_TAG: u32 = 17;
const KIND_TYPE_TAG: u32 = 18;
const KIND_ENUM64: u32 = 19;

// typedef chains are short, this only guards against malformed input
const MAX_ALIAS_DEPTH: usize = 32;
const MAX_ANON_DEPTH: usize = 8;

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl Reader<'_> {
    fn u32_at(&self, off: usize) -> anyhow::Result<u32> {
        let b: [u8; 4] = self
            .data
            .get(off..off + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("BTF truncated at offset {off}"))?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }
}

#[derive(Debug, Clone)]
struct Member {
    name_off: u32,
    type_id: u32,
    bit_offset: u32,
}

#[derive(Debug, Clone)]
enum Type {
    Composite(Vec<Member>),
    // typedef and type qualifiers
    Alias(u32),
    Other,
}

pub struct Btf {
    // index 0 is void
    types: Vec<Type>,
    strings: Vec<u8>,
    structs: HashMap<String, u32>,
}

impl Btf {
    pub fn from_sys_fs() -> anyhow::Result<Self> {
        Self::from_file(VMLINUX)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let magic = data
            .get(..2)
            .map(|m| u16::from_le_bytes([m[0], m[1]]))
            .ok_or_else(|| anyhow!("BTF too short"))?;
        let big_endian = match magic {
            BTF_MAGIC => false,
            m if m.swap_bytes() == BTF_MAGIC => true,
            m => bail!("bad BTF magic {m:#06x}"),
        };
        let r = Reader { data, big_endian };

        let hdr_len = r.u32_at(4)? as usize;
        if hdr_len < HEADER_LEN {
            bail!("BTF header too short: {hdr_len}");
        }
        let type_off = hdr_len + r.u32_at(8)? as usize;
        let type_len = r.u32_at(12)? as usize;
        let str_off = hdr_len + r.u32_at(16)? as usize;
        let str_len = r.u32_at(20)? as usize;

        let strings = data
            .get(str_off..str_off + str_len)
            .ok_or_else(|| anyhow!("BTF string section out of bounds"))?
            .to_vec();

        let mut btf = Btf {
            types: vec![Type::Other],
            strings,
            structs: HashMap::new(),
        };

        let end = type_off + type_len;
        if end > data.len() {
            bail!("BTF type section out of bounds");
        }

        let mut off = type_off;
        while off < end {
            let name_off = r.u32_at(off)?;
            let info = r.u32_at(off + 4)?;
            let size_or_type = r.u32_at(off + 8)?;
            let kind = (info >> 24) & 0x1f;
            let vlen = (info & 0xffff) as usize;
            let kflag = info >> 31 == 1;
            off += TYPE_LEN;

            let id = btf.types.len() as u32;
            let ty = match kind {
                KIND_STRUCT | KIND_UNION => {
                    let mut members = Vec::with_capacity(vlen);
                    for i in 0..vlen {
                        let m = off + i * 12;
                        let raw_offset = r.u32_at(m + 8)?;
                        members.push(Member {
                            name_off: r.u32_at(m)?,
                            type_id: r.u32_at(m + 4)?,
                            // with kflag the top 8 bits hold the bitfield size
                            bit_offset: if kflag { raw_offset & 0xff_ffff } else { raw_offset },
                        });
                    }
                    if kind == KIND_STRUCT {
                        let name = btf.name(name_off).to_string();
                        if !name.is_empty() {
                            btf.structs.entry(name).or_insert(id);
                        }
                    }
                    Type::Composite(members)
                }
                KIND_TYPEDEF | KIND_VOLATILE | KIND_CONST | KIND_RESTRICT | KIND_TYPE_TAG => {
                    Type::Alias(size_or_type)
                }
                _ => Type::Other,
            };

            off += match kind {
                KIND_INT | KIND_VAR | KIND_DECL_TAG => 4,
                KIND_ARRAY => 12,
                KIND_STRUCT | KIND_UNION | KIND_DATASEC | KIND_ENUM64 => 12 * vlen,
                KIND_ENUM | KIND_FUNC_PROTO => 8 * vlen,
                KIND_PTR | KIND_FWD | KIND_TYPEDEF | KIND_VOLATILE | KIND_CONST
                | KIND_RESTRICT | KIND_FUNC | KIND_FLOAT | KIND_TYPE_TAG => 0,
                k => bail!("unknown BTF kind {k} for type {id}"),
            };

            btf.types.push(ty);
        }

        Ok(btf)
    }

    fn name(&self, off: u32) -> &str {
        let tail = self.strings.get(off as usize..).unwrap_or_default();
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).unwrap_or_default()
    }

    fn resolve(&self, mut id: u32) -> Option<&Type> {
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.types.get(id as usize)? {
                Type::Alias(next) => id = *next,
                ty => return Some(ty),
            }
        }
        None
    }

    // Anonymous struct/union members are searched through, their offset
    // added to the one of the member found inside.
    fn find_member(&self, id: u32, name: &str, depth: usize) -> Option<(u32, u32)> {
        let Some(Type::Composite(members)) = self.resolve(id) else {
            return None;
        };

        for m in members {
            if m.name_off != 0 {
                if self.name(m.name_off) == name {
                    return Some((m.bit_offset, m.type_id));
                }
            } else if depth < MAX_ANON_DEPTH {
                if let Some((off, ty)) = self.find_member(m.type_id, name, depth + 1) {
                    return Some((m.bit_offset + off, ty));
                }
            }
        }
        None
    }

    /// Byte offset of `fields` (a path of nested members) inside
    /// `struct <name>`.
    pub fn member_offset(&self, name: &str, fields: &[&str]) -> anyhow::Result<u32> {
        let mut id = *self
            .structs
            .get(name)
            .ok_or_else(|| anyhow!("struct {name} not found in BTF"))?;

        let mut bits = 0;
        for field in fields {
            let (off, ty) = self
                .find_member(id, field, 0)
                .ok_or_else(|| anyhow!("struct {name} has no member {}", fields.join(".")))?;
            bits += off;
            id = ty;
        }

        if bits % 8 != 0 {
            bail!("{name}.{} is a bitfield", fields.join("."));
        }
        Ok(bits / 8)
    }
}
