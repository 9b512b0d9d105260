//! Module loader: reads a binary module file and native dynamic libraries.
//!
//! File layout (all multi-byte numeric fields big-endian except `f64`,
//! which is native):
//!
//! 1. Magic header (fixed 8-byte sequence).
//! 2. Binary-type marker (executable or library).
//! 3. Metadata: count-prefixed list of `(key\0value\0)` pairs.
//! 4. External-function signature list (count-prefixed, null-terminated).
//! 5. External-block signature list (count-prefixed, null-terminated).
//! 6. Jump table: count-prefixed list of 64-bit big-endian addresses.
//! 7. Function address map: count-prefixed list of `(name\0 + u64 offset)`.
//! 8. Block address map: same shape.
//! 9. Code segment: raw bytes indexed by the above offsets.

mod native;

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

pub use native::{resolve_native_module, ForeignFunction, NativeLoadError, NativeModule};

/// The fixed 8-byte magic header every module file starts with.
pub const MAGIC: [u8; 8] = *b"VIUAVM\0\0";

/// Whether a loaded module is directly executable or a library of
/// functions/blocks meant to be imported by others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Executable,
    Library,
}

/// Failure modes of loading a module file. All fatal: the Kernel halts on
/// any of these rather than surfacing them to running Viua code.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("I/O error reading module: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic header: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 8], found: [u8; 8] },
    #[error("module truncated while reading {0}")]
    Truncated(&'static str),
    #[error("module contained invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown binary-type marker byte {0}")]
    UnknownBinaryKind(u8),
}

fn truncated(what: &'static str) -> LoaderError {
    LoaderError::Truncated(what)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], LoaderError> {
        let end = self.offset.checked_add(len).ok_or_else(|| truncated(what))?;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| truncated(what))?;
        self.offset = end;
        Ok(slice)
    }

    fn take_u8(&mut self, what: &'static str) -> Result<u8, LoaderError> {
        Ok(self.take(1, what)?[0])
    }

    fn take_u32(&mut self, what: &'static str) -> Result<u32, LoaderError> {
        Ok(u32::from_be_bytes(self.take(4, what)?.try_into().unwrap()))
    }

    fn take_u64(&mut self, what: &'static str) -> Result<u64, LoaderError> {
        Ok(u64::from_be_bytes(self.take(8, what)?.try_into().unwrap()))
    }

    fn take_cstr(&mut self, what: &'static str) -> Result<String, LoaderError> {
        let start = self.offset;
        loop {
            let byte = self.take_u8(what)?;
            if byte == 0 {
                let body = &self.bytes[start..self.offset - 1];
                return std::str::from_utf8(body).map(str::to_owned).map_err(|_| LoaderError::InvalidUtf8(what));
            }
        }
    }

    fn take_name_offset_map(&mut self, what: &'static str) -> Result<BTreeMap<String, u64>, LoaderError> {
        let count = self.take_u32(what)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let name = self.take_cstr(what)?;
            let offset = self.take_u64(what)?;
            map.insert(name, offset);
        }
        Ok(map)
    }

    fn take_name_list(&mut self, what: &'static str) -> Result<Vec<String>, LoaderError> {
        let count = self.take_u32(what)?;
        (0..count).map(|_| self.take_cstr(what)).collect()
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }
}

/// Loaded code: bytecode bytes, address maps, metadata, and unresolved
/// external signature lists, ready for a process to start executing at
/// [`Module::entry_offset`].
#[derive(Debug, Clone)]
pub struct Module {
    kind: BinaryKind,
    metadata: BTreeMap<String, String>,
    external_functions: Vec<String>,
    external_blocks: Vec<String>,
    jump_table: Vec<u64>,
    function_addresses: BTreeMap<String, u64>,
    block_addresses: BTreeMap<String, u64>,
    code: Vec<u8>,
}

impl Module {
    /// Parse a module from an in-memory buffer (as already read from disk).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, LoaderError> {
        let mut cursor = Cursor::new(&bytes);
        let magic: [u8; 8] = cursor.take(8, "magic header")?.try_into().unwrap();
        if magic != MAGIC {
            return Err(LoaderError::BadMagic { expected: MAGIC, found: magic });
        }
        let kind = match cursor.take_u8("binary-type marker")? {
            0 => BinaryKind::Executable,
            1 => BinaryKind::Library,
            other => return Err(LoaderError::UnknownBinaryKind(other)),
        };

        let metadata_count = cursor.take_u32("metadata count")?;
        let mut metadata = BTreeMap::new();
        for _ in 0..metadata_count {
            let key = cursor.take_cstr("metadata key")?;
            let value = cursor.take_cstr("metadata value")?;
            metadata.insert(key, value);
        }

        let external_functions = cursor.take_name_list("external-function signatures")?;
        let external_blocks = cursor.take_name_list("external-block signatures")?;

        let jump_count = cursor.take_u32("jump table count")?;
        let mut jump_table = Vec::with_capacity(jump_count as usize);
        for _ in 0..jump_count {
            jump_table.push(cursor.take_u64("jump table entry")?);
        }

        let function_addresses = cursor.take_name_offset_map("function address map")?;
        let block_addresses = cursor.take_name_offset_map("block address map")?;

        let code = cursor.remaining().to_vec();

        Ok(Self {
            kind,
            metadata,
            external_functions,
            external_blocks,
            jump_table,
            function_addresses,
            block_addresses,
            code,
        })
    }

    /// Read and parse a module file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let mut file = std::fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    pub const fn kind(&self) -> BinaryKind {
        self.kind
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn external_functions(&self) -> &[String] {
        &self.external_functions
    }

    pub fn external_blocks(&self) -> &[String] {
        &self.external_blocks
    }

    pub fn jump_table(&self) -> &[u64] {
        &self.jump_table
    }

    /// Byte offset of `name`'s entry point, if this module exports it.
    pub fn function_offset(&self, name: &str) -> Option<u64> {
        self.function_addresses.get(name).copied()
    }

    /// Byte offset of block `name`'s entry point, if this module exports it.
    pub fn block_offset(&self, name: &str) -> Option<u64> {
        self.block_addresses.get(name).copied()
    }

    /// Size, in bytes, of function `name`'s body: the gap to the next
    /// higher offset in the combined function+block address space, or to
    /// the end of the code segment for the last one.
    pub fn function_size(&self, name: &str) -> Option<u64> {
        let start = self.function_offset(name)?;
        let mut boundaries: Vec<u64> = self
            .function_addresses
            .values()
            .chain(self.block_addresses.values())
            .copied()
            .filter(|&offset| offset > start)
            .collect();
        boundaries.sort_unstable();
        Some(boundaries.first().copied().unwrap_or(self.code.len() as u64) - start)
    }

    /// The offset named by the `main` metadata key, or the module's sole
    /// exported function if there is exactly one, used to find the
    /// executable entry point.
    pub fn entry_offset(&self) -> Option<u64> {
        if let Some(name) = self.metadata.get("main") {
            return self.function_offset(name);
        }
        if self.function_addresses.len() == 1 {
            return self.function_addresses.values().next().copied();
        }
        None
    }

    /// The raw code segment, indexed by the offsets above.
    pub fn code(&self) -> &[u8] {
        &self.code
    }
}
