//! Copying strings and buffers across the guest's linear memory.
//!
//! Every access goes through [`wasmtime::Memory`] with a fresh store borrow,
//! so a view over the backing buffer never outlives a call that may grow it.
//! Raw pointers stay inside [`GuestSlice`]; callers only move handles around.

use wasmtime::{AsContext, AsContextMut, Instance, Memory, TypedFunc};

use avm_sede::error::render_payload;

use crate::error::RuntimeError;

pub const MEMORY_EXPORT: &str = "memory";
pub const MALLOC_EXPORT: &str = "__wbindgen_malloc";
pub const REALLOC_EXPORT: &str = "__wbindgen_realloc";
pub const FREE_EXPORT: &str = "__wbindgen_free";

/// Width of a pointer/length return slot.
pub const SLOT_SIZE: usize = 8;

/// A pointer/length pair into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestSlice {
    pub ptr: u32,
    pub len: u32,
}

impl GuestSlice {
    /// Build a slice from the raw `i32` pair the guest passes around.
    pub fn from_raw(ptr: i32, len: i32) -> Self {
        Self {
            ptr: ptr as u32,
            len: len as u32,
        }
    }

    pub fn raw(self) -> (i32, i32) {
        (self.ptr as i32, self.len as i32)
    }
}

/// Handle on the guest's memory and its exported allocator.
#[derive(Clone)]
pub struct GuestMemory {
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    realloc: Option<TypedFunc<(i32, i32, i32), i32>>,
    free: TypedFunc<(i32, i32), ()>,
}

impl GuestMemory {
    /// Resolve `memory` and the allocator exports of an instantiated guest.
    pub fn from_instance(
        mut store: impl AsContextMut,
        instance: &Instance,
    ) -> Result<Self, RuntimeError> {
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| RuntimeError::MissingExport(MEMORY_EXPORT.into()))?;
        let malloc = instance
            .get_typed_func(&mut store, MALLOC_EXPORT)
            .map_err(|e| RuntimeError::MissingExport(format!("{MALLOC_EXPORT}: {e}")))?;
        let free = instance
            .get_typed_func(&mut store, FREE_EXPORT)
            .map_err(|e| RuntimeError::MissingExport(format!("{FREE_EXPORT}: {e}")))?;
        let realloc = instance
            .get_func(&mut store, REALLOC_EXPORT)
            .map(|func| func.typed(&store))
            .transpose()
            .map_err(|e| RuntimeError::MissingExport(format!("{REALLOC_EXPORT}: {e}")))?;

        Ok(Self {
            memory,
            malloc,
            realloc,
            free,
        })
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }

    pub fn has_realloc(&self) -> bool {
        self.realloc.is_some()
    }

    /// Current size of linear memory in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(&store)
    }

    pub fn malloc(&self, mut store: impl AsContextMut, len: u32) -> Result<u32, RuntimeError> {
        let ptr = self
            .malloc
            .call(&mut store, len as i32)
            .map_err(|e| RuntimeError::Allocation(format!("{MALLOC_EXPORT}({len}): {e}")))?;
        Ok(ptr as u32)
    }

    /// Release a slice through the guest allocator.
    pub fn free(&self, mut store: impl AsContextMut, slice: GuestSlice) -> Result<(), RuntimeError> {
        let (ptr, len) = slice.raw();
        self.free
            .call(&mut store, (ptr, len))
            .map_err(|e| RuntimeError::Allocation(format!("{FREE_EXPORT}({ptr:#x}, {len}): {e}")))
    }

    /// Allocate `bytes.len()` bytes in the guest and copy `bytes` there.
    pub fn write_bytes(
        &self,
        mut store: impl AsContextMut,
        bytes: &[u8],
    ) -> Result<GuestSlice, RuntimeError> {
        let len = guest_len(bytes.len())?;
        let ptr = self.malloc(&mut store, len)?;
        self.copy_in(&mut store, ptr, bytes)?;
        Ok(GuestSlice { ptr, len })
    }

    /// Write `text` as UTF-8.
    ///
    /// With a reallocator, one byte per character is reserved and filled while
    /// the text stays ASCII; the first non-ASCII character triggers a realloc
    /// to the exact UTF-8 length and the tail is copied after the prefix.
    /// Without one, a single allocation of the encoded length is used.
    pub fn write_str(
        &self,
        mut store: impl AsContextMut,
        text: &str,
    ) -> Result<GuestSlice, RuntimeError> {
        let Some(realloc) = &self.realloc else {
            return self.write_bytes(store, text.as_bytes());
        };

        let bytes = text.as_bytes();
        let reserved = guest_len(text.chars().count())?;
        let ptr = self.malloc(&mut store, reserved)?;

        let ascii = bytes.iter().take_while(|b| b.is_ascii()).count();
        self.copy_in(&mut store, ptr, &bytes[..ascii])?;
        if ascii == bytes.len() {
            return Ok(GuestSlice { ptr, len: reserved });
        }

        let len = guest_len(bytes.len())?;
        let ptr = realloc
            .call(&mut store, (ptr as i32, reserved as i32, len as i32))
            .map_err(|e| {
                RuntimeError::Allocation(format!("{REALLOC_EXPORT}({ptr:#x}, {reserved}, {len}): {e}"))
            })? as u32;
        let tail = ptr.checked_add(ascii as u32).ok_or(RuntimeError::MemoryAccess {
            ptr,
            len,
            size: self.memory.data_size(&store),
        })?;
        self.copy_in(&mut store, tail, &bytes[ascii..])?;

        Ok(GuestSlice { ptr, len })
    }

    /// Copy a slice out of guest memory. The range is checked before anything
    /// is allocated on the host.
    pub fn read_bytes(
        &self,
        store: impl AsContext,
        slice: GuestSlice,
    ) -> Result<Vec<u8>, RuntimeError> {
        let data = self.memory.data(&store);
        let start = slice.ptr as usize;
        start
            .checked_add(slice.len as usize)
            .and_then(|end| data.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or(RuntimeError::MemoryAccess {
                ptr: slice.ptr,
                len: slice.len,
                size: data.len(),
            })
    }

    /// Read a UTF-8 string. Malformed sequences are an error, never replaced.
    pub fn read_str(&self, store: impl AsContext, slice: GuestSlice) -> Result<String, RuntimeError> {
        let bytes = self.read_bytes(store, slice)?;
        String::from_utf8(bytes).map_err(|source| RuntimeError::InvalidUtf8 {
            ptr: slice.ptr,
            len: slice.len,
            payload: render_payload(source.as_bytes()),
            source: source.utf8_error(),
        })
    }

    /// Read the little-endian `(ptr, len)` pair stored at `addr`.
    pub fn read_slot(&self, store: impl AsContext, addr: u32) -> Result<GuestSlice, RuntimeError> {
        let mut raw = [0u8; SLOT_SIZE];
        self.memory
            .read(&store, addr as usize, &mut raw)
            .map_err(|_| RuntimeError::MemoryAccess {
                ptr: addr,
                len: SLOT_SIZE as u32,
                size: self.memory.data_size(&store),
            })?;
        let ptr = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(GuestSlice { ptr, len })
    }

    /// Store `slice` as a little-endian `(ptr, len)` pair at `addr`.
    pub fn write_slot(
        &self,
        store: impl AsContextMut,
        addr: u32,
        slice: GuestSlice,
    ) -> Result<(), RuntimeError> {
        let mut raw = [0u8; SLOT_SIZE];
        raw[..4].copy_from_slice(&slice.ptr.to_le_bytes());
        raw[4..].copy_from_slice(&slice.len.to_le_bytes());
        self.copy_in(store, addr, &raw)
    }

    fn copy_in(
        &self,
        mut store: impl AsContextMut,
        ptr: u32,
        bytes: &[u8],
    ) -> Result<(), RuntimeError> {
        self.memory
            .write(&mut store, ptr as usize, bytes)
            .map_err(|_| RuntimeError::MemoryAccess {
                ptr,
                len: bytes.len() as u32,
                size: self.memory.data_size(&store),
            })
    }
}

fn guest_len(len: usize) -> Result<u32, RuntimeError> {
    u32::try_from(len)
        .ok()
        .filter(|len| *len <= i32::MAX as u32)
        .ok_or(RuntimeError::TooLarge(len))
}
