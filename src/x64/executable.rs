// This module owns the executable-memory path for finalized kernels. A build maps an
// anonymous private region read-write, copies the assembled bytes in, and flips the
// protection to read-execute before anything can run; the mapping is never writable
// and executable at the same time. ExecutableMemory handles the mmap/mprotect/munmap
// lifecycle, Kernel pairs a mapping with the entry offset chosen during finalization
// and exposes the raw entry pointer plus a read-only view of the code bytes. A
// finalized kernel has no interior mutability and the generated code is reentrant,
// so Kernel is Send + Sync and concurrent invocations on disjoint buffers are safe.

//! Executable memory mapping and the finished kernel artifact.

use crate::core::error::{BuildError, BuildResult};

/// An anonymous executable mapping.
///
/// Created read-write, switched to read-execute once the code is in place,
/// unmapped on drop.
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

impl ExecutableMemory {
    /// Map a read-write region of at least `len` bytes.
    pub fn map(len: usize) -> BuildResult<Self> {
        let len = round_up_to_page(len.max(1));
        // SAFETY: anonymous private mapping, no fd, no fixed address.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BuildError::Memory {
                errno: last_errno(),
            });
        }
        log::trace!("mapped {len} bytes rw for kernel code");
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    /// Copy bytes into the mapping at `offset`. Only valid while writable.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len, "write past mapping");
        // SAFETY: range checked above; the mapping is currently PROT_WRITE.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
    }

    /// Drop write access and allow execution.
    pub fn make_executable(&mut self) -> BuildResult<()> {
        // SAFETY: ptr/len describe the mapping created in map().
        let rc = unsafe {
            libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(BuildError::Memory {
                errno: last_errno(),
            });
        }
        Ok(())
    }

    pub fn base(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from mmap and were never unmapped elsewhere.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

fn round_up_to_page(len: usize) -> usize {
    // SAFETY: plain sysconf query.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    len.div_ceil(page) * page
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// A finalized, executable kernel.
///
/// Immutable once constructed: the backing pages are read-execute and are
/// released when the kernel is dropped.
#[derive(Debug)]
pub struct Kernel {
    memory: ExecutableMemory,
    entry_offset: usize,
    code_len: usize,
}

// SAFETY: the mapping is read-execute and never mutated after finalize;
// the generated code is stateless and reentrant.
unsafe impl Send for Kernel {}
unsafe impl Sync for Kernel {}

impl Kernel {
    pub(crate) fn new(memory: ExecutableMemory, entry_offset: usize, code_len: usize) -> Self {
        Self {
            memory,
            entry_offset,
            code_len,
        }
    }

    /// Address of the function entry point.
    pub fn entry_ptr(&self) -> *const u8 {
        // SAFETY: entry_offset is within the mapping by construction.
        unsafe { self.memory.base().add(self.entry_offset) }
    }

    /// The assembled bytes, function body followed by the data pool.
    pub fn code_bytes(&self) -> &[u8] {
        // SAFETY: the region is PROT_READ and code_len bytes were written.
        unsafe { std::slice::from_raw_parts(self.entry_ptr(), self.code_len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_rounds_to_page_size() {
        let memory = ExecutableMemory::map(1).unwrap();
        assert!(memory.len() >= 1);
        assert_eq!(memory.len() % 4096, 0);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut memory = ExecutableMemory::map(64).unwrap();
        memory.write(3, &[1, 2, 3]);
        memory.make_executable().unwrap();

        let kernel = Kernel::new(memory, 3, 3);
        assert_eq!(kernel.code_bytes(), &[1, 2, 3]);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_mapped_code_is_callable() {
        let mut memory = ExecutableMemory::map(16).unwrap();
        memory.write(0, &[0xC3]); // ret
        memory.make_executable().unwrap();

        let kernel = Kernel::new(memory, 0, 1);
        let f: unsafe extern "sysv64" fn() = unsafe { std::mem::transmute(kernel.entry_ptr()) };
        unsafe { f() };
    }
}
