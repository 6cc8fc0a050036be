// Platform memory primitives.
//
// Linux reserves with `mmap(MAP_NORESERVE)` and returns physical pages with
// `madvise(MADV_DONTNEED)`; the virtual mapping stays valid for the lifetime
// of the region. Windows reserves with `VirtualAlloc(MEM_RESERVE)`, commits
// ranges explicitly before first use, and decommits instead of advising.

use crate::error::{DbError, Result};

#[cfg(unix)]
pub fn reserve(len: usize) -> Result<*mut u8> {
    // SAFETY: anonymous private mapping, no backing fd, length checked by mmap
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(DbError::OutOfMemory(format!(
            "mmap of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        )));
    }

    Ok(ptr as *mut u8)
}

#[cfg(unix)]
pub fn unreserve(ptr: *mut u8, len: usize) -> Result<()> {
    // SAFETY: ptr/len describe a mapping obtained from reserve()
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
    if rc != 0 {
        return Err(DbError::Memory(format!(
            "munmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Commit a sub-range before first use. First touch commits on unix, so this
/// is a no-op there.
#[cfg(unix)]
pub fn commit(_ptr: *mut u8, _len: usize) -> Result<()> {
    Ok(())
}

/// Give the physical pages of a sub-range back to the operating system while
/// keeping the virtual mapping intact.
#[cfg(unix)]
pub fn discard(ptr: *mut u8, len: usize) -> Result<()> {
    // SAFETY: ptr/len lie inside a mapping obtained from reserve()
    let rc = unsafe { libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_DONTNEED) };
    if rc != 0 {
        return Err(DbError::Memory(format!(
            "madvise(MADV_DONTNEED) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(unix)]
pub fn system_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

#[cfg(windows)]
pub fn reserve(len: usize) -> Result<*mut u8> {
    use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_RESERVE, PAGE_READWRITE};

    // SAFETY: reserving address space only; nothing is committed yet
    let ptr = unsafe { VirtualAlloc(std::ptr::null(), len, MEM_RESERVE, PAGE_READWRITE) };
    if ptr.is_null() {
        return Err(DbError::OutOfMemory(format!(
            "VirtualAlloc(MEM_RESERVE) of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(windows)]
pub fn unreserve(ptr: *mut u8, _len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    // SAFETY: ptr is the base of a region obtained from reserve(); MEM_RELEASE
    // requires a zero length
    let rc = unsafe { VirtualFree(ptr as *mut core::ffi::c_void, 0, MEM_RELEASE) };
    if rc == 0 {
        return Err(DbError::Memory(format!(
            "VirtualFree(MEM_RELEASE) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(windows)]
pub fn commit(ptr: *mut u8, len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, PAGE_READWRITE};

    // SAFETY: ptr/len lie inside a reserved region
    let committed =
        unsafe { VirtualAlloc(ptr as *const core::ffi::c_void, len, MEM_COMMIT, PAGE_READWRITE) };
    if committed.is_null() {
        return Err(DbError::OutOfMemory(format!(
            "VirtualAlloc(MEM_COMMIT) of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(windows)]
pub fn discard(ptr: *mut u8, len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_DECOMMIT};

    // SAFETY: ptr/len lie inside a reserved region; decommit keeps the
    // reservation
    let rc = unsafe { VirtualFree(ptr as *mut core::ffi::c_void, len, MEM_DECOMMIT) };
    if rc == 0 {
        return Err(DbError::Memory(format!(
            "VirtualFree(MEM_DECOMMIT) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(windows)]
pub fn system_page_size() -> usize {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: GetSystemInfo fills the struct unconditionally
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_unreserve() {
        let len = 1024 * 1024;
        let ptr = reserve(len).unwrap();
        assert!(!ptr.is_null());
        unreserve(ptr, len).unwrap();
    }

    #[test]
    fn test_discard_keeps_mapping_usable() {
        let len = 64 * 1024;
        let ptr = reserve(len).unwrap();
        commit(ptr, len).unwrap();

        // SAFETY: freshly reserved and committed mapping
        unsafe {
            *ptr = 0xAB;
            assert_eq!(*ptr, 0xAB);
        }

        discard(ptr, len).unwrap();
        commit(ptr, len).unwrap();

        // The mapping is still valid after discarding physical pages.
        unsafe {
            *ptr = 0xCD;
            assert_eq!(*ptr, 0xCD);
        }

        unreserve(ptr, len).unwrap();
    }

    #[test]
    fn test_system_page_size_sane() {
        let size = system_page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
