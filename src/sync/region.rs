use anyhow::Context;
use anyhow::Result;
use std::ffi::CString;

/// a fixed-layout record visible to every agent of a run. the shared
/// variant maps a named POSIX object; whichever agent arrives first
/// creates and sizes it, the rest attach to the same pages. the heap
/// variant backs single-process use and tests with identical code
/// paths minus the OS mapping.
///
/// mutation discipline is external: between barriers only the leader
/// writes, all agents read, and the barrier semaphores order the two.
pub enum Region<T> {
    Shm {
        ptr: *mut T,
        name: CString,
        owner: bool,
    },
    Heap(Box<T>),
}

impl<T> Region<T> {
    /// map the named object, creating it if absent. the bool reports
    /// whether this call created (and must therefore initialize) it.
    /// only the owning agent unlinks the name at teardown; everyone
    /// else just drops their mapping, so late joiners keep attaching
    /// to the live region for as long as the owner runs.
    pub fn shared(name: &str, owner: bool) -> Result<(Self, bool)> {
        let size = std::mem::size_of::<T>();
        let cname = CString::new(name).context("region name")?;
        let oflag = libc::O_CREAT | libc::O_EXCL | libc::O_RDWR;
        let mut created = true;
        let mut fd = unsafe { libc::shm_open(cname.as_ptr(), oflag, 0o666 as libc::mode_t) };
        if fd >= 0 {
            let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            anyhow::ensure!(rc == 0, "ftruncate({}): {}", name, last_error());
        } else {
            let err = std::io::Error::last_os_error();
            anyhow::ensure!(
                err.raw_os_error() == Some(libc::EEXIST),
                "shm_open({}): {}",
                name,
                err
            );
            created = false;
            fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o666 as libc::mode_t) };
            anyhow::ensure!(fd >= 0, "shm_open({}): {}", name, last_error());
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        anyhow::ensure!(ptr != libc::MAP_FAILED, "mmap({}): {}", name, last_error());
        log::info!(
            "{} region {} ({} bytes)",
            if created { "created" } else { "attached" },
            name,
            size
        );
        Ok((
            Self::Shm {
                ptr: ptr as *mut T,
                name: cname,
                owner,
            },
            created,
        ))
    }

    /// private heap-backed region, zero-initialized
    pub fn private() -> Self {
        Self::Heap(unsafe { Box::<T>::new_zeroed().assume_init() })
    }

    pub fn get(&self) -> &T {
        match self {
            Self::Shm { ptr, .. } => unsafe { &**ptr },
            Self::Heap(boxed) => boxed,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        match self {
            Self::Shm { ptr, .. } => unsafe { &mut **ptr },
            Self::Heap(boxed) => boxed,
        }
    }
}

impl<T> Drop for Region<T> {
    fn drop(&mut self) {
        if let Self::Shm { ptr, name, owner } = self {
            unsafe {
                libc::munmap(*ptr as *mut libc::c_void, std::mem::size_of::<T>());
                if *owner {
                    libc::shm_unlink(name.as_ptr());
                }
            }
        }
    }
}

fn last_error() -> std::io::Error {
    std::io::Error::last_os_error()
}
