use anyhow::Context;
use anyhow::Result;
use std::ffi::CString;

/// named POSIX semaphore, shared by name across the agent processes.
/// open-or-create semantics: whichever agent arrives first creates it
/// with the given initial value, the rest attach.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: CString,
}

impl Semaphore {
    pub fn open(name: &str, initial: u32) -> Result<Self> {
        let cname = CString::new(name).context("semaphore name")?;
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        anyhow::ensure!(
            sem != libc::SEM_FAILED,
            "sem_open({}): {}",
            name,
            std::io::Error::last_os_error()
        );
        Ok(Self { sem, name: cname })
    }

    pub fn post(&self) -> Result<()> {
        let rc = unsafe { libc::sem_post(self.sem) };
        anyhow::ensure!(rc == 0, "sem_post: {}", std::io::Error::last_os_error());
        Ok(())
    }

    pub fn wait(&self) -> Result<()> {
        loop {
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                anyhow::bail!("sem_wait: {}", err);
            }
        }
    }

    /// timed wait against CLOCK_REALTIME. Ok(false) on timeout.
    pub fn wait_timeout(&self, millis: u64) -> Result<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
        anyhow::ensure!(rc == 0, "clock_gettime: {}", std::io::Error::last_os_error());
        let nanos = now.tv_nsec as i64 + (millis % 1000) as i64 * 1_000_000;
        let deadline = libc::timespec {
            tv_sec: now.tv_sec
                + (millis / 1000) as libc::time_t
                + (nanos / 1_000_000_000) as libc::time_t,
            tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
        };
        loop {
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => anyhow::bail!("sem_timedwait: {}", std::io::Error::last_os_error()),
            }
        }
    }

    /// remove the name from the system. existing handles stay valid.
    /// reserved for whoever owns the run's names; fails silently if
    /// the name is already gone.
    pub fn unlink(&self) {
        unsafe { libc::sem_unlink(self.name.as_ptr()) };
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}

unsafe impl Send for Semaphore {}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(tag: &str) -> String {
        format!("/keepaway-sem-{}-{}", tag, std::process::id())
    }

    #[test]
    fn post_then_wait() {
        let ref name = name("post");
        let sem = Semaphore::open(name, 0).unwrap();
        sem.post().unwrap();
        sem.wait().unwrap();
        sem.unlink();
    }

    #[test]
    fn timed_wait_expires() {
        let ref name = name("timeout");
        let sem = Semaphore::open(name, 0).unwrap();
        assert!(sem.wait_timeout(20).unwrap() == false);
        sem.post().unwrap();
        assert!(sem.wait_timeout(20).unwrap() == true);
        sem.unlink();
    }
}
