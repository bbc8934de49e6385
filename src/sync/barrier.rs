use super::semaphore::Semaphore;
use anyhow::Result;

/// reusable N-party rendezvous. the double turnstile guarantees that
/// nobody can lap the group: every party leaves phase one before any
/// party leaves phase two, and the counter is back to zero when the
/// last one is through. semaphore operations double as memory fences,
/// so writes published before a release are visible after the matching
/// acquire on every agent.
pub enum Barrier {
    /// N agents meeting through named semaphores, counter in the
    /// shared region
    Shared(Turnstiles),
    /// degenerate single-party barrier backing private regions
    Solo,
}

pub struct Turnstiles {
    parties: usize,
    mutex: Semaphore,
    turnstile: Semaphore,
    turnstile2: Semaphore,
    blocked: *mut i32,
    owner: bool,
}

impl Barrier {
    /// open (or attach to) the three named semaphores for run `tag`.
    /// `blocked` must point into the region shared by all parties.
    /// only the owning party unlinks the names at teardown; the rest
    /// close their handles and leave the names for the team.
    pub fn shared(tag: u64, parties: usize, blocked: *mut i32, owner: bool) -> Result<Self> {
        assert!(parties > 0);
        Ok(Self::Shared(Turnstiles {
            parties,
            mutex: Semaphore::open(&format!("/{:x}.mutex", tag), 1)?,
            turnstile: Semaphore::open(&format!("/{:x}.turnstile", tag), 0)?,
            turnstile2: Semaphore::open(&format!("/{:x}.turnstile2", tag), 0)?,
            blocked,
            owner,
        }))
    }

    pub fn solo() -> Self {
        Self::Solo
    }

    /// block until all parties arrive. reusable immediately after.
    pub fn wait(&self) -> Result<()> {
        match self {
            Self::Solo => Ok(()),
            Self::Shared(turnstiles) => turnstiles.cycle(),
        }
    }
}

impl Turnstiles {
    fn cycle(&self) -> Result<()> {
        self.mutex.wait()?;
        unsafe {
            *self.blocked += 1;
            if *self.blocked as usize == self.parties {
                for _ in 0..self.parties {
                    self.turnstile.post()?;
                }
            }
        }
        self.mutex.post()?;
        self.turnstile.wait()?;

        self.mutex.wait()?;
        unsafe {
            *self.blocked -= 1;
            if *self.blocked == 0 {
                for _ in 0..self.parties {
                    self.turnstile2.post()?;
                }
            }
        }
        self.mutex.post()?;
        self.turnstile2.wait()?;
        Ok(())
    }
}

impl Drop for Turnstiles {
    fn drop(&mut self) {
        if self.owner {
            self.mutex.unlink();
            self.turnstile.unlink();
            self.turnstile2.unlink();
        }
    }
}

unsafe impl Send for Turnstiles {}

#[cfg(test)]
mod tests {
    use super::*;

    /// four threads, many rounds, no livelock, perfect lockstep.
    /// wait() separates write and read phases exactly like the
    /// decision cycle does.
    #[test]
    fn lockstep() {
        const PARTIES: usize = 4;
        const ROUNDS: usize = 50;
        let tag = 0xba111e5 ^ std::process::id() as u64;
        for suffix in ["mutex", "turnstile", "turnstile2"] {
            let name = std::ffi::CString::new(format!("/{:x}.{}", tag, suffix)).unwrap();
            unsafe { libc::sem_unlink(name.as_ptr()) };
        }
        let blocked = Box::into_raw(Box::new(0i32));
        let slots = Box::into_raw(Box::new([0usize; PARTIES]));
        let threads = (0..PARTIES)
            .map(|i| {
                let blocked = blocked as usize;
                let slots = slots as usize;
                std::thread::spawn(move || {
                    let barrier = Barrier::shared(tag, PARTIES, blocked as *mut i32, i == 0).unwrap();
                    for round in 0..ROUNDS {
                        unsafe { (*(slots as *mut [usize; PARTIES]))[i] = round };
                        barrier.wait().unwrap();
                        let seen = unsafe { *(slots as *const [usize; PARTIES]) };
                        assert!(seen.iter().all(|&s| s == round));
                        barrier.wait().unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        unsafe {
            assert!(*blocked == 0);
            drop(Box::from_raw(blocked));
            drop(Box::from_raw(slots));
        }
    }
}
