use crate::MEMORY_SIZE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use byteorder::LE;
use std::io::Read;
use std::io::Write;

/// slot value of an unclaimed entry
const VACANT: i64 = -1;

/// secondary-hash table in the UNH CMAC style. each occupied slot
/// remembers a wide check value for the coordinates that claimed it,
/// so distinct coordinates landing on the same primary slot are
/// diverted by double hashing instead of silently sharing a feature.
/// lives inside the process-shared record, hence the fixed layout.
#[repr(C)]
pub struct Collisions {
    data: [i64; MEMORY_SIZE],
    calls: u64,
    hits: u64,
    collisions: u64,
}

impl Collisions {
    /// number of bytes save() writes. weight files are rejected by
    /// total size, which includes this.
    pub const BYTES: usize = 8 + MEMORY_SIZE * 8 + 3 * 8;

    /// capacity of the table, also the feature space modulus
    pub const fn capacity(&self) -> usize {
        MEMORY_SIZE
    }

    /// forget every claim. counters restart too.
    pub fn reset(&mut self) {
        self.data.fill(VACANT);
        self.calls = 0;
        self.hits = 0;
        self.collisions = 0;
    }

    /// how many slots have been claimed so far
    pub fn usage(&self) -> usize {
        self.data.iter().filter(|&&d| d != VACANT).count()
    }

    /// claim (or find) the slot for coordinates whose primary slot is
    /// `slot` and whose wide check value is `check`. double hashing
    /// with stride `stride` resolves disagreements. exhausting the
    /// table is a fatal configuration error.
    pub fn claim(&mut self, slot: usize, check: i64, stride: usize) -> usize {
        self.calls += 1;
        if self.data[slot] == check {
            self.hits += 1;
            return slot;
        }
        if self.data[slot] == VACANT {
            self.hits += 1;
            self.data[slot] = check;
            return slot;
        }
        let mut j = slot;
        for probe in 0.. {
            assert!(
                probe < MEMORY_SIZE,
                "collision table out of memory ({} slots)",
                MEMORY_SIZE
            );
            self.collisions += 1;
            j = (j + stride) % MEMORY_SIZE;
            if self.data[j] == check {
                return j;
            }
            if self.data[j] == VACANT {
                self.data[j] = check;
                return j;
            }
        }
        unreachable!()
    }

    /// append to a weight checkpoint
    pub fn save<W: Write>(&self, sink: &mut W) -> std::io::Result<()> {
        sink.write_u64::<LE>(MEMORY_SIZE as u64)?;
        for &d in self.data.iter() {
            sink.write_i64::<LE>(d)?;
        }
        sink.write_u64::<LE>(self.calls)?;
        sink.write_u64::<LE>(self.hits)?;
        sink.write_u64::<LE>(self.collisions)?;
        Ok(())
    }

    /// restore from a weight checkpoint
    pub fn load<R: Read>(&mut self, source: &mut R) -> anyhow::Result<()> {
        let m = source.read_u64::<LE>()? as usize;
        anyhow::ensure!(
            m == MEMORY_SIZE,
            "collision table capacity mismatch: file has {}, build has {}",
            m,
            MEMORY_SIZE
        );
        for d in self.data.iter_mut() {
            *d = source.read_i64::<LE>()?;
        }
        self.calls = source.read_u64::<LE>()?;
        self.hits = source.read_u64::<LE>()?;
        self.collisions = source.read_u64::<LE>()?;
        Ok(())
    }

    /// zeroed heap allocation, then reset. the array is too large for
    /// the stack, so construction goes through raw uninitialized memory.
    pub fn boxed() -> Box<Self> {
        let mut table = unsafe { Box::<Self>::new_zeroed().assume_init() };
        table.reset();
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_is_vacant() {
        let table = Collisions::boxed();
        assert!(table.usage() == 0);
        assert!(table.capacity() == MEMORY_SIZE);
    }

    #[test]
    fn claims_are_stable() {
        let mut table = Collisions::boxed();
        let a = table.claim(42, 0xBEEF, 7);
        let b = table.claim(42, 0xBEEF, 7);
        assert!(a == b);
        assert!(table.usage() == 1);
    }

    #[test]
    fn collisions_divert() {
        let mut table = Collisions::boxed();
        let a = table.claim(42, 0xBEEF, 7);
        let b = table.claim(42, 0xCAFE, 7);
        assert!(a != b);
        assert!(table.usage() == 2);
    }

    #[test]
    fn checkpoint_roundtrip() {
        let mut table = Collisions::boxed();
        for i in 0..100 {
            table.claim(i * 37 % MEMORY_SIZE, i as i64 + 1000, 13);
        }
        let mut blob = Vec::new();
        table.save(&mut blob).unwrap();
        assert!(blob.len() == Collisions::BYTES);
        let mut restored = Collisions::boxed();
        restored.load(&mut blob.as_slice()).unwrap();
        assert!(restored.data[..] == table.data[..]);
        assert!(restored.calls == table.calls);
        assert!(restored.usage() == table.usage());
    }

    #[test]
    fn truncated_checkpoint_is_rejected() {
        let table = Collisions::boxed();
        let mut blob = Vec::new();
        table.save(&mut blob).unwrap();
        blob.truncate(blob.len() / 2);
        let mut restored = Collisions::boxed();
        assert!(restored.load(&mut blob.as_slice()).is_err());
    }
}
