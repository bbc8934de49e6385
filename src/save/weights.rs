use crate::learner::shared::Shared;
use crate::tiles::collision::Collisions;
use crate::MEMORY_SIZE;
use anyhow::Context;
use anyhow::Result;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use byteorder::LE;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

/// checkpoint size in bytes, fixed by the build's capacities. files
/// written by an incompatible build have a different length and are
/// rejected before a single value is read.
pub const BYTES: u64 = (MEMORY_SIZE * 8 + Collisions::BYTES) as u64;

/// raw little-endian blob: every θ as f64, then the collision table
pub fn save(shared: &Shared, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut sink = BufWriter::new(file);
    for &weight in shared.weights.iter() {
        sink.write_f64::<LE>(weight)?;
    }
    shared.collisions.save(&mut sink)?;
    sink.flush()?;
    Ok(())
}

pub fn load(shared: &mut Shared, path: &Path) -> Result<()> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    anyhow::ensure!(
        size == BYTES,
        "incompatible weight file {}: {} bytes where this build expects {}",
        path.display(),
        size,
        BYTES
    );
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut source = BufReader::new(file);
    for weight in shared.weights.iter_mut() {
        *weight = source.read_f64::<LE>()?;
    }
    shared.collisions.load(&mut source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_roundtrips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let ref path = dir.path().join("learner.w");
        let mut shared = Shared::boxed();
        for (f, weight) in shared.weights.iter_mut().enumerate() {
            *weight = (f as f64).sin();
        }
        shared.collisions.claim(17, 0xFEED, 3);
        save(&shared, path).unwrap();
        let mut restored = Shared::boxed();
        load(&mut restored, path).unwrap();
        assert!(restored.weights[..] == shared.weights[..]);
        assert!(restored.collisions.usage() == shared.collisions.usage());
    }

    #[test]
    fn wrong_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ref path = dir.path().join("stale.w");
        std::fs::write(path, vec![0u8; 1234]).unwrap();
        let mut shared = Shared::boxed();
        assert!(load(&mut shared, path).is_err());
    }
}
