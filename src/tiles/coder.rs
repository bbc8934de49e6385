use super::collision::Collisions;
use crate::MEMORY_SIZE;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

/// length of the pseudo-random stripe table
const STRIPES: usize = 2048;

/// displacement between the two hash streams
const PRIMARY_STREAM: i64 = 449;
const CHECK_STREAM: i64 = 457;

/// CMAC tile coder. quantizes a scaled input against a family of
/// offset tilings and hashes each (interval, tiling, context) tuple
/// through the shared collision table into a feature index.
///
/// the stripe table is derived from a fixed seed: every agent process
/// must produce identical coordinates for identical inputs, because
/// the claimed slots live in the process-shared collision table.
pub struct Coder {
    stripes: [u32; STRIPES],
}

impl Coder {
    pub fn new() -> Self {
        let mut rng = SmallRng::seed_from_u64(0);
        let mut stripes = [0u32; STRIPES];
        for stripe in stripes.iter_mut() {
            *stripe = rng.random();
        }
        Self { stripes }
    }

    /// fill `tiles` with one feature index per tiling for a single
    /// scaled input and its integer context tuple. tiles.len() is the
    /// number of tilings in this group.
    pub fn tiles(&self, table: &mut Collisions, tiles: &mut [i32], input: f32, context: &[i64]) {
        assert!(context.len() <= 6);
        let tilings = tiles.len() as i64;
        let quantized = (input * tilings as f32).floor() as i64;
        let mut coordinates = [0i64; 8];
        coordinates[2..2 + context.len()].copy_from_slice(context);
        let mut base = 0i64;
        for j in 0..tilings {
            coordinates[0] = if quantized >= base {
                quantized - ((quantized - base) % tilings)
            } else {
                quantized + 1 + ((base - quantized - 1) % tilings) - tilings
            };
            coordinates[1] = j;
            base += 1;
            let ref coordinates = coordinates[..2 + context.len()];
            let slot = self.stripe(coordinates, MEMORY_SIZE as i64, PRIMARY_STREAM) as usize;
            let check = self.stripe(coordinates, i64::MAX, CHECK_STREAM);
            let stride = 1 + 2 * self.stripe(coordinates, i64::MAX / 4, PRIMARY_STREAM) as usize;
            tiles[j as usize] = table.claim(slot, check, stride) as i32;
        }
    }

    /// UNH coordinate hash: sum a stripe per dimension, offset so the
    /// same coordinate hashes differently in different dimensions
    fn stripe(&self, coordinates: &[i64], modulus: i64, increment: i64) -> i64 {
        let mut sum = 0i64;
        for (i, &c) in coordinates.iter().enumerate() {
            let index = (c + increment * i as i64).rem_euclid(STRIPES as i64);
            sum += self.stripes[index as usize] as i64;
        }
        sum.rem_euclid(modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TILINGS_PER_GROUP;

    #[test]
    fn identical_inputs_identical_tiles() {
        let coder = Coder::new();
        let mut a = Collisions::boxed();
        let mut b = Collisions::boxed();
        let mut one = [0i32; TILINGS_PER_GROUP];
        let mut two = [0i32; TILINGS_PER_GROUP];
        coder.tiles(&mut a, &mut one, 3.75, &[2, 0, 12345]);
        coder.tiles(&mut b, &mut two, 3.75, &[2, 0, 12345]);
        assert!(one == two);
    }

    #[test]
    fn tiles_are_in_range() {
        let coder = Coder::new();
        let mut table = Collisions::boxed();
        let mut tiles = [0i32; TILINGS_PER_GROUP];
        for v in 0..8 {
            for a in 0..4 {
                coder.tiles(&mut table, &mut tiles, -17.3 + v as f32, &[a, v, 99]);
                for &t in tiles.iter() {
                    assert!(t >= 0);
                    assert!((t as usize) < MEMORY_SIZE);
                }
            }
        }
    }

    #[test]
    fn contexts_separate_features() {
        let coder = Coder::new();
        let mut table = Collisions::boxed();
        let mut one = [0i32; TILINGS_PER_GROUP];
        let mut two = [0i32; TILINGS_PER_GROUP];
        coder.tiles(&mut table, &mut one, 0.5, &[0, 0, 7]);
        coder.tiles(&mut table, &mut two, 0.5, &[1, 0, 7]);
        assert!(one != two);
    }

    #[test]
    fn nearby_inputs_share_tiles() {
        let coder = Coder::new();
        let mut table = Collisions::boxed();
        let mut one = [0i32; TILINGS_PER_GROUP];
        let mut two = [0i32; TILINGS_PER_GROUP];
        coder.tiles(&mut table, &mut one, 1.00, &[0, 0, 7]);
        coder.tiles(&mut table, &mut two, 1.01, &[0, 0, 7]);
        let shared = one.iter().filter(|t| two.contains(t)).count();
        assert!(shared > TILINGS_PER_GROUP / 2);
    }
}
