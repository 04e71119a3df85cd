//! Single-writer snapshot publishing.
//!
//! External observers (UI, watchdog) read the router's statistics out of
//! shared regions. The contract is deliberately loose: one writer, any
//! number of readers, whole-struct copies, torn reads detectable but
//! tolerated. A region is a generation word followed by the payload; the
//! writer bumps the generation to an odd value, copies, then bumps it even
//! again, so a reader that sees an odd or changing generation retries.
//!
//! The backing storage is anything that dereferences to bytes: a boxed
//! buffer in-process, or a memory-mapped file when the readers are other
//! processes.

use byteorder::{ByteOrder, LittleEndian};
use core::marker::PhantomData;
use core::mem;
use zerocopy::{AsBytes, FromBytes};

/// Bytes of bookkeeping preceding the payload in a region.
const GENERATION_LEN: usize = 4;

/// A single-writer snapshot region for values of type `T`.
pub struct SnapshotRegion<T, B = Box<[u8]>> {
    backing: B,
    generation: u32,
    _marker: PhantomData<T>,
}

impl<T: AsBytes + FromBytes> SnapshotRegion<T, Box<[u8]>> {
    /// Creates a region backed by process-local memory.
    pub fn new() -> Self {
        let backing = vec![0u8; GENERATION_LEN + mem::size_of::<T>()].into_boxed_slice();
        SnapshotRegion {
            backing,
            generation: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: AsBytes + FromBytes> Default for SnapshotRegion<T, Box<[u8]>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, B> SnapshotRegion<T, B>
where
    T: AsBytes + FromBytes,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Wraps caller-provided backing memory (eg. a mapped file).
    ///
    /// Returns `None` when the backing is too small for a generation word
    /// plus one `T`.
    pub fn over(backing: B) -> Option<Self> {
        if backing.as_ref().len() < GENERATION_LEN + mem::size_of::<T>() {
            return None;
        }
        Some(SnapshotRegion {
            backing,
            generation: 0,
            _marker: PhantomData,
        })
    }

    /// Publishes a new snapshot by whole-struct copy.
    pub fn publish(&mut self, value: &T) {
        let buf = self.backing.as_mut();
        self.generation = self.generation.wrapping_add(1); // odd: write in progress
        LittleEndian::write_u32(buf, self.generation);
        buf[GENERATION_LEN..GENERATION_LEN + mem::size_of::<T>()].copy_from_slice(value.as_bytes());
        self.generation = self.generation.wrapping_add(1); // even: stable
        LittleEndian::write_u32(buf, self.generation);
    }

    /// Reads the current snapshot the way an external observer would.
    ///
    /// Returns `None` when the region is mid-write (odd generation); within
    /// the router process that cannot happen, but readers in other
    /// processes use the same check.
    pub fn read(&self) -> Option<T> {
        let buf = self.backing.as_ref();
        let g1 = LittleEndian::read_u32(buf);
        if g1 % 2 != 0 {
            return None;
        }
        let value = T::read_from(&buf[GENERATION_LEN..GENERATION_LEN + mem::size_of::<T>()])?;
        let g2 = LittleEndian::read_u32(buf);
        if g1 != g2 {
            return None;
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, PartialEq, Eq, Debug, AsBytes, FromBytes)]
    #[repr(C)]
    struct Sample {
        a: u32,
        b: u32,
    }

    #[test]
    fn publish_and_read_back() {
        let mut region = SnapshotRegion::<Sample>::new();
        region.publish(&Sample { a: 1, b: 2 });
        assert_eq!(region.read(), Some(Sample { a: 1, b: 2 }));
        region.publish(&Sample { a: 3, b: 4 });
        assert_eq!(region.read(), Some(Sample { a: 3, b: 4 }));
    }

    #[test]
    fn torn_write_is_detected() {
        let mut region = SnapshotRegion::<Sample>::new();
        region.publish(&Sample { a: 1, b: 2 });
        // Fake a writer caught mid-copy by forcing an odd generation.
        LittleEndian::write_u32(region.backing.as_mut(), 7);
        assert_eq!(region.read(), None);
    }

    #[test]
    fn external_backing() {
        let backing = vec![0u8; GENERATION_LEN + mem::size_of::<Sample>()];
        let mut region = SnapshotRegion::<Sample, Vec<u8>>::over(backing).unwrap();
        region.publish(&Sample { a: 9, b: 9 });
        assert_eq!(region.read(), Some(Sample { a: 9, b: 9 }));

        assert!(SnapshotRegion::<Sample, Vec<u8>>::over(vec![0u8; 3]).is_none());
    }
}
