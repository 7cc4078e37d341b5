use {rapidhash::v3::rapidhash_v3, std::hash::Hasher};

/// Hasher for values that nodes compare with each other, such as the
/// cluster topology.
///
/// Buffers everything written and runs rapidhash V3 with the default seed and
/// secrets once at the end, so the output is portable across platforms and
/// major releases.
#[derive(Default)]
pub struct DefaultHasher(Vec<u8>);

impl Hasher for DefaultHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        rapidhash_v3(&self.0)
    }
}
