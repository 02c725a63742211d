use crc::{Crc, CRC_64_ECMA_182};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// CRC-64 of `data`, as stored in WAL record frames.
pub(crate) fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum(b"hello world"), checksum(b"hello world"));
        assert_eq!(checksum(b""), CRC64.checksum(&[]));
    }

    #[test]
    fn test_different_data_different_checksums() {
        assert_ne!(
            checksum(b"hello"),
            checksum(b"world"),
            "Different data should have different checksums"
        );
        assert_ne!(checksum(&1u32.to_be_bytes()), checksum(&256u32.to_be_bytes()));
    }
}
