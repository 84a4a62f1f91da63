pub mod constants;

use alloy::{consensus::Blob, eips::eip4844::BYTES_PER_BLOB};
use anyhow::Error;
use constants::{BYTES_PER_FIELD_ELEMENT, MAX_BLOB_DATA_SIZE};

/// Packs raw bytes into a blob, 31 bytes per 32-byte field element with the
/// high-order byte left zero. Inputs longer than [`MAX_BLOB_DATA_SIZE`] are
/// rejected before anything is written.
pub fn encode_blob_data(data: &[u8]) -> Result<Blob, Error> {
    if data.len() > MAX_BLOB_DATA_SIZE {
        return Err(anyhow::anyhow!(
            "blob data longer than allowed (length: {}, limit: {})",
            data.len(),
            MAX_BLOB_DATA_SIZE
        ));
    }

    let mut blob = [0u8; BYTES_PER_BLOB];
    for (field_index, chunk) in data.chunks(BYTES_PER_FIELD_ELEMENT - 1).enumerate() {
        let offset = field_index * BYTES_PER_FIELD_ELEMENT + 1;
        blob[offset..offset + chunk.len()].copy_from_slice(chunk);
    }
    Ok(Blob::new(blob))
}

/// Inverse of [`encode_blob_data`]: strips the zero byte leading every field
/// element and concatenates the remaining 31-byte payloads. The caller is
/// expected to know the original length; trailing padding comes back as
/// zeroes.
pub fn decode_blob_data(blob: &Blob) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_BLOB_DATA_SIZE);
    for element in blob.as_slice().chunks(BYTES_PER_FIELD_ELEMENT) {
        data.extend_from_slice(&element[1..]);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_data_through_a_blob() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let blob = encode_blob_data(&data).unwrap();

        // every 32nd byte stays zero
        for element in blob.as_slice().chunks(BYTES_PER_FIELD_ELEMENT) {
            assert_eq!(element[0], 0);
        }

        let decoded = decode_blob_data(&blob);
        assert_eq!(&decoded[..data.len()], &data[..]);
        assert!(decoded[data.len()..].iter().all(|b| *b == 0));
    }

    #[test]
    fn encodes_up_to_the_limit() {
        let data = vec![0xffu8; MAX_BLOB_DATA_SIZE];
        let blob = encode_blob_data(&data).unwrap();
        let decoded = decode_blob_data(&blob);
        assert_eq!(decoded, data);
    }

    #[test]
    fn rejects_oversized_input() {
        let data = vec![0u8; MAX_BLOB_DATA_SIZE + 1];
        assert!(encode_blob_data(&data).is_err());
    }
}
