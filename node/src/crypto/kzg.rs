// KZG helper functions for EIP-4844 sidecars.
use alloy::{
    consensus::{Blob, BlobTransactionSidecar},
    primitives::FixedBytes,
};
use anyhow::Error;
use c_kzg::{ethereum_kzg_settings, KzgCommitment, KzgProof, KzgSettings};

pub fn blob_to_kzg_commitment<B: AsRef<[u8]>>(
    blob: B,
    kzg_settings: &KzgSettings,
) -> Result<KzgCommitment, Error> {
    let blob = c_kzg::Blob::from_bytes(blob.as_ref())?;

    Ok(kzg_settings.blob_to_kzg_commitment(&blob)?)
}

pub fn compute_blob_kzg_proof<B: AsRef<[u8]>>(
    blob: B,
    commitment: &KzgCommitment,
    kzg_settings: &KzgSettings,
) -> Result<KzgProof, Error> {
    let blob = c_kzg::Blob::from_bytes(blob.as_ref())?;
    let commitment = c_kzg::Bytes48::from_bytes(commitment.as_ref()).expect("correct size");

    Ok(kzg_settings.compute_blob_kzg_proof(&blob, &commitment)?)
}

/// Builds the sidecar for a set of blobs: one commitment and one proof per
/// blob, computed against the Ethereum mainnet trusted setup.
pub fn make_blob_sidecar(blobs: Vec<Blob>) -> Result<BlobTransactionSidecar, Error> {
    let kzg_settings = ethereum_kzg_settings(0);

    let mut commitments = Vec::with_capacity(blobs.len());
    let mut proofs = Vec::with_capacity(blobs.len());
    for blob in &blobs {
        let commitment = blob_to_kzg_commitment(blob, kzg_settings)?;
        let proof = compute_blob_kzg_proof(blob, &commitment, kzg_settings)?;

        commitments.push(FixedBytes::from_slice(commitment.as_ref()));
        proofs.push(FixedBytes::from_slice(proof.as_ref()));
    }

    Ok(BlobTransactionSidecar::new(blobs, commitments, proofs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::blob::encode_blob_data;

    #[test]
    fn sidecar_carries_one_commitment_and_proof_per_blob() {
        let blob = encode_blob_data(b"sidecar test payload").unwrap();
        let sidecar = make_blob_sidecar(vec![blob]).unwrap();
        assert_eq!(sidecar.blobs.len(), 1);
        assert_eq!(sidecar.commitments.len(), 1);
        assert_eq!(sidecar.proofs.len(), 1);
        assert_eq!(sidecar.versioned_hashes().count(), 1);
    }
}
