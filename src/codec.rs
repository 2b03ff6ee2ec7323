//! Systematic Reed-Solomon codec over GF(256).
//!
//! A codec instance owns an `n x k` generator matrix whose top `k x k`
//! block is the identity: the first `k` outputs of the code are the `k`
//! data shards verbatim, and only the bottom `m = n - k` rows do work
//! during encoding. The matrix is built from a Cauchy matrix `C` by
//! inverting its top block `T` and taking `G = C * T^-1`, which keeps
//! every `k x k` submatrix invertible (any `k` of the `n` shards
//! reconstruct the rest).
//!
//! The codec never allocates shard storage and never retries; the caller
//! owns every buffer and sees every failure. Instances are immutable after
//! construction, so [`ReedSolomon::encode`], [`ReedSolomon::decode`] and
//! [`ReedSolomon::code`] may run concurrently on one codec as long as the
//! shard buffers are disjoint.

use crate::gf;
use crate::matrix::Matrix;
use crate::{Error, Result};

/// Shard identities live in one byte alongside GF(256) coefficients.
pub const MAX_TOTAL_SHARDS: usize = 255;

/// A systematic Reed-Solomon erasure code with `k` data shards and `m`
/// parity shards.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    data_shards: usize,
    parity_shards: usize,
    /// `(k + m) x k` generator; rows `[0, k)` are the identity.
    matrix: Matrix,
}

impl ReedSolomon {
    /// Build a codec for `data_shards` + `parity_shards` total shards.
    ///
    /// Fails with [`Error::InvalidShardCount`] when either count is zero,
    /// the total exceeds [`MAX_TOTAL_SHARDS`], or the Cauchy construction's
    /// operand range is exceeded (it needs `total + data_shards <= 256`).
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0
            || parity_shards == 0
            || data_shards + parity_shards > MAX_TOTAL_SHARDS
            || 2 * data_shards + parity_shards > 256
        {
            return Err(Error::InvalidShardCount {
                data: data_shards,
                parity: parity_shards,
            });
        }

        let total = data_shards + parity_shards;
        let cauchy = Matrix::cauchy(total, data_shards);
        let mut top = cauchy.sub_matrix(0, 0, data_shards, data_shards);
        top.invert()?;
        let matrix = cauchy.multiply(&top);
        debug_assert!(matrix
            .sub_matrix(0, 0, data_shards, data_shards)
            .is_identity());

        Ok(Self {
            data_shards,
            parity_shards,
            matrix,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Row `i` of the generator matrix: shard `i`'s coding coefficients
    /// over the data shards. Rows `[0, data_shards)` are identity rows.
    pub fn generator_row(&self, i: usize) -> &[u8] {
        self.matrix.row(i)
    }

    /// Compute all parity shards from the data shards.
    ///
    /// Parity buffers are pure outputs: they are overwritten by the first
    /// non-zero coefficient (copy or multiply) and accumulated into
    /// afterwards, so callers never pre-zero them. All shards must share
    /// one length; mismatches are contract violations and panic.
    pub fn encode(&self, data: &[&[u8]], parity: &mut [&mut [u8]]) {
        assert_eq!(data.len(), self.data_shards, "wrong data shard count");
        assert_eq!(parity.len(), self.parity_shards, "wrong parity shard count");
        let shard_size = data[0].len();
        assert!(
            data.iter().all(|d| d.len() == shard_size)
                && parity.iter().all(|p| p.len() == shard_size),
            "shard sizes differ"
        );

        for (i, out) in parity.iter_mut().enumerate() {
            let row = self.matrix.row(self.data_shards + i);
            let mut first = true;
            for (j, &coeff) in row.iter().enumerate() {
                if coeff == 0 {
                    continue;
                }
                if first {
                    first = false;
                    if coeff == 1 {
                        out.copy_from_slice(data[j]);
                    } else {
                        gf::mul_mem(out, data[j], coeff);
                    }
                } else if coeff == 1 {
                    gf::add_mem(out, data[j]);
                } else {
                    gf::mul_add_mem(out, data[j], coeff);
                }
            }
        }
    }

    /// Reconstruct every erased shard in place.
    ///
    /// `erasures[i]` marks shard `i` missing; its slot in `shards` is
    /// output storage. Present shards are read-only inputs and come back
    /// byte-for-byte unchanged. Fails with [`Error::InsufficientShards`]
    /// when fewer than `data_shards` survive, and propagates
    /// [`Error::NotInvertible`] from the survivor submatrix.
    pub fn decode(&self, shards: &mut [&mut [u8]], erasures: &[bool]) -> Result<()> {
        let total = self.total_shards();
        assert_eq!(shards.len(), total, "wrong shard count");
        assert_eq!(erasures.len(), total, "wrong erasure mask length");
        let shard_size = shards[0].len();
        assert!(
            shards.iter().all(|s| s.len() == shard_size),
            "shard sizes differ"
        );

        let present: Vec<usize> = (0..total).filter(|&i| !erasures[i]).collect();
        if present.len() < self.data_shards {
            return Err(Error::InsufficientShards {
                present: present.len(),
                required: self.data_shards,
            });
        }
        let missing: Vec<usize> = (0..total).filter(|&i| erasures[i]).collect();
        if missing.is_empty() {
            return Ok(());
        }

        // Invert the generator rows of the first k survivors, then map each
        // missing shard's generator row through the inverse to get its
        // reconstruction coefficients over those survivors.
        let inputs = &present[..self.data_shards];
        let mut survivor = Matrix::zero(self.data_shards, self.data_shards);
        for (r, &p) in inputs.iter().enumerate() {
            survivor.copy_row_from(r, &self.matrix, p);
        }
        survivor.invert()?;

        let mut targets = Matrix::zero(missing.len(), self.data_shards);
        for (r, &i) in missing.iter().enumerate() {
            targets.copy_row_from(r, &self.matrix, i);
        }
        let recon = targets.multiply(&survivor);

        combine(&recon, shards, &missing, inputs);
        Ok(())
    }

    /// General coding step: compute the shards named by
    /// `shard_ids[input_count..]` from the shards named by
    /// `shard_ids[..input_count]`.
    ///
    /// Exactly `data_shards` inputs are required. `shards` is parallel to
    /// `shard_ids`: input slots are read-only, output slots are
    /// overwritten, and the two slot ranges must not share buffers. Output
    /// ids may repeat an input id, which degenerates to a copy. Covers
    /// re-striping, generating additional parity, and partial decode.
    /// Fails with [`Error::NotInvertible`] when the input rows do not form
    /// a basis (e.g. duplicated input ids).
    pub fn code(
        &self,
        shard_ids: &[u8],
        input_count: usize,
        shards: &mut [&mut [u8]],
    ) -> Result<()> {
        assert_eq!(shard_ids.len(), shards.len(), "ids and shards differ");
        assert_eq!(
            input_count, self.data_shards,
            "generic coding takes exactly data_shards inputs"
        );
        assert!(
            shard_ids.iter().all(|&id| (id as usize) < self.total_shards()),
            "shard id out of range"
        );
        let shard_size = shards[0].len();
        assert!(
            shards.iter().all(|s| s.len() == shard_size),
            "shard sizes differ"
        );

        let mut basis = Matrix::zero(self.data_shards, self.data_shards);
        for r in 0..input_count {
            basis.copy_row_from(r, &self.matrix, shard_ids[r] as usize);
        }
        basis.invert()?;

        let output_count = shard_ids.len() - input_count;
        let mut targets = Matrix::zero(output_count, self.data_shards);
        for r in 0..output_count {
            targets.copy_row_from(r, &self.matrix, shard_ids[input_count + r] as usize);
        }
        let recon = targets.multiply(&basis);

        let inputs: Vec<usize> = (0..input_count).collect();
        let outputs: Vec<usize> = (input_count..shard_ids.len()).collect();
        combine(&recon, shards, &outputs, &inputs);
        Ok(())
    }
}

/// Apply a reconstruction matrix: for each output slot, accumulate
/// `recon[row] . inputs` with the same first-non-zero initialization
/// discipline as encoding.
///
/// `outputs` and `inputs` index into `shards` and must be disjoint; the
/// raw views below alias distinct elements only.
fn combine(recon: &Matrix, shards: &mut [&mut [u8]], outputs: &[usize], inputs: &[usize]) {
    debug_assert!(outputs.iter().all(|o| !inputs.contains(o)));

    let views: Vec<(*mut u8, usize)> = shards
        .iter_mut()
        .map(|s| (s.as_mut_ptr(), s.len()))
        .collect();

    for (oi, &out) in outputs.iter().enumerate() {
        let (dst_ptr, dst_len) = views[out];
        // SAFETY: `out` is not in `inputs`, so this slice never overlaps a
        // source view taken below.
        let dst = unsafe { std::slice::from_raw_parts_mut(dst_ptr, dst_len) };

        let mut first = true;
        for (ji, &inp) in inputs.iter().enumerate() {
            let coeff = recon.get(oi, ji);
            if coeff == 0 {
                continue;
            }
            let (src_ptr, src_len) = views[inp];
            // SAFETY: distinct element from `dst`, read-only here.
            let src = unsafe { std::slice::from_raw_parts(src_ptr, src_len) };

            if first {
                first = false;
                if coeff == 1 {
                    dst.copy_from_slice(src);
                } else {
                    gf::mul_mem(dst, src, coeff);
                }
            } else if coeff == 1 {
                gf::add_mem(dst, src);
            } else {
                gf::mul_add_mem(dst, src, coeff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn as_refs(shards: &[Vec<u8>]) -> Vec<&[u8]> {
        shards.iter().map(|s| s.as_slice()).collect()
    }

    fn as_mut_refs(shards: &mut [Vec<u8>]) -> Vec<&mut [u8]> {
        shards.iter_mut().map(|s| s.as_mut_slice()).collect()
    }

    fn encode_all(rs: &ReedSolomon, shards: &mut [Vec<u8>]) {
        let (data, parity) = shards.split_at_mut(rs.data_shards());
        let data_refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
        let mut parity_refs: Vec<&mut [u8]> =
            parity.iter_mut().map(|p| p.as_mut_slice()).collect();
        rs.encode(&data_refs, &mut parity_refs);
    }

    #[test]
    fn rejects_bad_shard_counts() {
        assert!(matches!(
            ReedSolomon::new(0, 2),
            Err(Error::InvalidShardCount { .. })
        ));
        assert!(matches!(
            ReedSolomon::new(4, 0),
            Err(Error::InvalidShardCount { .. })
        ));
        assert!(matches!(
            ReedSolomon::new(200, 56),
            Err(Error::InvalidShardCount { .. })
        ));
        // Total fits, but the Cauchy operand range does not.
        assert!(matches!(
            ReedSolomon::new(200, 55),
            Err(Error::InvalidShardCount { .. })
        ));
        assert!(ReedSolomon::new(126, 4).is_ok());
    }

    #[test]
    fn generator_top_block_is_identity() {
        for (k, m) in [(1, 1), (4, 2), (8, 4), (10, 4)] {
            let rs = ReedSolomon::new(k, m).unwrap();
            for i in 0..k {
                for j in 0..k {
                    assert_eq!(rs.generator_row(i)[j], u8::from(i == j));
                }
            }
        }
    }

    #[test]
    fn recovers_two_erased_data_shards() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let shard_size = 4;

        let mut shards: Vec<Vec<u8>> = (0..6)
            .map(|i| {
                if i < 4 {
                    (0..shard_size).map(|j| (i * shard_size + j) as u8).collect()
                } else {
                    vec![0u8; shard_size]
                }
            })
            .collect();
        encode_all(&rs, &mut shards);

        let originals = shards.clone();
        shards[0].fill(0);
        shards[2].fill(0);
        let erasures = [true, false, true, false, false, false];

        let mut refs = as_mut_refs(&mut shards);
        rs.decode(&mut refs, &erasures).unwrap();

        assert_eq!(shards[0], [0x00, 0x01, 0x02, 0x03]);
        assert_eq!(shards[2], [0x08, 0x09, 0x0a, 0x0b]);
        assert_eq!(shards, originals);
    }

    #[test]
    fn decode_with_nothing_lost_is_a_no_op() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut shards: Vec<Vec<u8>> =
            (0..6).map(|_| (0..128).map(|_| rng.gen()).collect()).collect();
        encode_all(&rs, &mut shards);

        let before = shards.clone();
        let erasures = [false; 6];
        let mut refs = as_mut_refs(&mut shards);
        rs.decode(&mut refs, &erasures).unwrap();
        assert_eq!(shards, before);
    }

    #[test]
    fn too_many_erasures_fail() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut shards: Vec<Vec<u8>> = (0..6).map(|_| vec![0u8; 8]).collect();
        let erasures = [true, true, true, false, false, false];
        let mut refs = as_mut_refs(&mut shards);
        assert!(matches!(
            rs.decode(&mut refs, &erasures),
            Err(Error::InsufficientShards {
                present: 3,
                required: 4
            })
        ));
    }

    #[test]
    fn parity_buffers_need_no_zeroing() {
        let rs = ReedSolomon::new(5, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let data: Vec<Vec<u8>> =
            (0..5).map(|_| (0..64).map(|_| rng.gen()).collect()).collect();

        let mut clean = vec![vec![0u8; 64]; 3];
        let mut dirty = vec![vec![0xaau8; 64]; 3];
        {
            let data_refs = as_refs(&data);
            let mut refs = as_mut_refs(&mut clean);
            rs.encode(&data_refs, &mut refs);
        }
        {
            let data_refs = as_refs(&data);
            let mut refs = as_mut_refs(&mut dirty);
            rs.encode(&data_refs, &mut refs);
        }
        assert_eq!(clean, dirty);
    }

    #[test]
    fn all_erasure_patterns_round_trip() {
        // RS(8, 4) with full 4096-byte shards: every choice of 4 erasures
        // out of 12 must restore the originals byte-exact.
        let rs = ReedSolomon::new(8, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(0xdeadbeef);
        let mut shards: Vec<Vec<u8>> = (0..12)
            .map(|_| (0..4096).map(|_| rng.gen()).collect())
            .collect();
        encode_all(&rs, &mut shards);
        let originals = shards.clone();

        for a in 0..12 {
            for b in a + 1..12 {
                for c in b + 1..12 {
                    for d in c + 1..12 {
                        let mut damaged = originals.clone();
                        let mut erasures = [false; 12];
                        for i in [a, b, c, d] {
                            erasures[i] = true;
                            damaged[i].fill(0);
                        }
                        let mut refs = as_mut_refs(&mut damaged);
                        rs.decode(&mut refs, &erasures).unwrap();
                        assert_eq!(damaged, originals, "erasures {a},{b},{c},{d}");
                    }
                }
            }
        }
    }

    #[test]
    fn recovers_mixed_data_and_parity_erasures() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut shards: Vec<Vec<u8>> =
            (0..6).map(|_| (0..256).map(|_| rng.gen()).collect()).collect();
        encode_all(&rs, &mut shards);
        let originals = shards.clone();

        shards[1].fill(0);
        shards[5].fill(0);
        let erasures = [false, true, false, false, false, true];
        let mut refs = as_mut_refs(&mut shards);
        rs.decode(&mut refs, &erasures).unwrap();
        assert_eq!(shards, originals);
    }

    #[test]
    fn generic_coding_reproduces_parity() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let mut shards: Vec<Vec<u8>> =
            (0..6).map(|_| (0..96).map(|_| rng.gen()).collect()).collect();
        encode_all(&rs, &mut shards);
        let expected = shards.clone();

        // Regenerate both parity shards from the data shards.
        shards[4].fill(0);
        shards[5].fill(0);
        let ids = [0u8, 1, 2, 3, 4, 5];
        let mut refs = as_mut_refs(&mut shards);
        rs.code(&ids, 4, &mut refs).unwrap();
        assert_eq!(shards, expected);
    }

    #[test]
    fn generic_coding_partial_decode() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(22);
        let mut shards: Vec<Vec<u8>> =
            (0..6).map(|_| (0..96).map(|_| rng.gen()).collect()).collect();
        encode_all(&rs, &mut shards);
        let expected_shard0 = shards[0].clone();

        // Rebuild data shard 0 from shards 1..=4; layout the scratch table
        // in id order: inputs first, then the single output.
        let mut table: Vec<Vec<u8>> = vec![
            shards[1].clone(),
            shards[2].clone(),
            shards[3].clone(),
            shards[4].clone(),
            vec![0u8; 96],
        ];
        let ids = [1u8, 2, 3, 4, 0];
        let mut refs = as_mut_refs(&mut table);
        rs.code(&ids, 4, &mut refs).unwrap();
        assert_eq!(table[4], expected_shard0);
    }

    #[test]
    fn generic_coding_identity_passthrough() {
        // Asking for an output that is also among the surviving data rows
        // degenerates to a copy; the combine path must handle the unit
        // reconstruction row without special casing.
        let rs = ReedSolomon::new(3, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        let mut shards: Vec<Vec<u8>> =
            (0..5).map(|_| (0..48).map(|_| rng.gen()).collect()).collect();
        encode_all(&rs, &mut shards);

        let mut table: Vec<Vec<u8>> = vec![
            shards[0].clone(),
            shards[1].clone(),
            shards[2].clone(),
            vec![0u8; 48],
        ];
        let ids = [0u8, 1, 2, 1];
        let mut refs = as_mut_refs(&mut table);
        rs.code(&ids, 3, &mut refs).unwrap();
        assert_eq!(table[3], shards[1]);
    }

    #[test]
    fn duplicate_inputs_are_not_invertible() {
        let rs = ReedSolomon::new(4, 2).unwrap();
        let mut shards: Vec<Vec<u8>> = (0..6).map(|_| vec![0u8; 16]).collect();
        let ids = [0u8, 0, 1, 2, 4, 5];
        let mut refs = as_mut_refs(&mut shards);
        assert!(matches!(
            rs.code(&ids, 4, &mut refs),
            Err(Error::NotInvertible)
        ));
    }
}
