//! On-disk block and volume header formats.
//!
//! Two bit-exact, little-endian layouts that stay stable for the life of
//! format version 1:
//!
//! - the 4 KiB self-describing [`Block`]: CRC32C, sequence number, packed
//!   56-bit stripe number + 8-bit shard id, 4080 payload bytes;
//! - the 4 KiB [`VolumeHeader`] at byte 0 of every volume file: magic,
//!   version, volume prefix id, index/tail offsets, the sorted shard list,
//!   and a trailing CRC32C.
//!
//! The module also owns stripe geometry (`k_blocks_in_stripe`,
//! header-inclusive `offset_to_block`), CRC32C itself (hardware CRC32
//! instruction when available, table fallback otherwise, chainable through
//! the seed argument), and the 16-byte round-robin [`spread`]/[`unspread`]
//! interleave that lines a caller's contiguous payload up with the
//! SIMD-friendly per-shard layout: every 64-byte coding lane then touches
//! one shard only.

use crate::{Error, Result};

/// Size of one block, one volume header, and one I/O page.
pub const BLOCK_SIZE: usize = 4096;

/// Bytes of caller payload per block.
pub const BLOCK_PAYLOAD_SIZE: usize = BLOCK_SIZE - 16;

/// Stripe numbers are 56-bit; the low byte of the packed id is the shard.
pub const MAX_STRIPE_NUMBER: u64 = (1 << 56) - 1;

/// A volume stores at most this many shards of each stripe.
pub const MAX_VOLUME_SHARDS: usize = 8;

/// Volume prefix ids start above any plausible file offset, which keeps
/// them recognizable in scavenged index entries.
pub const MIN_VOLUME_PREFIX_ID: u32 = 1 << 24;

/// Format version this module reads and writes.
pub const VOLUME_VERSION: u32 = 1;

/// Magic at byte 0 of every volume file.
pub const VOLUME_MAGIC: [u8; 32] = *b"stripestore volume\0\0\0\0\0\0\0\0\0\0\0\0\0\0";

const SPREAD_CHUNK: usize = 16;
const HEADER_CRC_OFFSET: usize = BLOCK_SIZE - 4;

// ---------------------------------------------------------------------------
// CRC32C
// ---------------------------------------------------------------------------

/// CRC32C (Castagnoli) over `data`, seeded for chained computation.
///
/// `crc32c(b, crc32c(a, 0))` equals `crc32c(ab, 0)`, so split buffers can
/// be checksummed incrementally. Uses the hardware CRC32 instruction when
/// the CPU has it; the table fallback is bit-identical.
pub fn crc32c(data: &[u8], seed: u32) -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse4.2") {
            return unsafe { crc32c_hw(data, seed) };
        }
    }
    crc32c_sw(data, seed)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.2")]
unsafe fn crc32c_hw(data: &[u8], seed: u32) -> u32 {
    use std::arch::x86_64::{_mm_crc32_u64, _mm_crc32_u8};

    let mut crc = !seed;
    let mut rest = data;

    while !rest.is_empty() && rest.as_ptr() as usize & 7 != 0 {
        crc = _mm_crc32_u8(crc, rest[0]);
        rest = &rest[1..];
    }

    let mut words = rest.chunks_exact(8);
    let mut crc64 = crc as u64;
    for w in words.by_ref() {
        crc64 = _mm_crc32_u64(crc64, u64::from_le_bytes(w.try_into().unwrap()));
    }
    crc = crc64 as u32;

    for &b in words.remainder() {
        crc = _mm_crc32_u8(crc, b);
    }

    !crc
}

// Reflected Castagnoli polynomial.
const CRC32C_POLY: u32 = 0x82f6_3b78;

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32C_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

fn crc32c_sw(data: &[u8], seed: u32) -> u32 {
    let mut crc = !seed;
    for &b in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ b as u32) & 0xff) as usize];
    }
    !crc
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One 4 KiB on-disk block.
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 0      | 4    | CRC32C of bytes 4..4095 |
/// | 4      | 4    | sequence number |
/// | 8      | 8    | stripe number (high 56 bits) and shard id (low byte) |
/// | 16     | 4080 | payload |
///
/// Blocks are never partially mutated: an update is a full rewrite with a
/// fresh sequence number and checksum.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    sequence: u32,
    stripe_number: u64,
    shard_id: u8,
    payload: [u8; BLOCK_PAYLOAD_SIZE],
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("stripe_number", &self.stripe_number)
            .field("shard_id", &self.shard_id)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Block {
    /// Assemble a block. `payload` must be exactly
    /// [`BLOCK_PAYLOAD_SIZE`] bytes and `stripe_number` must fit in 56
    /// bits.
    pub fn new(stripe_number: u64, shard_id: u8, sequence: u32, payload: &[u8]) -> Self {
        assert!(stripe_number <= MAX_STRIPE_NUMBER, "stripe number overflow");
        assert_eq!(payload.len(), BLOCK_PAYLOAD_SIZE, "payload size");
        let mut p = [0u8; BLOCK_PAYLOAD_SIZE];
        p.copy_from_slice(payload);
        Self {
            sequence,
            stripe_number,
            shard_id,
            payload: p,
        }
    }

    pub fn stripe_number(&self) -> u64 {
        self.stripe_number
    }

    pub fn shard_id(&self) -> u8 {
        self.shard_id
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize into a 4096-byte buffer, stamping the checksum last.
    pub fn encode(&self, out: &mut [u8]) {
        assert_eq!(out.len(), BLOCK_SIZE);
        out[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        let packed = (self.stripe_number << 8) | self.shard_id as u64;
        out[8..16].copy_from_slice(&packed.to_le_bytes());
        out[16..].copy_from_slice(&self.payload);
        let crc = crc32c(&out[4..], 0);
        out[..4].copy_from_slice(&crc.to_le_bytes());
    }

    /// Parse and checksum-verify a 4096-byte buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        validate_block(buf)?;
        let sequence = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let packed = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let mut payload = [0u8; BLOCK_PAYLOAD_SIZE];
        payload.copy_from_slice(&buf[16..]);
        Ok(Self {
            sequence,
            stripe_number: packed >> 8,
            shard_id: packed as u8,
            payload,
        })
    }
}

/// Verify a raw block image: correct length and a checksum that covers
/// bytes 4..4095. Anything else is [`Error::InvalidBlock`]; there is no
/// partial acceptance.
pub fn validate_block(buf: &[u8]) -> Result<()> {
    if buf.len() != BLOCK_SIZE {
        return Err(Error::InvalidBlock);
    }
    let stored = u32::from_le_bytes(buf[..4].try_into().unwrap());
    if crc32c(&buf[4..], 0) != stored {
        return Err(Error::InvalidBlock);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Volume header
// ---------------------------------------------------------------------------

/// The 4 KiB header at byte 0 of every volume file.
///
/// | offset | size | field |
/// |--------|------|-------|
/// | 0      | 32   | magic |
/// | 32     | 4    | version (= 1) |
/// | 36     | 4    | volume prefix id (>= 2^24) |
/// | 40     | 8    | primary index offset |
/// | 48     | 8    | secondary index offset |
/// | 56     | 8    | tail offset |
/// | 64     | 8    | shard ids, ascending, last entry repeated as padding |
/// | 72     | 24   | reserved |
/// | 4092   | 4    | CRC32C of bytes 0..4091 |
///
/// Fewer than eight shards are encoded by repeating the last id; the
/// trailing run length determines the effective shard count
/// ([`VolumeHeader::k_blocks_in_stripe`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub magic: [u8; 32],
    pub version: u32,
    pub volume_prefix_id: u32,
    pub primary_index_offset: u64,
    pub secondary_index_offset: u64,
    pub tail_offset: u64,
    pub shard_ids: [u8; MAX_VOLUME_SHARDS],
    pub reserved: [u8; 24],
}

impl VolumeHeader {
    /// Build a header for a volume storing `shard_ids` (1..=8 strictly
    /// ascending ids; the list is padded by repeating the last entry).
    /// Index and tail offsets start at zero; the volume layout collaborator
    /// fills them in before sealing.
    pub fn new(volume_prefix_id: u32, shard_ids: &[u8]) -> Result<Self> {
        if volume_prefix_id < MIN_VOLUME_PREFIX_ID {
            return Err(Error::InvalidHeader);
        }
        if shard_ids.is_empty()
            || shard_ids.len() > MAX_VOLUME_SHARDS
            || shard_ids.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(Error::InvalidHeader);
        }
        let mut ids = [*shard_ids.last().unwrap(); MAX_VOLUME_SHARDS];
        ids[..shard_ids.len()].copy_from_slice(shard_ids);
        Ok(Self {
            magic: VOLUME_MAGIC,
            version: VOLUME_VERSION,
            volume_prefix_id,
            primary_index_offset: 0,
            secondary_index_offset: 0,
            tail_offset: 0,
            shard_ids: ids,
            reserved: [0; 24],
        })
    }

    /// Effective shard count on this volume: start at 8 and shed one for
    /// each trailing repetition of the last shard id.
    pub fn k_blocks_in_stripe(&self) -> usize {
        let mut count = MAX_VOLUME_SHARDS;
        while count > 1 && self.shard_ids[count - 2] == self.shard_ids[count - 1] {
            count -= 1;
        }
        count
    }

    /// Index of `shard_id` within this volume's stripe layout.
    pub fn position_of(&self, shard_id: u8) -> Option<usize> {
        self.shard_ids.iter().position(|&id| id == shard_id)
    }

    /// Byte offset of the block for (`stripe_number`, `shard_id`) within
    /// the volume file, including the 4096-byte header: stripe 0 of the
    /// first listed shard starts at byte 4096.
    ///
    /// Asking for a shard the volume does not store is a programming error
    /// in production and fails with [`Error::UnknownShard`].
    pub fn offset_to_block(&self, stripe_number: u64, shard_id: u8) -> Result<u64> {
        let position = self
            .position_of(shard_id)
            .ok_or(Error::UnknownShard { shard_id })?;
        let k = self.k_blocks_in_stripe() as u64;
        Ok(BLOCK_SIZE as u64 * (1 + k * stripe_number + position as u64))
    }

    /// Serialize into a 4096-byte buffer, stamping the trailing checksum.
    pub fn encode(&self, out: &mut [u8]) {
        assert_eq!(out.len(), BLOCK_SIZE);
        out.fill(0);
        out[..32].copy_from_slice(&self.magic);
        out[32..36].copy_from_slice(&self.version.to_le_bytes());
        out[36..40].copy_from_slice(&self.volume_prefix_id.to_le_bytes());
        out[40..48].copy_from_slice(&self.primary_index_offset.to_le_bytes());
        out[48..56].copy_from_slice(&self.secondary_index_offset.to_le_bytes());
        out[56..64].copy_from_slice(&self.tail_offset.to_le_bytes());
        out[64..72].copy_from_slice(&self.shard_ids);
        out[72..96].copy_from_slice(&self.reserved);
        let crc = crc32c(&out[..HEADER_CRC_OFFSET], 0);
        out[HEADER_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    }

    /// Parse and verify a 4096-byte header image.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        validate_header(buf)?;
        let mut magic = [0u8; 32];
        magic.copy_from_slice(&buf[..32]);
        let mut shard_ids = [0u8; MAX_VOLUME_SHARDS];
        shard_ids.copy_from_slice(&buf[64..72]);
        let mut reserved = [0u8; 24];
        reserved.copy_from_slice(&buf[72..96]);
        Ok(Self {
            magic,
            version: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            volume_prefix_id: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            primary_index_offset: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            secondary_index_offset: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            tail_offset: u64::from_le_bytes(buf[56..64].try_into().unwrap()),
            shard_ids,
            reserved,
        })
    }
}

/// Verify a raw header image: length, version, prefix-id floor,
/// non-decreasing shard ids, and the trailing CRC32C. Any violation is
/// [`Error::InvalidHeader`] — header corruption is fatal for the volume
/// until administrative repair.
pub fn validate_header(buf: &[u8]) -> Result<()> {
    if buf.len() != BLOCK_SIZE {
        return Err(Error::InvalidHeader);
    }
    let version = u32::from_le_bytes(buf[32..36].try_into().unwrap());
    if version != VOLUME_VERSION {
        return Err(Error::InvalidHeader);
    }
    let prefix = u32::from_le_bytes(buf[36..40].try_into().unwrap());
    if prefix < MIN_VOLUME_PREFIX_ID {
        return Err(Error::InvalidHeader);
    }
    let ids = &buf[64..72];
    if ids.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::InvalidHeader);
    }
    let stored = u32::from_le_bytes(buf[HEADER_CRC_OFFSET..].try_into().unwrap());
    if crc32c(&buf[..HEADER_CRC_OFFSET], 0) != stored {
        return Err(Error::InvalidHeader);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Spread / unspread
// ---------------------------------------------------------------------------

/// Interleave `input` across `k` shard buffers in 16-byte round-robin
/// chunks: chunk `r*k + s` of the input lands at chunk `r` of shard `s`.
///
/// `input.len()` must be a multiple of `16 * k` and every output must hold
/// exactly `input.len() / k` bytes; the caller pads, this layer never
/// truncates.
pub fn spread(input: &[u8], outputs: &mut [&mut [u8]]) {
    let k = outputs.len();
    assert!(k > 0, "spread needs at least one shard");
    assert_eq!(
        input.len() % (SPREAD_CHUNK * k),
        0,
        "input must be a multiple of 16*k"
    );
    let per_shard = input.len() / k;
    assert!(
        outputs.iter().all(|o| o.len() == per_shard),
        "shard buffers must hold input_len / k bytes"
    );

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    unsafe {
        use std::arch::x86_64::{_mm_loadu_si128, _mm_storeu_si128, __m128i};
        let mut src = input.as_ptr();
        let mut offset = 0;
        while offset < per_shard {
            for out in outputs.iter_mut() {
                let v = _mm_loadu_si128(src as *const __m128i);
                _mm_storeu_si128(out.as_mut_ptr().add(offset) as *mut __m128i, v);
                src = src.add(SPREAD_CHUNK);
            }
            offset += SPREAD_CHUNK;
        }
        return;
    }

    #[cfg(not(all(feature = "simd", target_arch = "x86_64")))]
    for (i, chunk) in input.chunks_exact(SPREAD_CHUNK).enumerate() {
        let shard = i % k;
        let at = (i / k) * SPREAD_CHUNK;
        outputs[shard][at..at + SPREAD_CHUNK].copy_from_slice(chunk);
    }
}

/// Exact inverse of [`spread`]: gather 16-byte chunks from `k` shard
/// buffers back into one contiguous output.
pub fn unspread(inputs: &[&[u8]], output: &mut [u8]) {
    let k = inputs.len();
    assert!(k > 0, "unspread needs at least one shard");
    assert_eq!(
        output.len() % (SPREAD_CHUNK * k),
        0,
        "output must be a multiple of 16*k"
    );
    let per_shard = output.len() / k;
    assert!(
        inputs.iter().all(|i| i.len() == per_shard),
        "shard buffers must hold output_len / k bytes"
    );

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    unsafe {
        use std::arch::x86_64::{_mm_loadu_si128, _mm_storeu_si128, __m128i};
        let mut dst = output.as_mut_ptr();
        let mut offset = 0;
        while offset < per_shard {
            for shard in inputs.iter() {
                let v = _mm_loadu_si128(shard.as_ptr().add(offset) as *const __m128i);
                _mm_storeu_si128(dst as *mut __m128i, v);
                dst = dst.add(SPREAD_CHUNK);
            }
            offset += SPREAD_CHUNK;
        }
        return;
    }

    #[cfg(not(all(feature = "simd", target_arch = "x86_64")))]
    for (i, chunk) in output.chunks_exact_mut(SPREAD_CHUNK).enumerate() {
        let shard = i % k;
        let at = (i / k) * SPREAD_CHUNK;
        chunk.copy_from_slice(&inputs[shard][at..at + SPREAD_CHUNK]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn crc32c_known_vector() {
        // Standard CRC32C check value.
        assert_eq!(crc32c(b"123456789", 0), 0xe306_9283);
        assert_eq!(crc32c(b"", 0), 0);
    }

    #[test]
    fn crc32c_hw_matches_sw() {
        let mut rng = StdRng::seed_from_u64(0xc7c);
        for len in [0usize, 1, 3, 7, 8, 9, 63, 64, 100, 4092, 4096] {
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            // Unaligned starts too.
            for skip in 0..3.min(len) {
                assert_eq!(
                    crc32c(&data[skip..], 5),
                    crc32c_sw(&data[skip..], 5),
                    "len={len} skip={skip}"
                );
            }
        }
    }

    #[test]
    fn crc32c_chains() {
        let mut rng = StdRng::seed_from_u64(0xc4a);
        let data: Vec<u8> = (0..1000).map(|_| rng.gen()).collect();
        for split in [0usize, 1, 13, 500, 999, 1000] {
            let (a, b) = data.split_at(split);
            assert_eq!(crc32c(b, crc32c(a, 0)), crc32c(&data, 0), "split={split}");
        }
    }

    #[test]
    fn block_round_trip() {
        let mut rng = StdRng::seed_from_u64(4);
        let payload: Vec<u8> = (0..BLOCK_PAYLOAD_SIZE).map(|_| rng.gen()).collect();
        let block = Block::new(0x00ab_cdef_0123, 7, 42, &payload);

        let mut buf = vec![0u8; BLOCK_SIZE];
        block.encode(&mut buf);
        assert_eq!(buf[8], 7, "shard id sits at offset 8");

        let parsed = Block::decode(&buf).unwrap();
        assert_eq!(parsed.stripe_number(), 0x00ab_cdef_0123);
        assert_eq!(parsed.shard_id(), 7);
        assert_eq!(parsed.sequence(), 42);
        assert_eq!(parsed.payload(), &payload[..]);
        assert_eq!(parsed, block);
    }

    #[test]
    fn zeroed_block_with_checksum_validates() {
        let mut buf = vec![0u8; BLOCK_SIZE];
        let crc = crc32c(&buf[4..], 0);
        buf[..4].copy_from_slice(&crc.to_le_bytes());
        assert!(validate_block(&buf).is_ok());

        // Bump the sequence number without recomputing: invalid.
        buf[4] += 1;
        assert!(matches!(validate_block(&buf), Err(Error::InvalidBlock)));
    }

    #[test]
    fn block_validation_rejects_wrong_length() {
        assert!(matches!(
            validate_block(&[0u8; 100]),
            Err(Error::InvalidBlock)
        ));
    }

    fn minimal_header_image() -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[32..36].copy_from_slice(&VOLUME_VERSION.to_le_bytes());
        buf[36..40].copy_from_slice(&MIN_VOLUME_PREFIX_ID.to_le_bytes());
        let crc = crc32c(&buf[..HEADER_CRC_OFFSET], 0);
        buf[HEADER_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    #[test]
    fn minimal_header_validates_and_any_byte_flip_invalidates() {
        let good = minimal_header_image();
        assert!(validate_header(&good).is_ok());

        for i in 0..BLOCK_SIZE {
            let mut bad = good.clone();
            bad[i] ^= 1;
            assert!(
                validate_header(&bad).is_err(),
                "flipping byte {i} went unnoticed"
            );
        }
    }

    #[test]
    fn header_round_trip() {
        let mut header = VolumeHeader::new(0x0123_4567, &[1, 4, 9]).unwrap();
        header.primary_index_offset = 1 << 20;
        header.secondary_index_offset = 1 << 21;
        header.tail_offset = 1 << 22;
        header.reserved[0] = 0x5a;

        let mut buf = vec![0u8; BLOCK_SIZE];
        header.encode(&mut buf);
        let parsed = VolumeHeader::decode(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.shard_ids, [1, 4, 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn header_constructor_rejects_bad_input() {
        assert!(VolumeHeader::new(100, &[1, 2]).is_err(), "prefix too small");
        assert!(VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[]).is_err());
        assert!(VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[2, 1]).is_err());
        assert!(VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[1, 1]).is_err());
        assert!(VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[0; 9]).is_err());
    }

    #[test]
    fn shard_count_from_trailing_run() {
        let cases: [([u8; 8], usize); 4] = [
            ([1, 2, 3, 3, 3, 3, 3, 3], 3),
            ([1, 2, 3, 4, 4, 4, 4, 4], 4),
            ([0, 0, 0, 0, 0, 0, 0, 0], 1),
            ([1, 2, 3, 4, 5, 6, 7, 8], 8),
        ];
        for (ids, want) in cases {
            let mut header = VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[0]).unwrap();
            header.shard_ids = ids;
            assert_eq!(header.k_blocks_in_stripe(), want, "{ids:?}");
        }
    }

    #[test]
    fn block_offsets_include_the_header_page() {
        let header = VolumeHeader::new(MIN_VOLUME_PREFIX_ID, &[1, 2, 3]).unwrap();
        assert_eq!(header.k_blocks_in_stripe(), 3);

        assert_eq!(header.offset_to_block(0, 1).unwrap(), 4096);
        assert_eq!(header.offset_to_block(0, 3).unwrap(), 4096 * 3);
        assert_eq!(header.offset_to_block(5, 2).unwrap(), 4096 * (1 + 3 * 5 + 1));

        assert!(matches!(
            header.offset_to_block(0, 7),
            Err(Error::UnknownShard { shard_id: 7 })
        ));
    }

    #[test]
    fn spread_three_way_mapping() {
        // 96 bytes over k=3: shard 0 gets [0..16) and [48..64), shard 1
        // gets [16..32) and [64..80), shard 2 gets [32..48) and [80..96).
        let input: Vec<u8> = (0..96u8).collect();
        let mut shards = vec![vec![0u8; 32]; 3];
        {
            let mut refs: Vec<&mut [u8]> =
                shards.iter_mut().map(|s| s.as_mut_slice()).collect();
            spread(&input, &mut refs);
        }

        let expect = |ranges: [(u8, u8); 2]| -> Vec<u8> {
            ranges.iter().flat_map(|&(a, b)| a..b).collect()
        };
        assert_eq!(shards[0], expect([(0, 16), (48, 64)]));
        assert_eq!(shards[1], expect([(16, 32), (64, 80)]));
        assert_eq!(shards[2], expect([(32, 48), (80, 96)]));
    }

    #[test]
    fn unspread_inverts_spread() {
        let mut rng = StdRng::seed_from_u64(0x5b);
        for k in 1..=8usize {
            for chunks_per_shard in [1usize, 2, 7, 255] {
                let total = 16 * k * chunks_per_shard;
                let input: Vec<u8> = (0..total).map(|_| rng.gen()).collect();
                let mut shards = vec![vec![0u8; total / k]; k];
                {
                    let mut refs: Vec<&mut [u8]> =
                        shards.iter_mut().map(|s| s.as_mut_slice()).collect();
                    spread(&input, &mut refs);
                }
                let mut output = vec![0u8; total];
                let refs: Vec<&[u8]> = shards.iter().map(|s| s.as_slice()).collect();
                unspread(&refs, &mut output);
                assert_eq!(output, input, "k={k} chunks={chunks_per_shard}");
            }
        }
    }
}
