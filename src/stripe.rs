//! Striped block placement: the write and read paths composed end to end.
//!
//! Write path: spread the caller's payload into `k` shard payloads, encode
//! `m` parity payloads, stamp each 4 KiB block with its stripe/shard
//! identity, sequence number and checksum, then submit one write per shard
//! to the volume that stores it. Read path: read every locatable shard,
//! checksum- and identity-validate each block, treat anything invalid as
//! erased, reconstruct missing data shards through the codec, and unspread
//! back into the caller's buffer.
//!
//! Updates are two-phase: [`begin_update`] stages the current blocks as
//! pre-images in each volume's tail region and returns only after every
//! phase-1 completion has drained; [`commit_update`] then rewrites the
//! stripe in place with the next sequence number. Consuming the
//! [`PendingUpdate`] is what authorizes phase 2, so phase ordering is
//! enforced by construction. Crash recovery replays or rolls back from the
//! tail pre-images and the sequence numbers; that policy lives in the
//! recovery collaborator, not here.
//!
//! The composed operations assume sole use of the [`IoContext`] while they
//! run (the layer is single-threaded cooperative); they poll the context
//! until their own submissions drain.

use std::collections::HashMap;
use std::fs::File;

use tracing::{debug, warn};

use crate::aio::{Completion, IoContext, PageBuf, PAGE_SIZE};
use crate::block::{self, Block, VolumeHeader, BLOCK_PAYLOAD_SIZE, BLOCK_SIZE};
use crate::codec::ReedSolomon;
use crate::{Error, Result};

/// One volume file plus its decoded header.
#[derive(Debug)]
pub struct Volume {
    file: File,
    header: VolumeHeader,
}

impl Volume {
    /// Initialize a fresh volume file: stamp `header` at byte 0.
    pub fn create(io: &mut IoContext, file: File, header: VolumeHeader) -> Result<Self> {
        let mut page = PageBuf::new(1);
        header.encode(&mut page);
        let token = io.submit_write(&file, 0, page)?;
        let mut done = await_tokens(io, &[token])?;
        take_result(&mut done, token)?;
        debug!(prefix_id = header.volume_prefix_id, "volume created");
        Ok(Self { file, header })
    }

    /// Open an existing volume: read and validate the header page.
    pub fn open(io: &mut IoContext, file: File) -> Result<Self> {
        let token = io.submit_read(&file, 0, 1)?;
        let mut done = await_tokens(io, &[token])?;
        let completion = done
            .remove(&token)
            .expect("awaited completion is present");
        completion.result?;
        let header = VolumeHeader::decode(&completion.buffer)?;
        Ok(Self { file, header })
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

/// Payload bytes carried by one stripe of `k` data shards.
pub fn stripe_payload_size(data_shards: usize) -> usize {
    data_shards * BLOCK_PAYLOAD_SIZE
}

/// Index of the volume storing `shard_id`, or [`Error::UnknownShard`] when
/// no volume lists it.
fn locate(volumes: &[Volume], shard_id: u8) -> Result<usize> {
    volumes
        .iter()
        .position(|v| v.header.position_of(shard_id).is_some())
        .ok_or(Error::UnknownShard { shard_id })
}

/// Poll until every token in `tokens` has drained.
///
/// `poll` itself never blocks, so this spins; the composed operations are
/// expected to own the context, and any completion that is not theirs is a
/// caller bug (its buffer is released on drop).
fn await_tokens(io: &mut IoContext, tokens: &[u64]) -> Result<HashMap<u64, Completion>> {
    let mut drained: HashMap<u64, Completion> = HashMap::new();
    let mut batch: Vec<Completion> = Vec::new();
    while !tokens.iter().all(|t| drained.contains_key(t)) {
        io.poll(&mut batch)?;
        for c in batch.drain(..) {
            drained.insert(c.token, c);
        }
        std::hint::spin_loop();
    }
    Ok(drained)
}

/// Pull one completion's result out of a drained set.
fn take_result(drained: &mut HashMap<u64, Completion>, token: u64) -> Result<()> {
    drained
        .remove(&token)
        .expect("awaited completion is present")
        .result
}

/// Write one full stripe: spread, encode, stamp, submit one block per
/// shard, and drain the completions.
///
/// `payload` must be exactly [`stripe_payload_size`] bytes; every shard of
/// the codec must be locatable across `volumes`. All blocks carry
/// `sequence`; rewrites of an existing stripe go through
/// [`begin_update`]/[`commit_update`] instead so the previous contents are
/// staged in the rollback tail first.
pub fn write_stripe(
    io: &mut IoContext,
    volumes: &[Volume],
    codec: &ReedSolomon,
    stripe_number: u64,
    sequence: u32,
    payload: &[u8],
) -> Result<()> {
    let k = codec.data_shards();
    let m = codec.parity_shards();
    let n = codec.total_shards();
    assert_eq!(payload.len(), stripe_payload_size(k), "payload size");

    let mut data = vec![vec![0u8; BLOCK_PAYLOAD_SIZE]; k];
    {
        let mut refs: Vec<&mut [u8]> = data.iter_mut().map(|d| d.as_mut_slice()).collect();
        block::spread(payload, &mut refs);
    }

    let mut parity = vec![vec![0u8; BLOCK_PAYLOAD_SIZE]; m];
    {
        let data_refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
        let mut parity_refs: Vec<&mut [u8]> =
            parity.iter_mut().map(|p| p.as_mut_slice()).collect();
        codec.encode(&data_refs, &mut parity_refs);
    }

    let mut tokens = Vec::with_capacity(n);
    for shard_id in 0..n as u8 {
        let volume = &volumes[locate(volumes, shard_id)?];
        let offset = volume.header.offset_to_block(stripe_number, shard_id)?;

        let shard_payload = if (shard_id as usize) < k {
            &data[shard_id as usize]
        } else {
            &parity[shard_id as usize - k]
        };
        let mut page = PageBuf::new(1);
        Block::new(stripe_number, shard_id, sequence, shard_payload).encode(&mut page);
        tokens.push(io.submit_write(&volume.file, offset / PAGE_SIZE as u64, page)?);
    }

    let mut done = await_tokens(io, &tokens)?;
    for token in tokens {
        take_result(&mut done, token)?;
    }
    debug!(stripe_number, sequence, "stripe written");
    Ok(())
}

/// Read one full stripe into `payload`, reconstructing through the codec
/// when shards are missing or fail validation.
///
/// A shard whose read errors, whose checksum does not match, or whose
/// stripe/shard identity is wrong counts as erased; fewer than `k`
/// survivors is [`Error::InsufficientShards`]. Returns the highest
/// sequence number among the validated blocks.
pub fn read_stripe(
    io: &mut IoContext,
    volumes: &[Volume],
    codec: &ReedSolomon,
    stripe_number: u64,
    payload: &mut [u8],
) -> Result<u32> {
    let k = codec.data_shards();
    let n = codec.total_shards();
    assert_eq!(payload.len(), stripe_payload_size(k), "payload size");

    let mut tokens: Vec<Option<u64>> = vec![None; n];
    for shard_id in 0..n as u8 {
        // A shard no volume stores is simply erased.
        let Ok(vi) = locate(volumes, shard_id) else {
            continue;
        };
        let offset = volumes[vi].header.offset_to_block(stripe_number, shard_id)?;
        let token = io.submit_read(&volumes[vi].file, offset / PAGE_SIZE as u64, 1)?;
        tokens[shard_id as usize] = Some(token);
    }

    let submitted: Vec<u64> = tokens.iter().flatten().copied().collect();
    let mut done = await_tokens(io, &submitted)?;

    let mut shards: Vec<Vec<u8>> = vec![vec![0u8; BLOCK_PAYLOAD_SIZE]; n];
    let mut erasures = vec![true; n];
    let mut sequence = 0u32;
    for shard_id in 0..n {
        let Some(token) = tokens[shard_id] else {
            continue;
        };
        let completion = done
            .remove(&token)
            .expect("awaited completion is present");
        if let Err(err) = completion.result {
            warn!(shard_id, %err, "shard read failed, treating as erased");
            continue;
        }
        match Block::decode(&completion.buffer) {
            Ok(b) if b.stripe_number() == stripe_number && b.shard_id() == shard_id as u8 => {
                shards[shard_id].copy_from_slice(b.payload());
                erasures[shard_id] = false;
                sequence = sequence.max(b.sequence());
            }
            _ => warn!(shard_id, "invalid block, treating as erased"),
        }
    }

    let present: Vec<u8> = (0..n as u8).filter(|&s| !erasures[s as usize]).collect();
    if present.len() < k {
        return Err(Error::InsufficientShards {
            present: present.len(),
            required: k,
        });
    }

    let missing_data: Vec<u8> = (0..k as u8).filter(|&s| erasures[s as usize]).collect();
    if !missing_data.is_empty() {
        // Reconstruct only the data shards we actually need: a generic
        // coding step from the first k survivors.
        let mut ids: Vec<u8> = present[..k].to_vec();
        ids.extend_from_slice(&missing_data);

        let mut slots: Vec<Option<&mut Vec<u8>>> = shards.iter_mut().map(Some).collect();
        let mut table: Vec<&mut [u8]> = ids
            .iter()
            .map(|&id| {
                slots[id as usize]
                    .take()
                    .expect("shard ids are distinct")
                    .as_mut_slice()
            })
            .collect();
        codec.code(&ids, k, &mut table)?;
        debug!(stripe_number, recovered = missing_data.len(), "stripe decoded");
    }

    let data_refs: Vec<&[u8]> = shards[..k].iter().map(|s| s.as_slice()).collect();
    block::unspread(&data_refs, payload);
    Ok(sequence)
}

/// Phase-1 receipt of a two-phase stripe rewrite: every pre-image block is
/// staged in its volume's tail and the writes have drained. Consuming it
/// is the only way to start phase 2.
#[derive(Debug)]
#[must_use = "phase 2 never runs unless the update is committed"]
pub struct PendingUpdate {
    stripe_number: u64,
    next_sequence: u32,
}

impl PendingUpdate {
    pub fn stripe_number(&self) -> u64 {
        self.stripe_number
    }

    /// Sequence number the committed blocks will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}

/// Phase 1 of a stripe rewrite: stage the current blocks of
/// `stripe_number` as pre-images in each volume's tail region.
///
/// The pre-image of shard `s` lands at `tail_offset + 4096 * position(s)`
/// of the volume storing it. Blocks that do not read back (first write of
/// a region) stage as zero pages. Returns after all phase-1 completions
/// drain; any staging failure aborts the update, because overwriting
/// without a durable pre-image would make crash recovery
/// non-deterministic.
pub fn begin_update(
    io: &mut IoContext,
    volumes: &[Volume],
    codec: &ReedSolomon,
    stripe_number: u64,
) -> Result<PendingUpdate> {
    let n = codec.total_shards();

    let mut reads: Vec<(u8, usize, u64)> = Vec::with_capacity(n);
    for shard_id in 0..n as u8 {
        let vi = locate(volumes, shard_id)?;
        let offset = volumes[vi].header.offset_to_block(stripe_number, shard_id)?;
        let token = io.submit_read(&volumes[vi].file, offset / PAGE_SIZE as u64, 1)?;
        reads.push((shard_id, vi, token));
    }
    let read_tokens: Vec<u64> = reads.iter().map(|r| r.2).collect();
    let mut done = await_tokens(io, &read_tokens)?;

    let mut max_sequence = 0u32;
    let mut staging = Vec::with_capacity(n);
    for (shard_id, vi, token) in reads {
        let completion = done
            .remove(&token)
            .expect("awaited completion is present");
        let Completion {
            mut buffer, result, ..
        } = completion;
        if result.is_err() {
            buffer.fill(0);
        } else if let Ok(b) = Block::decode(&buffer) {
            max_sequence = max_sequence.max(b.sequence());
        }

        let volume = &volumes[vi];
        let tail = volume.header.tail_offset;
        assert!(
            tail >= BLOCK_SIZE as u64 && tail % BLOCK_SIZE as u64 == 0,
            "tail offset must be page-aligned past the header"
        );
        let position = volume
            .header
            .position_of(shard_id)
            .expect("located volume lists the shard") as u64;
        staging.push(io.submit_write(&volume.file, tail / PAGE_SIZE as u64 + position, buffer)?);
    }

    let mut done = await_tokens(io, &staging)?;
    for token in staging {
        take_result(&mut done, token)?;
    }
    debug!(stripe_number, max_sequence, "pre-images staged");

    Ok(PendingUpdate {
        stripe_number,
        next_sequence: max_sequence + 1,
    })
}

/// Phase 2 of a stripe rewrite: overwrite the stripe in place with the
/// next sequence number. Only reachable once phase 1 has fully drained.
pub fn commit_update(
    io: &mut IoContext,
    volumes: &[Volume],
    codec: &ReedSolomon,
    update: PendingUpdate,
    payload: &[u8],
) -> Result<()> {
    write_stripe(
        io,
        volumes,
        codec,
        update.stripe_number,
        update.next_sequence,
        payload,
    )
}
