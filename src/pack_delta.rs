//! Git delta encoding and application.
//!
//! A delta is two LEB128 sizes (base, result) followed by opcodes:
//! - `1xxxxxxx`: copy from base; low 4 bits select offset bytes, next 3 bits
//!   select size bytes (little-endian), size 0 means 0x10000.
//! - `0nnnnnnn` (n > 0): insert the next n literal bytes.
//! - `00000000`: reserved, rejected.
//!
//! Application validates both header sizes and never writes past the
//! declared result size. The encoder indexes the base in fixed blocks and
//! greedily extends matches.

use std::fmt;

use ahash::AHashMap;

/// Block size used to index the base when computing deltas.
const BLOCK: usize = 16;
/// Candidate offsets remembered per block hash.
const MAX_CANDIDATES: usize = 8;
/// Largest size a single copy opcode can express.
const MAX_COPY: usize = 0xff_ffff;
/// Largest literal run a single insert opcode can express.
const MAX_INSERT: usize = 0x7f;

/// Delta decode errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaError {
    Truncated,
    VarintOverflow,
    BaseSizeMismatch,
    ResultSizeMismatch,
    BadCommandZero,
    CopyOutOfRange,
    OutputOverrun,
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "delta truncated"),
            Self::VarintOverflow => write!(f, "delta varint overflow"),
            Self::BaseSizeMismatch => write!(f, "delta base size mismatch"),
            Self::ResultSizeMismatch => write!(f, "delta result size mismatch"),
            Self::BadCommandZero => write!(f, "delta command zero"),
            Self::CopyOutOfRange => write!(f, "delta copy out of range"),
            Self::OutputOverrun => write!(f, "delta output overrun"),
        }
    }
}

impl std::error::Error for DeltaError {}

/// Reads a delta header varint.
fn read_leb128_u64(data: &[u8], pos: &mut usize) -> Result<u64, DeltaError> {
    let mut shift: u32 = 0;
    let mut result: u64 = 0;

    for _ in 0..10 {
        if *pos >= data.len() {
            return Err(DeltaError::Truncated);
        }
        let b = data[*pos];
        *pos += 1;

        result |= ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            return Ok(result);
        }
        shift = shift.saturating_add(7);
        if shift > 63 {
            return Err(DeltaError::VarintOverflow);
        }
    }
    Err(DeltaError::VarintOverflow)
}

fn write_leb128_u64(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Reads `(base_size, result_size)` from a delta header.
pub fn delta_sizes(delta: &[u8]) -> Result<(usize, usize), DeltaError> {
    let mut pos = 0usize;
    let base_size = read_leb128_u64(delta, &mut pos)? as usize;
    let result_size = read_leb128_u64(delta, &mut pos)? as usize;
    Ok((base_size, result_size))
}

/// Applies `delta` to `base`, writing the result into `out`.
///
/// `max_out` is a hard cap checked against the declared result size before
/// anything is allocated. `out` is cleared first.
pub fn apply_delta(
    base: &[u8],
    delta: &[u8],
    out: &mut Vec<u8>,
    max_out: usize,
) -> Result<(), DeltaError> {
    out.clear();
    let (_, result_size) = delta_sizes(delta)?;
    if result_size > max_out {
        return Err(DeltaError::OutputOverrun);
    }
    out.reserve(result_size);
    apply_delta_into(base, delta, max_out, |chunk| {
        out.extend_from_slice(chunk);
        Ok(())
    })
    .map(|_| ())
}

/// Applies `delta` to `base`, streaming contiguous output slices to a sink.
///
/// Returns the result size.
pub fn apply_delta_into(
    base: &[u8],
    delta: &[u8],
    max_out: usize,
    mut on_chunk: impl FnMut(&[u8]) -> Result<(), DeltaError>,
) -> Result<usize, DeltaError> {
    let mut pos = 0usize;
    let base_size = read_leb128_u64(delta, &mut pos)? as usize;
    let result_size = read_leb128_u64(delta, &mut pos)? as usize;
    if base_size != base.len() {
        return Err(DeltaError::BaseSizeMismatch);
    }
    if result_size > max_out {
        return Err(DeltaError::OutputOverrun);
    }

    let mut out_len = 0usize;
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if (cmd & 0x80) != 0 {
            let (off, size) = decode_copy_params(delta, &mut pos, cmd)?;
            let end = off.checked_add(size).ok_or(DeltaError::CopyOutOfRange)?;
            if end > base.len() {
                return Err(DeltaError::CopyOutOfRange);
            }
            let next = out_len.saturating_add(size);
            if next > result_size {
                return Err(DeltaError::OutputOverrun);
            }
            on_chunk(&base[off..end])?;
            out_len = next;
        } else if cmd != 0 {
            let size = cmd as usize;
            if pos + size > delta.len() {
                return Err(DeltaError::Truncated);
            }
            let next = out_len.saturating_add(size);
            if next > result_size {
                return Err(DeltaError::OutputOverrun);
            }
            on_chunk(&delta[pos..pos + size])?;
            pos += size;
            out_len = next;
        } else {
            return Err(DeltaError::BadCommandZero);
        }
    }

    if out_len != result_size {
        return Err(DeltaError::ResultSizeMismatch);
    }
    Ok(result_size)
}

fn decode_copy_params(
    delta: &[u8],
    pos: &mut usize,
    cmd: u8,
) -> Result<(usize, usize), DeltaError> {
    let mut off: usize = 0;
    let mut size: usize = 0;

    for i in 0..4 {
        if (cmd & (1 << i)) != 0 {
            let b = *delta.get(*pos).ok_or(DeltaError::Truncated)?;
            off |= (b as usize) << (8 * i);
            *pos += 1;
        }
    }
    for i in 0..3 {
        if (cmd & (0x10 << i)) != 0 {
            let b = *delta.get(*pos).ok_or(DeltaError::Truncated)?;
            size |= (b as usize) << (8 * i);
            *pos += 1;
        }
    }

    if size == 0 {
        size = 0x10000;
    }
    Ok((off, size))
}

/// Computes a delta that rebuilds `target` from `base`.
///
/// Always succeeds; in the worst case the delta is all inserts. Callers
/// compare the result against the whole payload to decide whether storing a
/// delta is worthwhile.
#[must_use]
pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len() / 2 + 16);
    write_leb128_u64(base.len() as u64, &mut out);
    write_leb128_u64(target.len() as u64, &mut out);

    let index = index_blocks(base);
    let mut pending: Vec<u8> = Vec::new();
    let mut i = 0usize;

    while i < target.len() {
        let found = if i + BLOCK <= target.len() && !index.is_empty() {
            longest_match(&index, base, target, i)
        } else {
            None
        };

        match found {
            Some((mut base_off, mut len)) => {
                // Pull literal bytes that also precede the match in the base
                // back into the copy.
                let mut start = i;
                while !pending.is_empty()
                    && base_off > 0
                    && base[base_off - 1] == target[start - 1]
                {
                    pending.pop();
                    base_off -= 1;
                    start -= 1;
                    len += 1;
                }
                flush_inserts(&mut pending, &mut out);
                emit_copy(base_off, len, &mut out);
                i = start + len;
            }
            None => {
                pending.push(target[i]);
                i += 1;
            }
        }
    }
    flush_inserts(&mut pending, &mut out);
    out
}

fn index_blocks(base: &[u8]) -> AHashMap<&[u8], Vec<usize>> {
    let mut index: AHashMap<&[u8], Vec<usize>> = AHashMap::new();
    if base.len() < BLOCK || base.len() > u32::MAX as usize {
        return index;
    }
    let mut off = 0usize;
    while off + BLOCK <= base.len() {
        let slot = index.entry(&base[off..off + BLOCK]).or_default();
        if slot.len() < MAX_CANDIDATES {
            slot.push(off);
        }
        off += BLOCK;
    }
    index
}

fn longest_match(
    index: &AHashMap<&[u8], Vec<usize>>,
    base: &[u8],
    target: &[u8],
    at: usize,
) -> Option<(usize, usize)> {
    let candidates = index.get(&target[at..at + BLOCK])?;
    let mut best: Option<(usize, usize)> = None;
    for &off in candidates {
        let len = base[off..]
            .iter()
            .zip(&target[at..])
            .take_while(|(a, b)| a == b)
            .count();
        if best.map_or(true, |(_, l)| len > l) {
            best = Some((off, len));
        }
    }
    best.filter(|&(_, len)| len >= BLOCK)
}

fn flush_inserts(pending: &mut Vec<u8>, out: &mut Vec<u8>) {
    for chunk in pending.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    pending.clear();
}

fn emit_copy(mut off: usize, mut len: usize, out: &mut Vec<u8>) {
    while len > 0 {
        let size = len.min(MAX_COPY);
        let cmd_pos = out.len();
        out.push(0x80);
        let mut cmd = 0x80u8;
        for i in 0..4 {
            let b = ((off >> (8 * i)) & 0xff) as u8;
            if b != 0 {
                cmd |= 1 << i;
                out.push(b);
            }
        }
        for i in 0..3 {
            let b = ((size >> (8 * i)) & 0xff) as u8;
            if b != 0 {
                cmd |= 0x10 << i;
                out.push(b);
            }
        }
        out[cmd_pos] = cmd;
        off += size;
        len -= size;
    }
}
