#![no_main]

use libfuzzer_sys::fuzz_target;
use gitodb_rs::pack_delta::apply_delta;
use gitodb_rs::pack_inflate::{inflate_limited, PackFile};
use gitodb_rs::ObjectFormat;

const MAX_INPUT: usize = 64 * 1024;
const MAX_OUT: usize = 64 * 1024;
const MAX_BASE: usize = 32 * 1024;
const MAX_HEADER_BYTES: usize = 64;

fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut shift: u32 = 0;
    let mut value: u64 = 0;
    for _ in 0..10 {
        let b = *data.get(*pos)?;
        *pos += 1;
        value |= ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            return Some(value);
        }
        shift = shift.saturating_add(7);
        if shift > 63 {
            return None;
        }
    }
    None
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 || data.len() > MAX_INPUT {
        return;
    }

    let format = if (data[0] & 1) == 0 {
        ObjectFormat::Sha1
    } else {
        ObjectFormat::Sha256
    };
    if let Ok(pack) = PackFile::parse(data, format) {
        let len = data.len();
        let mut idx = 1usize;
        for _ in 0..4 {
            let offset = 12 + (data[idx] as usize % len.saturating_sub(12).max(1));
            let _ = pack.entry_header_at(offset as u64, MAX_HEADER_BYTES);
            idx = (idx + 1) % data.len();
        }
    }

    let mut inflate_out = Vec::with_capacity(256);
    let _ = inflate_limited(data, &mut inflate_out, MAX_OUT);

    let split = (data[1] as usize) % (data.len() - 1) + 1;
    let (base, delta) = data.split_at(split);
    let mut pos = 0usize;
    let (Some(base_len), Some(result_len)) = (read_varint(delta, &mut pos), read_varint(delta, &mut pos)) else {
        return;
    };
    if base_len as usize > MAX_BASE || result_len as usize > MAX_OUT || base_len as usize > base.len() {
        return;
    }
    let base = &base[..base_len as usize];
    let mut delta_out = Vec::with_capacity(result_len as usize);
    if apply_delta(base, delta, &mut delta_out, MAX_OUT).is_ok() {
        assert_eq!(delta_out.len() as u64, result_len);
    }
});
