//! Bit-exact Tx wire codec.
//!
//! Layout: fixed header (marker, version, body length, payload length), then
//! a body holding the varint-length-prefixed TxInfo block followed by one
//! delta-compressed record per op, then the concatenated payload area.
//!
//! Op records encode only the identity words that changed since the previous
//! op in the same Tx, so records must be decoded strictly in stream order.

use std::io::Read;
use std::mem;
use std::sync::Arc;

use minicbor::{Decoder, Encoder};

use crate::core::{AttrUid, Limits, SeriesIndex, TagId};

use super::op::{OpCode, TxInfo, TxMsg, TxOp, TxStatus};
use super::pool::{TxHandle, TxPool};
use super::TxError;

pub const TX_MARKER: [u8; 3] = [0xD7, 0x54, 0x78];
pub const TX_VERSION: u8 = 1;
pub const TX_MIN_VERSION: u8 = 1;
const HEADER_LEN: usize = 12;

/// Identity words tracked by the per-op delta mask, in wire order:
/// parent (3), target (3), attribute (2), series index (2).
const TRACKED_WORDS: usize = 10;

fn op_words(op: &TxOp) -> [u64; TRACKED_WORDS] {
    let p = op.parent_id.words();
    let c = op.cell_id.words();
    [
        p[0], p[1], p[2], c[0], c[1], c[2], op.attr_id.0[0], op.attr_id.0[1], op.series.0[0],
        op.series.0[1],
    ]
}

fn op_from_words(code: OpCode, ofs: u64, len: u64, w: &[u64; TRACKED_WORDS]) -> TxOp {
    TxOp {
        code,
        parent_id: TagId::from_words([w[0], w[1], w[2]]),
        cell_id: TagId::from_words([w[3], w[4], w[5]]),
        attr_id: AttrUid([w[6], w[7]]),
        series: SeriesIndex([w[8], w[9]]),
        ofs,
        len,
    }
}

pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn take_uvarint(
    src: &[u8],
    pos: &mut usize,
    field: &'static str,
) -> Result<u64, TxError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *src
            .get(*pos)
            .ok_or(TxError::Truncated { context: field })?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(TxError::VarintOverflow { field });
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(TxError::VarintOverflow { field });
        }
    }
}

fn encode_info(
    info: &TxInfo,
) -> Result<Vec<u8>, minicbor::encode::Error<std::convert::Infallible>> {
    let mut buf = Vec::with_capacity(72);
    let mut enc = Encoder::new(&mut buf);
    enc.map(4)?;
    enc.str("g")?;
    enc.bytes(&info.genesis_id.to_bytes())?;
    enc.str("r")?;
    enc.bytes(&info.route_id.to_bytes())?;
    enc.str("s")?;
    enc.u8(info.status as u8)?;
    enc.str("n")?;
    enc.u32(info.op_count)?;
    Ok(buf)
}

fn decode_tag24(raw: &[u8]) -> Result<TagId, TxError> {
    if raw.len() != 24 {
        return Err(TxError::LengthInvalid {
            reason: "tag field must be 24 bytes",
        });
    }
    let mut words = [0u64; 3];
    for (i, word) in words.iter_mut().enumerate() {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&raw[i * 8..(i + 1) * 8]);
        *word = u64::from_le_bytes(chunk);
    }
    Ok(TagId::from_words(words))
}

fn decode_info(src: &[u8]) -> Result<TxInfo, TxError> {
    let mut dec = Decoder::new(src);
    let len = dec
        .map()?
        .ok_or_else(|| minicbor::decode::Error::message("indefinite map"))?;
    let mut info = TxInfo::default();
    let mut seen_status = false;
    for _ in 0..len {
        match dec.str()? {
            "g" => info.genesis_id = decode_tag24(dec.bytes()?)?,
            "r" => info.route_id = decode_tag24(dec.bytes()?)?,
            "s" => {
                let raw = dec.u8()?;
                info.status = TxStatus::from_u64(u64::from(raw)).ok_or(TxError::LengthInvalid {
                    reason: "unknown tx status",
                })?;
                seen_status = true;
            }
            "n" => info.op_count = dec.u32()?,
            _ => dec.skip()?,
        }
    }
    if !seen_status {
        return Err(TxError::LengthInvalid {
            reason: "tx info missing status",
        });
    }
    Ok(info)
}

/// Serialize a Tx to its wire form.
pub fn encode_tx(msg: &TxMsg, limits: &Limits) -> Result<Vec<u8>, TxError> {
    if msg.ops.len() != msg.info.op_count as usize {
        return Err(TxError::LengthInvalid {
            reason: "op_count does not match op list",
        });
    }
    if msg.ops.len() > limits.max_ops_per_tx {
        return Err(TxError::LimitExceeded {
            what: "ops",
            got: msg.ops.len(),
            max: limits.max_ops_per_tx,
        });
    }
    if msg.data.len() > limits.max_tx_data_bytes {
        return Err(TxError::LimitExceeded {
            what: "payload bytes",
            got: msg.data.len(),
            max: limits.max_tx_data_bytes,
        });
    }

    let info = encode_info(&msg.info).map_err(crate::core::ValueError::from)?;
    let mut body = Vec::with_capacity(info.len() + 8 + msg.ops.len() * 24);
    put_uvarint(&mut body, info.len() as u64);
    body.extend_from_slice(&info);

    let mut prev = [0u64; TRACKED_WORDS];
    let mut last_ofs = 0u64;
    for op in &msg.ops {
        op.validate()?;
        if op.ofs < last_ofs {
            return Err(TxError::LengthInvalid {
                reason: "op offsets must be non-decreasing",
            });
        }
        last_ofs = op.ofs;
        if op.ofs.saturating_add(op.len) > msg.data.len() as u64 {
            return Err(TxError::PayloadRange {
                ofs: op.ofs,
                len: op.len,
                data_len: msg.data.len(),
            });
        }

        put_uvarint(&mut body, 0); // reserved forward-compatibility slot
        put_uvarint(&mut body, op.code.as_u64());
        put_uvarint(&mut body, op.ofs);
        put_uvarint(&mut body, op.len);

        let words = op_words(op);
        let mut mask = 0u64;
        for (i, (word, prev_word)) in words.iter().zip(prev.iter()).enumerate() {
            if word != prev_word {
                mask |= 1 << i;
            }
        }
        put_uvarint(&mut body, mask);
        for (i, word) in words.iter().enumerate() {
            if mask & (1 << i) != 0 {
                body.extend_from_slice(&word.to_le_bytes());
            }
        }
        prev = words;
    }

    if body.len() > limits.max_tx_body_bytes {
        return Err(TxError::LimitExceeded {
            what: "body bytes",
            got: body.len(),
            max: limits.max_tx_body_bytes,
        });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + msg.data.len());
    out.extend_from_slice(&TX_MARKER);
    out.push(TX_VERSION);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&(msg.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&msg.data);
    Ok(out)
}

/// Decode the next Tx from a byte stream into a pooled message.
///
/// Returns `Ok(None)` on clean end-of-stream (no header bytes read). Any
/// malformation rejects the whole Tx; the partially-filled message is reset
/// on its way back to the pool.
pub fn decode_tx(
    src: &mut impl Read,
    pool: &Arc<TxPool>,
    limits: &Limits,
) -> Result<Option<TxHandle>, TxError> {
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0usize;
    while read < header.len() {
        let n = src.read(&mut header[read..])?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(TxError::Truncated { context: "header" });
        }
        read += n;
    }

    if header[..3] != TX_MARKER {
        return Err(TxError::MarkerMismatch);
    }
    let version = header[3];
    if version < TX_MIN_VERSION {
        return Err(TxError::VersionUnsupported {
            got: version,
            min: TX_MIN_VERSION,
        });
    }
    let body_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let data_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if body_len > limits.max_tx_body_bytes {
        return Err(TxError::LimitExceeded {
            what: "body bytes",
            got: body_len,
            max: limits.max_tx_body_bytes,
        });
    }
    if data_len > limits.max_tx_data_bytes {
        return Err(TxError::LimitExceeded {
            what: "payload bytes",
            got: data_len,
            max: limits.max_tx_data_bytes,
        });
    }

    let mut handle = pool.acquire();

    // One buffer serves both sections: the body is parsed out of it, then the
    // payload area is read over it and the handle keeps the result.
    let mut buf = mem::take(&mut handle.data);
    let result = read_body_and_payload(src, &mut buf, body_len, data_len, limits, &mut handle);
    handle.data = buf;

    match result {
        Ok(()) => {
            handle.data.truncate(data_len);
            Ok(Some(handle))
        }
        Err(err) => Err(err),
    }
}

fn read_body_and_payload(
    src: &mut impl Read,
    buf: &mut Vec<u8>,
    body_len: usize,
    data_len: usize,
    limits: &Limits,
    out: &mut TxMsg,
) -> Result<(), TxError> {
    buf.resize(body_len.max(data_len), 0);

    src.read_exact(&mut buf[..body_len])
        .map_err(|_| TxError::Truncated { context: "body" })?;
    parse_body(&buf[..body_len], data_len, limits, out)?;

    src.read_exact(&mut buf[..data_len])
        .map_err(|_| TxError::Truncated { context: "payload area" })?;
    Ok(())
}

fn parse_body(
    body: &[u8],
    data_len: usize,
    limits: &Limits,
    out: &mut TxMsg,
) -> Result<(), TxError> {
    let mut pos = 0usize;

    let info_len = take_uvarint(body, &mut pos, "info length")? as usize;
    let info_end = pos
        .checked_add(info_len)
        .filter(|&e| e <= body.len())
        .ok_or(TxError::LengthInvalid {
            reason: "info block exceeds body",
        })?;
    out.info = decode_info(&body[pos..info_end])?;
    pos = info_end;

    let op_count = out.info.op_count as usize;
    if op_count > limits.max_ops_per_tx {
        return Err(TxError::LimitExceeded {
            what: "ops",
            got: op_count,
            max: limits.max_ops_per_tx,
        });
    }

    let mut prev = [0u64; TRACKED_WORDS];
    let mut last_ofs = 0u64;
    out.ops.reserve(op_count);
    for _ in 0..op_count {
        take_uvarint(body, &mut pos, "reserved slot")?;
        let raw_code = take_uvarint(body, &mut pos, "opcode")?;
        let code = OpCode::from_u64(raw_code).ok_or(TxError::UnknownOpCode { got: raw_code })?;
        let ofs = take_uvarint(body, &mut pos, "payload offset")?;
        let len = take_uvarint(body, &mut pos, "payload length")?;

        let mask = take_uvarint(body, &mut pos, "delta mask")?;
        if mask >> TRACKED_WORDS != 0 {
            return Err(TxError::LengthInvalid {
                reason: "delta mask has unknown bits",
            });
        }
        for (i, word) in prev.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                let end = pos
                    .checked_add(8)
                    .filter(|&e| e <= body.len())
                    .ok_or(TxError::Truncated { context: "delta word" })?;
                let mut chunk = [0u8; 8];
                chunk.copy_from_slice(&body[pos..end]);
                *word = u64::from_le_bytes(chunk);
                pos = end;
            }
        }

        let op = op_from_words(code, ofs, len, &prev);
        op.validate()?;
        if op.ofs < last_ofs {
            return Err(TxError::LengthInvalid {
                reason: "op offsets must be non-decreasing",
            });
        }
        last_ofs = op.ofs;
        if op.ofs.saturating_add(op.len) > data_len as u64 {
            return Err(TxError::PayloadRange {
                ofs: op.ofs,
                len: op.len,
                data_len,
            });
        }
        out.ops.push(op);
    }

    if pos != body.len() {
        return Err(TxError::LengthInvalid {
            reason: "trailing bytes in body",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_limits() -> Limits {
        Limits::default()
    }

    fn pool() -> Arc<TxPool> {
        TxPool::new(&Limits::default())
    }

    fn sample_tx(pool: &Arc<TxPool>) -> TxHandle {
        let mut tx = pool.acquire();
        let cell = TagId::from_literal("dir-listing");
        let parent = TagId::from_literal("root");
        let attr = TagId::from_literal("attr.child").attr_uid();

        for (i, payload) in [&b"alpha"[..], &b"beta"[..], &b"gamma-longer"[..]]
            .iter()
            .enumerate()
        {
            let mut op = TxOp::new(OpCode::UpsertAttr, cell, attr);
            op.parent_id = parent;
            op.series = SeriesIndex::from(i as u64 + 1);
            op.ofs = tx.data.len() as u64;
            op.len = payload.len() as u64;
            tx.data.extend_from_slice(payload);
            tx.ops.push(op);
        }
        tx.info = TxInfo {
            genesis_id: TagId::now(),
            route_id: TagId::now(),
            status: TxStatus::Synced,
            op_count: 3,
        };
        tx
    }

    #[test]
    fn roundtrip_preserves_everything() {
        let pool = pool();
        let tx = sample_tx(&pool);
        let wire = encode_tx(&tx, &test_limits()).unwrap();

        let decoded = decode_tx(&mut Cursor::new(&wire), &pool, &test_limits())
            .unwrap()
            .unwrap();
        assert_eq!(decoded.info, tx.info);
        assert_eq!(decoded.ops, tx.ops);
        assert_eq!(decoded.data, tx.data);
        assert!(decoded.accounting_holds());
    }

    #[test]
    fn series_only_runs_delta_to_the_series_bits() {
        let pool = pool();
        let tx = sample_tx(&pool);
        let wire = encode_tx(&tx, &test_limits()).unwrap();

        // Locate the second op's record: after its four leading varints the
        // mask must carry exactly the low series-index bit (bit 8) - both
        // ops share parent, target, and attribute.
        let body_start = HEADER_LEN;
        let mut pos = body_start;
        let info_len = take_uvarint(&wire, &mut pos, "info").unwrap() as usize;
        pos += info_len;

        // Skip op 0: 5 varints + one 8-byte word per set mask bit.
        for _ in 0..4 {
            take_uvarint(&wire, &mut pos, "op0 varint").unwrap();
        }
        let mask0 = take_uvarint(&wire, &mut pos, "op0 mask").unwrap();
        pos += 8 * mask0.count_ones() as usize;
        // Op 0 changes parent, target, attr, and series low word vs. the
        // all-zero reference op.
        assert_eq!(mask0, 0b01_1111_1111);

        for _ in 0..4 {
            take_uvarint(&wire, &mut pos, "op1 varint").unwrap();
        }
        let mask1 = take_uvarint(&wire, &mut pos, "op1 mask").unwrap();
        assert_eq!(mask1, 1 << 8, "only the series low word changed");
    }

    #[test]
    fn delta_encoding_beats_full_identity_encoding() {
        let pool = pool();
        let tx = sample_tx(&pool);
        let wire = encode_tx(&tx, &test_limits()).unwrap();
        let body_len = wire.len() - HEADER_LEN - tx.data.len();
        // 3 ops carrying 10 words each would need 240 identity bytes alone.
        let naive_identity_bytes = 3 * TRACKED_WORDS * 8;
        assert!(
            body_len < naive_identity_bytes + 80,
            "body {body_len} bytes is not delta-compressed"
        );
    }

    #[test]
    fn marker_mismatch_is_rejected() {
        let pool = pool();
        let tx = sample_tx(&pool);
        let mut wire = encode_tx(&tx, &test_limits()).unwrap();
        wire[0] ^= 0xFF;
        let err = decode_tx(&mut Cursor::new(&wire), &pool, &test_limits()).unwrap_err();
        assert!(matches!(err, TxError::MarkerMismatch));
        assert!(!err.is_malformed(), "corrupt header is fatal, not per-tx");
    }

    #[test]
    fn truncation_is_rejected_without_pool_corruption() {
        let pool = pool();
        let tx = sample_tx(&pool);
        let wire = encode_tx(&tx, &test_limits()).unwrap();
        drop(tx);

        for cut in [4, HEADER_LEN + 3, wire.len() - 2] {
            let err = decode_tx(&mut Cursor::new(&wire[..cut]), &pool, &test_limits()).unwrap_err();
            assert!(matches!(err, TxError::Truncated { .. }), "cut at {cut}");
        }

        // Every message that went through a failed decode came back reset.
        let fresh = pool.acquire();
        assert!(fresh.ops.is_empty());
        assert!(fresh.data.is_empty());
        assert_eq!(fresh.info, TxInfo::default());
    }

    #[test]
    fn clean_eof_yields_none() {
        let pool = pool();
        let got = decode_tx(&mut Cursor::new(&[]), &pool, &test_limits()).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let pool = pool();
        let mut tx = sample_tx(&pool);
        tx.info.op_count = 1;
        tx.ops.truncate(1);
        let mut wire = encode_tx(&tx, &test_limits()).unwrap();

        // The opcode varint sits right after the info block and the reserved
        // slot of op 0.
        let mut pos = HEADER_LEN;
        let info_len = take_uvarint(&wire, &mut pos, "info").unwrap() as usize;
        pos += info_len;
        take_uvarint(&wire, &mut pos, "reserved").unwrap();
        wire[pos] = 0x63; // 99: not a known opcode
        let err = decode_tx(&mut Cursor::new(&wire), &pool, &test_limits()).unwrap_err();
        assert!(matches!(err, TxError::UnknownOpCode { got: 99 }));
        assert!(err.is_malformed());
    }

    #[test]
    fn varint_overflow_is_rejected() {
        let mut pos = 0usize;
        let overlong = [0xFFu8; 11];
        let err = take_uvarint(&overlong, &mut pos, "test").unwrap_err();
        assert!(matches!(err, TxError::VarintOverflow { .. }));
    }
}
