//! Layer 0: Identity atoms
//!
//! TagId: 192-bit identifier, content-derived or time-derived.
//! AttrUid: 128-bit wire compaction of an attribute spec's TagId.
//! SeriesIndex: disambiguates repeated attribute values under one attr.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unix seconds occupy bits 16..63 of word 0; the low 16 bits hold the
/// sub-second fraction (1/65536ths).
const TIME_FRAC_BITS: u32 = 16;
const TIME_SECS_MASK: u64 = (1 << 47) - 1;

/// 192-bit identifier - three 64-bit words.
///
/// Two construction families that must never be confused:
/// - content-derived ([`TagId::from_literal`]): deterministic hash, names
///   types and specs without central coordination;
/// - time-derived ([`TagId::now`]): near-unique, word 0 leads with the
///   timestamp so lexicographic order approximates chronological order.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId([u64; 3]);

impl TagId {
    pub const NIL: TagId = TagId([0; 3]);

    pub const fn from_words(words: [u64; 3]) -> Self {
        Self(words)
    }

    pub const fn words(&self) -> [u64; 3] {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; 3]
    }

    /// Deterministic content-derived ID: SHA-256 of the literal, first 24
    /// bytes spread across the three words little-endian.
    ///
    /// An empty literal maps to nil by convention. Callers for whom nil is
    /// ambiguous with "unset" must reject it.
    pub fn from_literal(literal: impl AsRef<[u8]>) -> Self {
        let literal = literal.as_ref();
        if literal.is_empty() {
            return Self::NIL;
        }
        let digest = Sha256::digest(literal);
        Self::from_hash_bytes(&digest)
    }

    /// Time-derived ID without entropy: word 0 is `(secs << 16) | frac16`.
    ///
    /// Reproducible; use [`TagId::now`] when statistical uniqueness is
    /// required.
    pub fn from_time(unix_secs: u64, frac16: u16) -> Self {
        let word0 = ((unix_secs & TIME_SECS_MASK) << TIME_FRAC_BITS) | u64::from(frac16);
        Self([word0, 0, 0])
    }

    /// Time-derived ID for the current instant, with process-wide entropy
    /// folded into the low bits of word 0 and all of word 1.
    ///
    /// Strictly monotonic within a process: rapid repeated calls always
    /// compare in generation order.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = elapsed.as_secs();
        let frac16 = ((u64::from(elapsed.subsec_nanos()) << TIME_FRAC_BITS) / 1_000_000_000) as u16;

        let entropy = next_entropy();
        // Entropy only perturbs the fraction's low bits; the watermark below
        // restores strict ordering when two calls land on the same tick.
        let candidate = Self::from_time(secs, frac16).0[0] ^ (entropy & 0xF);
        let word0 = bump_time_watermark(candidate);
        Self([word0, entropy, 0])
    }

    /// Commutative, associative combination: per-word wrapping add.
    ///
    /// Folding the same multiset of IDs in any order yields the same result.
    #[must_use]
    pub fn combine(&self, other: &TagId) -> TagId {
        TagId([
            self.0[0].wrapping_add(other.0[0]),
            self.0[1].wrapping_add(other.0[1]),
            self.0[2].wrapping_add(other.0[2]),
        ])
    }

    /// Non-commutative lineage combinator: hashes (self ‖ seed).
    ///
    /// Each revision's ID is a function of its position in the chain; it
    /// cannot be produced without knowing the true predecessor.
    #[must_use]
    pub fn entangle(&self, seed: &TagId) -> TagId {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        hasher.update(seed.to_bytes());
        Self::from_hash_bytes(&hasher.finalize())
    }

    /// 128-bit wire compaction: word 2 XOR-folded into word 0.
    ///
    /// All wire-level attribute identity travels as an [`AttrUid`].
    pub fn attr_uid(&self) -> AttrUid {
        AttrUid([self.0[0] ^ self.0[2], self.0[1]])
    }

    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        for (i, word) in self.0.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn from_hash_bytes(digest: &[u8]) -> Self {
        let mut words = [0u64; 3];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&digest[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        Self(words)
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "TagId(nil)");
        }
        write!(
            f,
            "TagId({:016x}.{:016x}.{:016x})",
            self.0[0], self.0[1], self.0[2]
        )
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "nil");
        }
        write!(f, "{:016x}.{:016x}.{:016x}", self.0[0], self.0[1], self.0[2])
    }
}

/// Process-wide entropy stream for time-derived IDs.
///
/// Seeded once from the OS RNG, scrambled on every call. Uniqueness, not
/// reproducibility, is the requirement here.
fn next_entropy() -> u64 {
    static SEED: OnceLock<AtomicU64> = OnceLock::new();
    let seed = SEED.get_or_init(|| AtomicU64::new(rand::random::<u64>() | 1));
    let prev = seed
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
            let mut x = s;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            Some(x)
        })
        .unwrap_or(1);
    prev.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

/// Last-issued word 0, enforcing strict monotonic ordering of [`TagId::now`].
fn bump_time_watermark(candidate: u64) -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let mut issued = candidate;
    LAST.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
        issued = candidate.max(last.wrapping_add(1));
        Some(issued)
    })
    .ok();
    issued
}

/// 128-bit attribute identity as it travels on the wire.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AttrUid(pub [u64; 2]);

impl AttrUid {
    pub const NIL: AttrUid = AttrUid([0; 2]);

    pub fn is_nil(&self) -> bool {
        self.0 == [0; 2]
    }
}

impl fmt::Debug for AttrUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrUid({:016x}.{:016x})", self.0[0], self.0[1])
    }
}

impl fmt::Display for AttrUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}.{:016x}", self.0[0], self.0[1])
    }
}

/// Disambiguates repeated or indexed values under one attribute.
///
/// Plain literal indexes live in word 0; tag-keyed series fold a full
/// [`TagId`] the same way [`TagId::attr_uid`] does.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SeriesIndex(pub [u64; 2]);

impl SeriesIndex {
    pub const ZERO: SeriesIndex = SeriesIndex([0; 2]);

    pub fn from_tag(tag: &TagId) -> Self {
        let w = tag.words();
        Self([w[0] ^ w[2], w[1]])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 2]
    }
}

impl From<u64> for SeriesIndex {
    fn from(i: u64) -> Self {
        Self([i, 0])
    }
}

impl fmt::Debug for SeriesIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0[1] == 0 {
            write!(f, "SeriesIndex({})", self.0[0])
        } else {
            write!(f, "SeriesIndex({:016x}.{:016x})", self.0[0], self.0[1])
        }
    }
}
