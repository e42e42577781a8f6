//! Fingerprint Index: 64-bit simhash over normalized description text, with an
//! LSH-banded index for near-duplicate lookups.
//!
//! Fingerprints are persisted, so the feature hash must be stable across builds and
//! platforms: each feature is hashed with SHA-256 and the first 8 bytes are read as a
//! little-endian `u64`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_HAMMING_THRESHOLD: u32 = 3;

/// Lines containing any of these are footer noise shared by unrelated postings.
const BOILERPLATE_MARKERS: &[&str] = &[
    "equal opportunity employer",
    "equal employment opportunity",
    "without regard to race",
    "reasonable accommodation",
    "apply now",
    "click apply",
    "to apply, please",
    "share this job",
    "follow us on",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn hamming_distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Postgres has no unsigned 64-bit column type; the bits are stored as `BIGINT`.
    pub fn to_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Fingerprint(value as u64)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A previously seen posting within the Hamming threshold of a query fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearDuplicate {
    pub posting_id: String,
    pub distance: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Simhash
// ────────────────────────────────────────────────────────────────────────────

/// Lowercases, drops boilerplate lines, strips markdown and punctuation, and collapses
/// whitespace. `+` and `#` survive so `c++` and `c#` stay distinct from `c`.
pub fn normalize(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();

    for line in text.lines() {
        let line = line.to_lowercase();
        if BOILERPLATE_MARKERS.iter().any(|m| line.contains(m)) {
            continue;
        }
        let cleaned: String = line
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '+' || c == '#' {
                    c
                } else {
                    ' '
                }
            })
            .collect();
        words.extend(cleaned.split_whitespace().map(str::to_string));
    }

    words.join(" ")
}

/// Word unigrams and bigrams weighted by frequency.
fn features(normalized: &str) -> BTreeMap<String, i64> {
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();

    for token in &tokens {
        *counts.entry((*token).to_string()).or_default() += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_default() += 1;
    }

    counts
}

fn feature_hash(feature: &str) -> u64 {
    let digest = Sha256::digest(feature.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Computes the simhash fingerprint of a description. Empty or all-boilerplate text
/// yields `Fingerprint(0)`.
pub fn fingerprint(text: &str) -> Fingerprint {
    let normalized = normalize(text);
    let mut weights = [0i64; 64];

    for (feature, weight) in features(&normalized) {
        let hash = feature_hash(&feature);
        for (bit, acc) in weights.iter_mut().enumerate() {
            if (hash >> bit) & 1 == 1 {
                *acc += weight;
            } else {
                *acc -= weight;
            }
        }
    }

    let bits = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit));

    Fingerprint(bits)
}

/// Linear near-duplicate check, fine for small sets.
pub fn is_duplicate(fp: Fingerprint, existing: &[Fingerprint], hamming_threshold: u32) -> bool {
    existing
        .iter()
        .any(|other| fp.hamming_distance(*other) <= hamming_threshold)
}

// ────────────────────────────────────────────────────────────────────────────
// Banded index
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Band {
    offset: u32,
    mask: u64,
}

impl Band {
    fn key(&self, fp: Fingerprint) -> u64 {
        (fp.0 >> self.offset) & self.mask
    }
}

/// Splits 64 bits into `count` contiguous bands whose widths differ by at most one.
fn build_bands(count: u32) -> Vec<Band> {
    let count = count.clamp(1, 64);
    let base = 64 / count;
    let extra = 64 % count;
    let mut offset = 0;
    let mut bands = Vec::with_capacity(count as usize);

    for i in 0..count {
        let width = base + u32::from(i < extra);
        let mask = if width == 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        bands.push(Band { offset, mask });
        offset += width;
    }

    bands
}

/// In-memory index of accepted fingerprints.
///
/// With `threshold + 1` bands, two fingerprints within `threshold` bits of each other
/// must agree exactly on at least one band, so only band collisions are verified.
#[derive(Debug, Clone)]
pub struct FingerprintIndex {
    threshold: u32,
    bands: Vec<Band>,
    buckets: Vec<HashMap<u64, Vec<usize>>>,
    entries: Vec<(String, Fingerprint)>,
}

impl FingerprintIndex {
    pub fn new(threshold: u32) -> Self {
        let bands = build_bands(threshold + 1);
        let buckets = vec![HashMap::new(); bands.len()];
        Self {
            threshold,
            bands,
            buckets,
            entries: Vec::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, posting_id: impl Into<String>, fp: Fingerprint) {
        let slot = self.entries.len();
        self.entries.push((posting_id.into(), fp));
        for (band, bucket) in self.bands.iter().zip(self.buckets.iter_mut()) {
            bucket.entry(band.key(fp)).or_default().push(slot);
        }
    }

    /// Returns the closest indexed posting within the threshold, ignoring `exclude`
    /// (a posting never duplicates itself). Ties go to the earliest inserted posting.
    pub fn find_near_duplicate(
        &self,
        fp: Fingerprint,
        exclude: Option<&str>,
    ) -> Option<NearDuplicate> {
        let mut checked: HashSet<usize> = HashSet::new();
        let mut best: Option<(u32, usize)> = None;

        for (band, bucket) in self.bands.iter().zip(&self.buckets) {
            let Some(slots) = bucket.get(&band.key(fp)) else {
                continue;
            };
            for &slot in slots {
                if !checked.insert(slot) {
                    continue;
                }
                let (id, other) = &self.entries[slot];
                if exclude == Some(id.as_str()) {
                    continue;
                }
                let distance = fp.hamming_distance(*other);
                if distance > self.threshold {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((d, s)) => distance < d || (distance == d && slot < s),
                };
                if better {
                    best = Some((distance, slot));
                }
            }
        }

        best.map(|(distance, slot)| NearDuplicate {
            posting_id: self.entries[slot].0.clone(),
            distance,
        })
    }
}
