//! Item identity and the lattice-style matching rule.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hash algorithms known to the matching rule. Legacy tag values are the
/// ones the container format uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub const MD5_LEGACY_TAG: u32 = 32771;
    pub const SHA256_LEGACY_TAG: u32 = 32780;

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha256 => 32,
        }
    }

    pub fn from_legacy_tag(tag: u32) -> Option<Self> {
        match tag {
            Self::MD5_LEGACY_TAG => Some(HashAlgorithm::Md5),
            Self::SHA256_LEGACY_TAG => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn legacy_tag(self) -> u32 {
        match self {
            HashAlgorithm::Md5 => Self::MD5_LEGACY_TAG,
            HashAlgorithm::Sha256 => Self::SHA256_LEGACY_TAG,
        }
    }
}

/// Outcome of comparing two items under the identity-matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    Uncertain,
    NoMatch,
}

/// The fields shared across every `with_*` refinement of an item, kept
/// behind an `Arc` so builder chains don't repeatedly clone digests.
#[derive(Debug, PartialEq, Eq)]
struct ItemInner {
    length: u64,
    name: Option<String>,
    hashes: BTreeMap<HashAlgorithm, Vec<u8>>,
}

/// Immutable, content-addressed item identity. Cheap to clone: the
/// payload is shared through an `Arc`.
#[derive(Debug, Clone)]
pub struct Item {
    inner: Arc<ItemInner>,
}

impl Item {
    pub fn new(length: u64) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                length,
                name: None,
                hashes: BTreeMap::new(),
            }),
        }
    }

    /// Returns a new item identical to `self` but with `hash` recorded
    /// under `algorithm`, replacing any previous digest for that algorithm.
    pub fn with_hash(&self, algorithm: HashAlgorithm, digest: Vec<u8>) -> Self {
        let mut hashes = self.inner.hashes.clone();
        hashes.insert(algorithm, digest);
        Self {
            inner: Arc::new(ItemInner {
                length: self.inner.length,
                name: self.inner.name.clone(),
                hashes,
            }),
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                length: self.inner.length,
                name: Some(name.into()),
                hashes: self.inner.hashes.clone(),
            }),
        }
    }

    pub fn length(&self) -> u64 {
        self.inner.length
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&[u8]> {
        self.inner.hashes.get(&algorithm).map(Vec::as_slice)
    }

    pub fn has_matching_hash(&self, algorithm: HashAlgorithm, digest: &[u8]) -> bool {
        self.hash(algorithm) == Some(digest)
    }

    /// Compares two items independent of `name`: equal length and at least
    /// one shared algorithm with agreeing digests is a match; a shared
    /// algorithm with disagreeing digests, or different lengths, is a
    /// no-match; no shared algorithm at all is uncertain.
    pub fn matches(&self, other: &Item) -> MatchResult {
        if self.inner.length != other.inner.length {
            return MatchResult::NoMatch;
        }

        let mut shared_any = false;
        for (algorithm, digest) in &self.inner.hashes {
            if let Some(other_digest) = other.inner.hashes.get(algorithm) {
                shared_any = true;
                if digest != other_digest {
                    return MatchResult::NoMatch;
                }
            }
        }

        if shared_any {
            MatchResult::Match
        } else {
            MatchResult::Uncertain
        }
    }

    /// Sort key: length, then the lexicographic order of `(algorithm,
    /// digest)` pairs sorted by algorithm — the total order used when an
    /// item is a map key (cookbook/pantry).
    fn sort_key(&self) -> (u64, Vec<(HashAlgorithm, &[u8])>, Option<&str>) {
        let hashes = self
            .inner
            .hashes
            .iter()
            .map(|(a, d)| (*a, d.as_slice()))
            .collect();
        (self.inner.length, hashes, self.name())
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_length_no_hashes_is_uncertain() {
        let a = Item::new(10);
        let b = Item::new(10);
        assert_eq!(a.matches(&b), MatchResult::Uncertain);
    }

    #[test]
    fn different_length_is_no_match_regardless_of_hashes() {
        let a = Item::new(10).with_hash(HashAlgorithm::Sha256, vec![1; 32]);
        let b = Item::new(11).with_hash(HashAlgorithm::Sha256, vec![1; 32]);
        assert_eq!(a.matches(&b), MatchResult::NoMatch);
    }

    #[test]
    fn agreeing_hash_under_shared_algorithm_is_a_match() {
        let a = Item::new(10).with_hash(HashAlgorithm::Sha256, vec![7; 32]);
        let b = Item::new(10).with_hash(HashAlgorithm::Sha256, vec![7; 32]);
        assert_eq!(a.matches(&b), MatchResult::Match);
    }

    #[test]
    fn disagreeing_hash_under_shared_algorithm_is_no_match() {
        let a = Item::new(10).with_hash(HashAlgorithm::Sha256, vec![7; 32]);
        let b = Item::new(10).with_hash(HashAlgorithm::Sha256, vec![8; 32]);
        assert_eq!(a.matches(&b), MatchResult::NoMatch);
    }

    #[test]
    fn adding_a_hash_never_downgrades_a_match() {
        // Adding a hash to an item must never turn a match against its prior self into a no-match.
        let x = Item::new(5);
        let with_hash = x.with_hash(HashAlgorithm::Md5, vec![0; 16]);
        assert_ne!(with_hash.matches(&x), MatchResult::NoMatch);
    }

    #[test]
    fn matching_is_independent_of_name() {
        let a = Item::new(3)
            .with_hash(HashAlgorithm::Md5, vec![1; 16])
            .with_name("left");
        let b = Item::new(3)
            .with_hash(HashAlgorithm::Md5, vec![1; 16])
            .with_name("right");
        assert_eq!(a.matches(&b), MatchResult::Match);
    }

    #[test]
    fn ordering_is_total_and_usable_as_a_map_key() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(Item::new(1), "one");
        map.insert(Item::new(2), "two");
        assert_eq!(map.get(&Item::new(1)), Some(&"one"));
    }

    #[test]
    fn has_matching_hash_checks_algorithm_and_digest() {
        let item = Item::new(4).with_hash(HashAlgorithm::Sha256, vec![9; 32]);
        assert!(item.has_matching_hash(HashAlgorithm::Sha256, &[9; 32]));
        assert!(!item.has_matching_hash(HashAlgorithm::Sha256, &[8; 32]));
        assert!(!item.has_matching_hash(HashAlgorithm::Md5, &[9; 16]));
    }
}
