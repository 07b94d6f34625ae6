// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

/// K-mer length used to seed candidate alignment positions.
pub(crate) const KMER_SIZE: usize = 6;

const NUM_KMERS: usize = 1 << (2 * KMER_SIZE);

fn encode_base(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Perfect hashes of all k-mers of a sequence, indexed by start position.
/// K-mers containing ambiguous bases hash to `None`.
pub(crate) fn kmer_hashes(sequence: &[u8]) -> Vec<Option<usize>> {
    if sequence.len() < KMER_SIZE {
        return Vec::new();
    }
    let mut result = Vec::with_capacity(sequence.len() - KMER_SIZE + 1);
    for window in sequence.windows(KMER_SIZE) {
        let mut hash = 0usize;
        let mut valid = true;
        for &base in window {
            match encode_base(base) {
                Some(code) => hash = (hash << 2) | code,
                None => {
                    valid = false;
                    break;
                }
            }
        }
        result.push(if valid { Some(hash) } else { None });
    }
    result
}

/// A perfect-hash k-mer index over a target sequence, rebuilt once per
/// haplotype.
pub(crate) struct KmerIndex {
    positions: Vec<Vec<u32>>,
}

impl KmerIndex {
    pub(crate) fn build(sequence: &[u8]) -> Self {
        let mut positions = vec![Vec::new(); NUM_KMERS];
        for (pos, hash) in kmer_hashes(sequence).into_iter().enumerate() {
            if let Some(hash) = hash {
                positions[hash].push(pos as u32);
            }
        }
        KmerIndex { positions }
    }

    fn hits(&self, hash: usize) -> &[u32] {
        &self.positions[hash]
    }
}

/// Map a query onto the index and return the most supported candidate start
/// positions of the query within the target, best first. Each query k-mer
/// votes for the target position it implies; all positions sharing the
/// maximal vote count are returned, capped at `max_positions`.
pub(crate) fn map_query_to_target(
    query_hashes: &[Option<usize>],
    index: &KmerIndex,
    max_positions: usize,
) -> Vec<usize> {
    use std::collections::HashMap;

    let mut votes: HashMap<usize, u32> = HashMap::new();
    for (offset, hash) in query_hashes.iter().enumerate() {
        if let Some(hash) = *hash {
            for &pos in index.hits(hash) {
                if pos as usize >= offset {
                    *votes.entry(pos as usize - offset).or_insert(0) += 1;
                }
            }
        }
    }
    let best = match votes.values().max() {
        Some(&best) => best,
        None => return Vec::new(),
    };
    let mut result: Vec<usize> = votes
        .into_iter()
        .filter_map(|(pos, count)| if count == best { Some(pos) } else { None })
        .collect();
    result.sort_unstable();
    result.truncate(max_positions);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_substring_maps_to_offset() {
        let target = b"ACGTACGTTTGCAGGAAT";
        let index = KmerIndex::build(target);
        let query = &target[5..15];
        let positions = map_query_to_target(&kmer_hashes(query), &index, 10);
        assert_eq!(positions, vec![5]);
    }

    #[test]
    fn test_mismatch_still_anchors() {
        let target = b"ACGTACGTTTGCAGGAAT";
        let index = KmerIndex::build(target);
        let mut query = target[5..15].to_vec();
        query[9] = b'C';
        let positions = map_query_to_target(&kmer_hashes(&query), &index, 10);
        assert_eq!(positions, vec![5]);
    }

    #[test]
    fn test_ambiguous_bases_do_not_vote() {
        let hashes = kmer_hashes(b"ACGTNACGT");
        assert!(hashes[0].is_none()); // covers the N
        assert!(hashes.iter().any(|h| h.is_none()));
    }

    #[test]
    fn test_unmappable_query() {
        let index = KmerIndex::build(b"ACGTACGTTTGCAGGAAT");
        let positions = map_query_to_target(&kmer_hashes(b"CCCCCCCCCC"), &index, 10);
        assert!(positions.is_empty());
    }
}
