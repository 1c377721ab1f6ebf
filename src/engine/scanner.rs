//! Streaming residue scanner: walks a translated protein with a rolling
//! encoded key and reports raw table hits in arrival order. This is the
//! lookup/advance loop only; hit grouping into CALLs lives in
//! [`super::grouper`].

use super::alphabet::{advance_past_ambiguous, encode_kmer, roll, K};
use super::table::SignatureTable;

/// A single table hit at a given protein offset, ordered by
/// `from0_in_prot` ascending by construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawHit {
    pub from0_in_prot: u32,
    pub encoded_kmer: u64,
    pub avg_off_from_end: u16,
    pub function_index: i32,
    pub otu_index: i32,
    pub function_weight: f32,
}

/// Walk `residues` (amino-acid indices, 0..=19 valid, 20 ambiguous) and
/// invoke `on_hit` for every table hit, in ascending position order.
pub fn scan(residues: &[u8], table: &SignatureTable, mut on_hit: impl FnMut(RawHit)) {
    let len = residues.len();
    if len < K {
        return;
    }
    let bound = len - K + 1; // one past the last valid window start

    let mut p = advance_past_ambiguous(residues, 0, bound);
    if p >= bound {
        return;
    }
    let mut enc = encode_kmer(&residues[p..p + K]);

    loop {
        if let Some(entry) = table.lookup(enc) {
            on_hit(RawHit {
                from0_in_prot: p as u32,
                encoded_kmer: enc,
                avg_off_from_end: entry.avg_from_end,
                function_index: entry.function_index,
                otu_index: entry.otu_index,
                function_weight: entry.function_weight,
            });
        }

        p += 1;
        if p >= bound {
            break;
        }
        let rightmost = residues[p + K - 1];
        if rightmost < 20 {
            enc = roll(enc, rightmost);
        } else {
            p += K;
            p = advance_past_ambiguous(residues, p, bound);
            if p >= bound {
                break;
            }
            enc = encode_kmer(&residues[p..p + K]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::table::SignatureTable;
    use crate::engine::translate::translate;
    use std::io::Cursor;

    fn one_entry_table() -> SignatureTable {
        let line = if K == 8 {
            "MKTAYIAK\t12\t7\t1.0\t3\n"
        } else {
            "MKTAY\t12\t7\t1.0\t3\n"
        };
        SignatureTable::build(Cursor::new(line), 101, None).unwrap()
    }

    #[test]
    fn scan_finds_repeated_hit() {
        let table = one_entry_table();
        let dna = if K == 8 {
            b"ATGAAAACGGCGTACATCGCGAAAATGAAAACGGCGTACATCGCGAAA".to_vec()
        } else {
            b"ATGAAAACGGCGTACATGAAAACGGCGTAC".to_vec()
        };
        let t = translate(&dna, 0);
        let mut positions = Vec::new();
        scan(&t.residues, &table, |h| positions.push(h.from0_in_prot));
        assert_eq!(positions.len(), 2);
        assert!(positions[1] > positions[0]);
    }

    #[test]
    fn scan_skips_ambiguous_windows() {
        let table = one_entry_table();
        // Protein with an 'X' run that must be jumped over cleanly.
        let mut residues = vec![20u8; K + 20];
        // plant a real window after the ambiguous run
        let good: Vec<u8> = if K == 8 {
            "MKTAYIAK".bytes().map(crate::engine::alphabet::to_amino_acid_off).collect()
        } else {
            "MKTAY".bytes().map(crate::engine::alphabet::to_amino_acid_off).collect()
        };
        residues[K + 5..K + 5 + K].copy_from_slice(&good);
        let mut hits = 0;
        scan(&residues, &table, |_| hits += 1);
        assert_eq!(hits, 1);
    }

    #[test]
    fn scan_on_short_protein_is_noop() {
        let table = one_entry_table();
        let residues = vec![0u8; K - 1];
        let mut hits = 0;
        scan(&residues, &table, |_| hits += 1);
        assert_eq!(hits, 0);
    }
}
