//! FASTA request framing: a streaming reader that turns a byte stream of
//! `>ID rest\n` records into discrete requests, recognizing a `FLUSH`
//! header as a batch delimiter.

use std::io::BufRead;

use anyhow::{Context, Result};

/// Maximum length of a captured record ID.
pub const MAX_ID_LEN: usize = 2000;

/// One frame of the request stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Record {
    /// A sequence record: ID token plus its uppercased, whitespace-free bytes.
    Sequence { id: String, seq: Vec<u8> },
    /// A `>FLUSH...` header: emit `//` and start a new batch.
    Flush,
}

/// Read one `Record` at a time from `reader`. Returns `Ok(None)` at EOF.
pub struct FastaReader<R> {
    reader: R,
    pending_header: Option<String>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        FastaReader { reader, pending_header: None }
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match self.read_header_line()? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let id = header
            .split_whitespace()
            .next()
            .unwrap_or("")
            .chars()
            .take(MAX_ID_LEN)
            .collect::<String>();

        if id.len() >= 5 && id.as_bytes()[..5].eq_ignore_ascii_case(b"FLUSH") {
            return Ok(Some(Record::Flush));
        }

        let mut seq = Vec::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .context("reading FASTA sequence line")?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if let Some(rest) = trimmed.strip_prefix('>') {
                self.pending_header = Some(rest.to_string());
                break;
            }
            for b in trimmed.bytes() {
                if !b.is_ascii_whitespace() {
                    seq.push(b.to_ascii_uppercase());
                }
            }
        }

        Ok(Some(Record::Sequence { id, seq }))
    }

    fn read_header_line(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .context("reading FASTA header line")?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if let Some(rest) = trimmed.strip_prefix('>') {
                return Ok(Some(rest.to_string()));
            }
            // Ignore stray non-header lines preceding the first record.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_one_sequence_record() {
        let mut r = FastaReader::new(Cursor::new(">seq1 some description\nmktA\nyiak\n"));
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec, Record::Sequence { id: "seq1".to_string(), seq: b"MKTAYIAK".to_vec() });
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn recognizes_flush_marker() {
        let mut r = FastaReader::new(Cursor::new(">seq1\nMKTAYIAK\n>FLUSH\n>seq2\nMKTAYIAK\n"));
        assert!(matches!(r.next_record().unwrap(), Some(Record::Sequence { .. })));
        assert_eq!(r.next_record().unwrap(), Some(Record::Flush));
        assert!(matches!(r.next_record().unwrap(), Some(Record::Sequence { .. })));
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn strips_whitespace_and_uppercases_sequence() {
        let mut r = FastaReader::new(Cursor::new(">x\nmkt a\n  yi ak \n"));
        let rec = r.next_record().unwrap().unwrap();
        match rec {
            Record::Sequence { seq, .. } => assert_eq!(seq, b"MKTAYIAK"),
            _ => panic!("expected a sequence record"),
        }
    }

    #[test]
    fn flush_id_matches_prefix_only() {
        let mut r = FastaReader::new(Cursor::new(">FLUSHbatch1\nACGT\n"));
        assert_eq!(r.next_record().unwrap(), Some(Record::Flush));
    }
}
