//! Function and OTU name tables: `index\tname` lines, loaded into a dense
//! `Vec<String>` indexed directly by the record's `function_index` /
//! `otu_index`.

use std::io::BufRead;

use anyhow::{bail, Context, Result};

/// Load a dense `index\tname` table. Indices must appear exactly once each,
/// covering `0..N` with no gaps — any violation is a hard error rather than
/// a silently sparse or reordered table, since callers index this `Vec`
/// directly by `function_index`/`otu_index` with no further bounds story.
pub fn load_index<R: BufRead>(reader: R, label: &str) -> Result<Vec<String>> {
    let mut slots: Vec<Option<String>> = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {} line {}", label, lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, '\t');
        let idx_str = parts.next().unwrap_or("");
        let name = parts.next().unwrap_or("").to_string();
        let idx: usize = idx_str
            .parse()
            .with_context(|| format!("{} line {}: bad index {:?}", label, lineno + 1, idx_str))?;

        if idx >= slots.len() {
            slots.resize(idx + 1, None);
        }
        if slots[idx].is_some() {
            bail!("{} line {}: duplicate index {}", label, lineno + 1, idx);
        }
        slots[idx] = Some(name);
    }

    let mut names = Vec::with_capacity(slots.len());
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(name) => names.push(name),
            None => bail!("{}: index {} is missing (indices must be dense from 0)", label, idx),
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn loads_dense_table_in_order() {
        let data = "0\tunknown function\n1\tABC transporter\n2\tDNA polymerase\n";
        let names = load_index(Cursor::new(data), "function.index").unwrap();
        assert_eq!(names, vec!["unknown function", "ABC transporter", "DNA polymerase"]);
    }

    #[test]
    fn tolerates_out_of_order_lines() {
        let data = "2\tDNA polymerase\n0\tunknown function\n1\tABC transporter\n";
        let names = load_index(Cursor::new(data), "function.index").unwrap();
        assert_eq!(names[0], "unknown function");
        assert_eq!(names[2], "DNA polymerase");
    }

    #[test]
    fn rejects_gap_in_indices() {
        let data = "0\tfoo\n2\tbar\n";
        assert!(load_index(Cursor::new(data), "function.index").is_err());
    }

    #[test]
    fn rejects_duplicate_index() {
        let data = "0\tfoo\n0\tbar\n";
        assert!(load_index(Cursor::new(data), "function.index").is_err());
    }
}
