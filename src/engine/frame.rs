//! Frame driver: orchestrates six-frame (or single-frame AA) traversal of
//! one request and writes the full ordered record stream for it.

use std::io::Write;

use anyhow::{ensure, Result};

use crate::cli::counters::RequestCounters;

use super::alphabet::reverse_complement;
use super::grouper::Grouper;
use super::scanner::scan;
use super::session::Session;
use super::table::SignatureTable;
use super::translate::{translate, translate_aa, Strand, FORWARD_FRAMES, REVERSE_FRAMES};

/// Hard cap on accepted input length, matching the upstream contract.
pub const MAX_SEQ_LEN: usize = 500_000_000;

/// Process one FASTA-framed request (`id`, raw sequence bytes) to
/// completion, writing the record stream to `out` and updating `session`'s
/// OTU tally and thresholds as configured. Does not emit the trailing
/// `//` marker; that belongs to the caller driving FLUSH framing. Returns
/// debug counters for the caller to fold into a running total.
pub fn process_request(
    id: &str,
    raw: &[u8],
    table: &SignatureTable,
    function_names: &[String],
    session: &mut Session,
    out: &mut impl Write,
) -> Result<RequestCounters> {
    session.start_request();
    let cleaned = clean_uppercase(raw);
    let counters = if session.config.aa {
        process_aa(id, &cleaned, table, function_names, session, out)?
    } else {
        process_dna(id, &cleaned, table, function_names, session, out)?
    };
    emit_otu_counts(id, cleaned.len(), session, out)?;
    Ok(counters)
}

fn clean_uppercase(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|b| b.to_ascii_uppercase())
        .collect()
}

fn process_dna(
    id: &str,
    cleaned: &[u8],
    table: &SignatureTable,
    function_names: &[String],
    session: &mut Session,
    out: &mut impl Write,
) -> Result<RequestCounters> {
    ensure!(cleaned.len() <= MAX_SEQ_LEN, "contig exceeds MAX_SEQ_LEN");

    if !session.config.hits_only {
        writeln!(out, "processing {}[{}]", id, cleaned.len())?;
    }

    let revcomp = reverse_complement(cleaned);
    let mut counters = RequestCounters::default();

    for frame in FORWARD_FRAMES.iter().chain(REVERSE_FRAMES.iter()) {
        let strand_bytes: &[u8] = match frame.strand {
            Strand::Plus => cleaned,
            Strand::Minus => &revcomp,
        };
        let translated = translate(strand_bytes, frame.offset as usize);

        if !session.config.hits_only {
            writeln!(
                out,
                "TRANSLATION\t{}\t{}\t{}\t{}",
                id,
                cleaned.len(),
                frame.strand.as_char(),
                frame.offset
            )?;
        }

        counters += run_frame(&translated.residues, table, function_names, session, out)?;
    }
    Ok(counters)
}

fn process_aa(
    id: &str,
    cleaned: &[u8],
    table: &SignatureTable,
    function_names: &[String],
    session: &mut Session,
    out: &mut impl Write,
) -> Result<RequestCounters> {
    ensure!(cleaned.len() <= MAX_SEQ_LEN, "contig exceeds MAX_SEQ_LEN");

    if !session.config.hits_only {
        writeln!(out, "PROTEIN-ID\t{}\t{}", id, cleaned.len())?;
    }

    let translated = translate_aa(cleaned);
    run_frame(&translated.residues, table, function_names, session, out)
}

/// Scan one frame's residues, grouping hits into CALLs, writing HIT lines
/// (debug >= 1) and CALL lines, and crediting accepted hits' OTUs.
fn run_frame(
    residues: &[u8],
    table: &SignatureTable,
    function_names: &[String],
    session: &mut Session,
    out: &mut impl Write,
) -> Result<RequestCounters> {
    // Scanning and grouping run purely in memory, recording events in
    // arrival order; the actual line-writing loop runs afterward so I/O
    // errors propagate through an ordinary `?` instead of threading a
    // fallible result out of nested FnMut closures.
    enum Event {
        Hit(super::scanner::RawHit),
        Call(super::grouper::CallRecord),
    }

    let mut events: Vec<Event> = Vec::new();
    let mut grouper = Grouper::new(session.config.grouper_config());
    let debug = session.config.debug;
    let hits_only = session.config.hits_only;
    let otu = &mut session.otu;

    let mut hits_seen = 0u64;
    scan(residues, table, |hit| {
        hits_seen += 1;
        if debug >= 1 {
            events.push(Event::Hit(hit));
        }
        grouper.ingest(hit, &mut |call| events.push(Event::Call(call)), otu);
    });
    grouper.finish(&mut |call| events.push(Event::Call(call)), otu);

    let mut calls_emitted = 0u64;
    for event in events {
        match event {
            Event::Hit(hit) => {
                writeln!(
                    out,
                    "HIT\t{}\t{}\t{}\t{}\t{:.3}\t{}",
                    hit.from0_in_prot,
                    hit.encoded_kmer,
                    hit.avg_off_from_end,
                    hit.function_index,
                    hit.function_weight,
                    hit.otu_index
                )?;
            }
            Event::Call(call) if !hits_only => {
                calls_emitted += 1;
                let name = function_names
                    .get(call.function_index as usize)
                    .map(|s| s.as_str())
                    .unwrap_or("unknown");
                writeln!(
                    out,
                    "CALL\t{}\t{}\t{}\t{}\t{}\t{:.6}",
                    call.start, call.end, call.hit_count, call.function_index, name, call.weighted_hits
                )?;
            }
            Event::Call(_) => {}
        }
    }

    let overflow_drops = grouper.overflow_drops();
    if overflow_drops > 0 && debug >= 1 {
        tracing::debug!(overflow_drops, "grouper buffer overflow; extra hits dropped");
    }
    Ok(RequestCounters {
        frames: 1,
        hits_seen,
        calls_emitted,
        grouper_overflow_drops: overflow_drops,
    })
}

fn emit_otu_counts(id: &str, len: usize, session: &mut Session, out: &mut impl Write) -> Result<()> {
    if session.config.hits_only {
        return Ok(());
    }
    let mut line = format!("OTU-COUNTS\t{}[{}]", id, len);
    for entry in session.otu.entries() {
        line.push('\t');
        line.push_str(&format!("{}-{}", entry.count, entry.otu_index));
    }
    writeln!(out, "{}", line)?;
    Ok(())
}
