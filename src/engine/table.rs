//! The signature k-mer table: an open-addressed, linear-probe hash of
//! encoded k-mer -> (function, OTU, positional offset, weight), persisted
//! as a host-endian memory-mapped binary image.
//!
//! Entries are fixed-size packed records with one authoritative layout,
//! probed and validated the way `find_empty_hash_entry` / `lookup_hash_entry`
//! / `init_kmers` do it. The on-disk image carries a small `TableHeader`
//! ahead of the entry array so a loaded image can be validated instead of
//! trusted blindly.

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use super::alphabet::{encode_kmer, to_amino_acid_off, CORE, K};

/// Sentinel `encoded_kmer` marking an empty slot. Any value `>= CORE` also
/// denotes empty; this is the canonical one written at build time.
pub const EMPTY: u64 = CORE + 1;

/// One signature entry, laid out with no implicit padding so the struct can
/// be reinterpreted directly as mmap bytes (`bytemuck::Pod`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SigEntry {
    pub encoded_kmer: u64,
    pub function_weight: f32,
    pub otu_index: i32,
    pub function_index: i32,
    pub avg_from_end: u16,
    _pad: u16,
}

impl SigEntry {
    fn empty() -> Self {
        SigEntry {
            encoded_kmer: EMPTY,
            function_weight: 0.0,
            otu_index: 0,
            function_index: 0,
            avg_from_end: 0,
            _pad: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.encoded_kmer >= CORE
    }
}

pub const ENTRY_SIZE: usize = std::mem::size_of::<SigEntry>();

/// File header preceding the entry array. Version 1 is the only format
/// this crate understands.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct TableHeader {
    num_sigs: u64,
    entry_size: u64,
    version: i64,
}

const HEADER_SIZE: usize = std::mem::size_of::<TableHeader>();
const FORMAT_VERSION: i64 = 1;

/// Backing storage for a loaded signature table: either a growable owned
/// buffer (build path, before it's written out) or a read-only mmap.
enum Storage {
    Owned(Vec<SigEntry>),
    Mapped(Mmap),
}

/// The signature table: capacity `S` entries, at most `S/2 - 1` occupied.
/// Immutable after construction and safely `Send + Sync` for sharing across
/// connection threads.
pub struct SignatureTable {
    storage: Storage,
    capacity: u64,
}

// SAFETY: `Mmap` is itself Send+Sync when opened read-only and never
// written through this handle; `Vec<SigEntry>` is Send+Sync because
// SigEntry has no interior mutability.
unsafe impl Sync for SignatureTable {}
unsafe impl Send for SignatureTable {}

impl SignatureTable {
    fn entries(&self) -> &[SigEntry] {
        match &self.storage {
            Storage::Owned(v) => v,
            Storage::Mapped(m) => {
                let body = &m[HEADER_SIZE..];
                bytemuck::cast_slice(body)
            }
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Look up an encoded k-mer. Returns the matching entry, or `None` if
    /// the probe chain reaches an empty slot first.
    pub fn lookup(&self, encoded: u64) -> Option<&SigEntry> {
        let entries = self.entries();
        let cap = self.capacity as usize;
        let mut idx = (encoded % self.capacity) as usize;
        loop {
            let e = &entries[idx];
            if e.encoded_kmer == encoded {
                return Some(e);
            }
            if e.is_empty() {
                return None;
            }
            idx += 1;
            if idx == cap {
                idx = 0;
            }
        }
    }

    /// Build a table from `final.kmers`-formatted lines:
    /// `KMER\tavg_from_end\tfunction_index\tweight\totu_index` (>= 4 fields
    /// required; `otu_index` defaults to 0 when the 5th field is absent).
    pub fn build<R: BufRead>(reader: R, capacity: u64, progress: Option<&indicatif::ProgressBar>) -> Result<Self> {
        ensure!(capacity > 0, "hash capacity must be positive");
        let mut entries = vec![SigEntry::empty(); capacity as usize];
        let mut loaded: u64 = 0;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("reading final.kmers line {}", lineno + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 {
                bail!(
                    "final.kmers line {} has {} fields, need >= 4",
                    lineno + 1,
                    fields.len()
                );
            }
            let kmer_str = fields[0];
            ensure!(
                kmer_str.len() == K,
                "final.kmers line {}: kmer {:?} is not {} residues long",
                lineno + 1,
                kmer_str,
                K
            );
            let avg_from_end: u16 = fields[1]
                .parse()
                .with_context(|| format!("final.kmers line {}: bad avg_from_end", lineno + 1))?;
            let function_index: i32 = fields[2]
                .parse()
                .with_context(|| format!("final.kmers line {}: bad function_index", lineno + 1))?;
            let weight: f32 = fields[3]
                .parse()
                .with_context(|| format!("final.kmers line {}: bad weight", lineno + 1))?;
            let otu_index: i32 = if fields.len() >= 5 {
                fields[4]
                    .parse()
                    .with_context(|| format!("final.kmers line {}: bad otu_index", lineno + 1))?
            } else {
                0
            };

            let mut window = [0u8; K];
            for (i, b) in kmer_str.bytes().enumerate() {
                let off = to_amino_acid_off(b);
                ensure!(
                    off < 20,
                    "final.kmers line {}: kmer {:?} has a non-residue character",
                    lineno + 1,
                    kmer_str
                );
                window[i] = off;
            }
            let encoded = encode_kmer(&window);

            let slot = find_empty_slot(&entries, encoded, capacity)?;
            loaded += 1;
            if loaded >= capacity / 2 {
                bail!("hash half-full; use -s (and -w) to bump the hash capacity");
            }
            entries[slot] = SigEntry {
                encoded_kmer: encoded,
                function_weight: weight,
                otu_index,
                function_index,
                avg_from_end,
                _pad: 0,
            };
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        Ok(SignatureTable {
            storage: Storage::Owned(entries),
            capacity,
        })
    }

    /// Write the table to `path` as header + entry array, via a temp file
    /// in the same directory renamed into place, so a reader never observes
    /// a partially-written image.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let entries = match &self.storage {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mapped(_) => bail!("cannot persist a table that was loaded from mmap"),
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("creating temp file for kmer.table.mem_map")?;

        let header = TableHeader {
            num_sigs: self.capacity,
            entry_size: ENTRY_SIZE as u64,
            version: FORMAT_VERSION,
        };
        tmp.write_all(bytemuck::bytes_of(&header))
            .context("writing table header")?;
        tmp.write_all(bytemuck::cast_slice(entries))
            .context("writing table entries")?;
        tmp.flush().context("flushing table file")?;
        tmp.persist(path)
            .with_context(|| format!("persisting table to {:?}", path))?;
        Ok(())
    }

    /// Map `path` read-only and validate the header against this build's
    /// expected format and entry size.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("stat {:?}", path))?
            .len();
        ensure!(
            file_len >= HEADER_SIZE as u64,
            "{:?} is smaller than the table header",
            path
        );

        // SAFETY: the file is opened read-only and not concurrently
        // truncated/resized by this process; mmap lifetime is tied to the
        // returned SignatureTable.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {:?}", path))?;
        #[cfg(unix)]
        let _ = mmap.advise(memmap2::Advice::WillNeed);

        let header: TableHeader = *bytemuck::from_bytes(&mmap[..HEADER_SIZE]);
        ensure!(
            header.version == FORMAT_VERSION,
            "{:?}: unsupported table version {} (expected {})",
            path,
            header.version,
            FORMAT_VERSION
        );
        ensure!(
            header.entry_size == ENTRY_SIZE as u64,
            "{:?}: entry_size {} does not match this build's {} \
             (built with a different K or on a different architecture?)",
            path,
            header.entry_size,
            ENTRY_SIZE
        );
        let expected_len = HEADER_SIZE as u64 + header.num_sigs * header.entry_size;
        ensure!(
            file_len == expected_len,
            "{:?}: file size {} does not match header (expected {})",
            path,
            file_len,
            expected_len
        );

        Ok(SignatureTable {
            storage: Storage::Mapped(mmap),
            capacity: header.num_sigs,
        })
    }
}

fn find_empty_slot(entries: &[SigEntry], encoded: u64, capacity: u64) -> Result<usize> {
    let cap = capacity as usize;
    let mut idx = (encoded % capacity) as usize;
    let start = idx;
    loop {
        if entries[idx].is_empty() {
            return Ok(idx);
        }
        idx += 1;
        if idx == cap {
            idx = 0;
        }
        if idx == start {
            bail!("hash table has no empty slot (capacity too small)");
        }
    }
}
