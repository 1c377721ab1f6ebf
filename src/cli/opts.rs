use std::path::PathBuf;

use clap::Parser;

/// Command-line options for the k-mer signature caller.
#[derive(Debug, Parser)]
#[command(
    name = "kmer_caller",
    about = "Annotate DNA/amino-acid sequences against a k-mer signature dictionary",
    long_about = "Annotate DNA/amino-acid sequences against a k-mer signature dictionary.

EXAMPLES:
    // Build the mem-mapped table from final.kmers
    $ kmer_caller -D <data-dir> -w -s 100000007

    // Serve requests over TCP
    $ kmer_caller -D <data-dir> -l 0 -L port.txt

    // Annotate from stdin, amino-acid input
    $ kmer_caller -D <data-dir> -a < proteins.fasta
    ",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Data directory containing function.index, otu.index, final.kmers
    /// and/or kmer.table.mem_map [path]
    #[clap(short = 'D', long = "data-dir", value_parser, required = true, help_heading = "Core")]
    pub data_dir: PathBuf,

    /// Build mode: read final.kmers from the data directory and write
    /// kmer.table.mem_map [flag]
    #[clap(short = 'w', long = "write-table", help_heading = "Core")]
    pub write_table: bool,

    /// Initial hash table capacity in entries, used only when building
    /// [integer]
    #[clap(short = 's', long = "hash-size", default_value_t = 1_000_003, help_heading = "Core")]
    pub hash_size: u64,

    /// Emit only HIT lines, suppressing CALL/OTU-COUNTS/TRANSLATION/
    /// PROTEIN-ID and the OK acknowledgment [flag]
    #[clap(short = 'H', long = "hits-only", help_heading = "Core")]
    pub hits_only: bool,

    /// Listen on PORT for TCP connections (0 = ephemeral port); omit for
    /// pipe mode [integer]
    #[clap(short = 'l', long = "listen", help_heading = "Server")]
    pub listen: Option<u16>,

    /// Write the chosen listen port to FILE [path]
    #[clap(short = 'L', long = "port-file", value_parser, requires = "listen", help_heading = "Server")]
    pub port_file: Option<PathBuf>,

    /// Exit if the parent process with this PID disappears, checked at
    /// each accept() [integer]
    #[clap(short = 'P', long = "parent-pid", help_heading = "Server")]
    pub parent_pid: Option<i32>,
}

/// The subset of options a server client may override per connection via
/// a leading `-...` option line. Reused both as a flattened piece of
/// [`Cli`] and, independently, as the per-connection option-line parser
/// (see `kmer_caller::server`).
#[derive(Debug, Clone, Parser)]
pub struct SessionArgs {
    /// Treat input as amino-acid sequence: single frame, no translation
    /// [flag]
    #[clap(short = 'a', long = "aa", help_heading = "Core")]
    pub aa: bool,

    /// Debug verbosity; >= 1 emits HIT lines [integer]
    #[clap(short = 'd', long = "debug", default_value_t = 0, help_heading = "Core")]
    pub debug: u32,

    /// Minimum hits of one function required to emit a CALL [integer]
    #[clap(short = 'm', long = "min-hits", default_value_t = 5, help_heading = "Grouper")]
    pub min_hits: usize,

    /// Minimum summed hit weight required to emit a CALL [float]
    #[clap(short = 'M', long = "min-weighted-hits", default_value_t = 0.0, help_heading = "Grouper")]
    pub min_weighted_hits: f32,

    /// Require positional coherence between consecutive same-function
    /// hits [flag]
    #[clap(short = 'O', long = "order-constraint", help_heading = "Grouper")]
    pub order_constraint: bool,

    /// Maximum gap, in residues, between consecutive hits before the
    /// buffer is flushed [integer]
    #[clap(short = 'g', long = "max-gap", default_value_t = 200, help_heading = "Grouper")]
    pub max_gap: u32,
}

impl Default for SessionArgs {
    fn default() -> Self {
        SessionArgs {
            aa: false,
            debug: 0,
            min_hits: 5,
            min_weighted_hits: 0.0,
            order_constraint: false,
            max_gap: 200,
        }
    }
}

impl SessionArgs {
    pub fn to_session_config(&self, hits_only: bool) -> crate::engine::session::SessionConfig {
        crate::engine::session::SessionConfig {
            aa: self.aa,
            debug: self.debug,
            hits_only,
            min_hits: self.min_hits,
            min_weighted_hits: self.min_weighted_hits,
            order_constraint: self.order_constraint,
            max_gap: self.max_gap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_core_flags() {
        let cli = Cli::parse_from(["kmer_caller", "-D", "/data", "-a", "-m", "1", "-g", "50"]);
        assert!(cli.session.aa);
        assert_eq!(cli.session.min_hits, 1);
        assert_eq!(cli.session.max_gap, 50);
        assert_eq!(cli.data_dir, PathBuf::from("/data"));
    }

    #[test]
    fn session_args_parse_standalone_for_option_lines() {
        let words = ["session", "-a", "-d", "2", "-O"];
        let sa = SessionArgs::try_parse_from(words).unwrap();
        assert!(sa.aa);
        assert_eq!(sa.debug, 2);
        assert!(sa.order_constraint);
    }

    #[test]
    fn session_args_reject_malformed_line() {
        let words = ["session", "--not-a-real-flag"];
        assert!(SessionArgs::try_parse_from(words).is_err());
    }
}
