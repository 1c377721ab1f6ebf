use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use kmer_caller::cli::io::{FastaReader, Record};
use kmer_caller::cli::opts::Cli;
use kmer_caller::engine::frame::process_request;
use kmer_caller::engine::names::load_index;
use kmer_caller::engine::session::{Session, SessionConfig};
use kmer_caller::engine::table::SignatureTable;
use kmer_caller::server::{serve, Shared};

fn main() {
    // Ensures tempfile has time to clean up before the process exits.
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if cli.write_table {
        return build_table(&cli);
    }

    let table_path = cli.data_dir.join("kmer.table.mem_map");
    let table = SignatureTable::load(&table_path)
        .with_context(|| format!("loading {:?}", table_path))?;
    let function_names = load_names(&cli.data_dir, "function.index")?;
    // otu.index is loaded to validate the data directory's contract even
    // though OTU-COUNTS reports indices only; kept for parity with the
    // function.index load and to catch a malformed directory up front.
    let _otu_names = load_names(&cli.data_dir, "otu.index")?;

    let defaults = cli.session.to_session_config(cli.hits_only);

    if let Some(port) = cli.listen {
        let shared = Arc::new(Shared {
            table,
            function_names,
            defaults,
            parent_pid: cli.parent_pid,
        });
        return serve(port, cli.port_file.as_deref(), shared);
    }

    run_pipe_mode(table, function_names, defaults)
}

fn build_table(cli: &Cli) -> Result<()> {
    let start = Instant::now();
    let kmers_path = cli.data_dir.join("final.kmers");
    let file = File::open(&kmers_path).with_context(|| format!("opening {:?}", kmers_path))?;
    let reader = BufReader::new(file);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} loaded {pos} k-mers [{elapsed_precise}]")
            .unwrap(),
    );

    println!("Start: building signature table from {:?}", kmers_path);
    let table = SignatureTable::build(reader, cli.hash_size, Some(&pb))?;
    pb.finish_with_message("done");

    let out_path = cli.data_dir.join("kmer.table.mem_map");
    table.persist(&out_path)?;
    println!("Wrote {:?} ({} entries capacity)", out_path, table.capacity());
    println!("Elapsed: {:.2?}", start.elapsed());
    Ok(())
}

fn load_names(data_dir: &std::path::Path, file_name: &str) -> Result<Vec<String>> {
    let path = data_dir.join(file_name);
    let file = File::open(&path).with_context(|| format!("opening {:?}", path))?;
    load_index(BufReader::new(file), file_name)
}

fn run_pipe_mode(table: SignatureTable, function_names: Vec<String>, defaults: SessionConfig) -> Result<()> {
    let stdin = io::stdin();
    let mut reader = FastaReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut session = Session::new(defaults);

    loop {
        match reader.next_record()? {
            Some(Record::Sequence { id, seq }) => {
                process_request(&id, &seq, &table, &function_names, &mut session, &mut out)?;
            }
            Some(Record::Flush) => {
                writeln!(out, "//")?;
            }
            None => break,
        }
    }
    Ok(())
}
