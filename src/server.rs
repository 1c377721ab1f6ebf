//! The TCP session shim: one OS thread per accepted connection, each with
//! its own mutable [`Session`] against the shared, read-only signature
//! table and name arrays.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::io::{FastaReader, Record};
use crate::cli::opts::SessionArgs;
use crate::engine::frame::process_request;
use crate::engine::session::{Session, SessionConfig};
use crate::engine::table::SignatureTable;

/// Shared, read-only state handed to every connection thread.
pub struct Shared {
    pub table: SignatureTable,
    pub function_names: Vec<String>,
    pub defaults: SessionConfig,
    pub parent_pid: Option<i32>,
}

/// Bind `port` (0 for an OS-assigned ephemeral port), optionally record the
/// bound port to `port_file`, then accept connections until the parent
/// process (if any) disappears or the listener errors out.
pub fn serve(port: u16, port_file: Option<&Path>, shared: Arc<Shared>) -> Result<()> {
    // SAFETY: installs a process-wide signal disposition; no other thread
    // touches SIGPIPE's handler, and this must happen before any socket
    // write can trigger it.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("binding TCP listener on port {}", port))?;
    let bound_port = listener.local_addr().context("reading bound address")?.port();
    tracing::info!(port = bound_port, "listening");

    if let Some(path) = port_file {
        std::fs::write(path, format!("{}\n", bound_port))
            .with_context(|| format!("writing port file {:?}", path))?;
    }

    for stream in listener.incoming() {
        if let Some(pid) = shared.parent_pid {
            // SAFETY: signal 0 performs no action beyond existence/permission
            // checks; `pid` is a plain integer, not a resource handle.
            if unsafe { libc::kill(pid, 0) } != 0 {
                tracing::info!(pid, "parent process gone, exiting accept loop");
                break;
            }
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "accept failed");
                continue;
            }
        };
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            if let Err(e) = handle_connection(stream, &shared) {
                tracing::debug!(error = %e, "connection handler exited with error");
            }
        });
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, shared: &Shared) -> Result<()> {
    let peer = stream.peer_addr().ok();
    tracing::debug!(?peer, "connection accepted");

    let mut reader = BufReader::new(stream.try_clone().context("cloning connection for reading")?);
    let mut writer = stream;

    let mut session = Session::new(shared.defaults);

    let first_byte = peek_first_byte(&mut reader)?;
    if first_byte == Some(b'-') {
        let mut line = String::new();
        reader.read_line(&mut line).context("reading option line")?;
        match parse_option_line(&line, shared.defaults.hits_only) {
            Ok(config) => {
                session.reset_to(config);
                if !config.hits_only {
                    writeln!(
                        writer,
                        "OK aa={} debug={} min_hits={} min_weighted_hits={} order_constraint={} max_gap={}",
                        config.aa,
                        config.debug,
                        config.min_hits,
                        config.min_weighted_hits,
                        config.order_constraint,
                        config.max_gap
                    )?;
                }
            }
            Err(e) => {
                writeln!(writer, "ERR {}", e)?;
                return Ok(());
            }
        }
    }

    let mut fasta = FastaReader::new(reader);
    loop {
        match fasta.next_record() {
            Ok(Some(Record::Sequence { id, seq })) => {
                match process_request(&id, &seq, &shared.table, &shared.function_names, &mut session, &mut writer) {
                    Ok(_) => {}
                    Err(e) => {
                        writeln!(writer, "ERR {}", e)?;
                        return Ok(());
                    }
                }
            }
            Ok(Some(Record::Flush)) => {
                writeln!(writer, "//")?;
            }
            Ok(None) => break,
            Err(e) => {
                writeln!(writer, "ERR {}", e)?;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Peek at the next byte without consuming it, so the caller can decide
/// whether a leading `-` introduces an option line.
fn peek_first_byte(reader: &mut BufReader<TcpStream>) -> Result<Option<u8>> {
    let buf = reader.fill_buf().context("peeking connection stream")?;
    Ok(buf.first().copied())
}

/// Parse a server option line (`-a -d 2 -m 3 -M 0.5 -O -g 100`) via the
/// same [`SessionArgs`] the top-level CLI flattens, keeping one parsing
/// implementation for both surfaces.
fn parse_option_line(line: &str, hits_only: bool) -> Result<SessionConfig> {
    let mut words = vec!["option-line"];
    words.extend(line.split_whitespace());
    let args = SessionArgs::try_parse_from(words).context("parsing option line")?;
    Ok(args.to_session_config(hits_only))
}
