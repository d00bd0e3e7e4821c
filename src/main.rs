//! `strata` - inspect segment-based index directories.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strata::codec::PostingsFlags;
use strata::segment::IndexReader;

#[derive(Parser)]
#[command(name = "strata", version, about = "Inspect strata index directories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Per-segment document and deletion counts
    Stats {
        /// Index directory
        dir: PathBuf,
    },
    /// Show a term's postings (doc ids and frequencies)
    Postings {
        /// Index directory
        dir: PathBuf,
        /// Field name
        field: String,
        /// Term text
        term: String,
        /// Maximum postings to print per segment
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Verify stream checksums for every segment
    Check {
        /// Index directory
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Stats { dir } => stats(&dir),
        Command::Postings {
            dir,
            field,
            term,
            limit,
        } => postings(&dir, &field, &term, limit),
        Command::Check { dir } => check(&dir),
    }
}

fn stats(dir: &PathBuf) -> Result<()> {
    let reader = IndexReader::open(dir).context("Failed to open index")?;
    println!("Index: {}", dir.display());
    println!("Segments: {}", reader.segments().len());
    println!();
    println!("{:<12} {:>10} {:>10} {:>10}  fields", "segment", "maxDoc", "deleted", "numDocs");
    for segment in reader.segments() {
        let fields: Vec<&str> = segment
            .meta
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        println!(
            "{:<12} {:>10} {:>10} {:>10}  {}",
            segment.meta.name,
            segment.max_doc(),
            segment.num_deleted(),
            segment.num_docs(),
            fields.join(",")
        );
    }
    println!();
    println!("Total docs: {}", reader.num_docs());
    Ok(())
}

fn postings(dir: &PathBuf, field: &str, term: &str, limit: usize) -> Result<()> {
    let reader = IndexReader::open(dir).context("Failed to open index")?;
    let mut found = false;
    for segment in reader.segments() {
        let Some(mut it) = segment.postings(field, term.as_bytes(), PostingsFlags::FREQS)? else {
            continue;
        };
        found = true;
        println!("{}:", segment.meta.name);
        let mut printed = 0;
        loop {
            let doc = it.next_doc()?;
            if doc == strata::codec::NO_MORE_DOCS {
                break;
            }
            if printed < limit {
                println!("  doc {:>8}  freq {}", doc, it.freq());
            }
            printed += 1;
        }
        if printed > limit {
            println!("  ... {} more", printed - limit);
        }
    }
    if !found {
        println!("Term {field}:{term} not found.");
    }
    Ok(())
}

fn check(dir: &PathBuf) -> Result<()> {
    let reader = IndexReader::open(dir).context("Failed to open index")?;
    for segment in reader.segments() {
        segment
            .check_integrity()
            .with_context(|| format!("segment {} is corrupt", segment.meta.name))?;
        println!("{}: ok", segment.meta.name);
    }
    Ok(())
}
