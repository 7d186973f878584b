use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use research_core::barrels::BarrelStore;
use research_core::builder::{reshard, IndexBuilder};
use research_core::persist::{load_meta, IndexPaths};
use research_core::{DocumentRecord, IndexConfig, IndexService};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const PSV_HEADER: [&str; 6] = ["title", "abstract", "year", "keywords", "n_citation", "url"];

/// A scalar that may arrive as a JSON string or number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Keywords {
    List(Vec<String>),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct InputDoc {
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    year: Option<Scalar>,
    keywords: Option<Keywords>,
    n_citation: Option<Scalar>,
    url: Option<Keywords>,
}

impl InputDoc {
    fn into_record(self) -> DocumentRecord {
        let list_text = |k: Option<Keywords>| match k {
            Some(Keywords::List(items)) => items.join(","),
            Some(Keywords::Text(s)) => s,
            None => String::new(),
        };
        DocumentRecord {
            title: self.title,
            abstract_text: self.abstract_text,
            year: self.year.map(Scalar::into_text).unwrap_or_default(),
            keywords: list_text(self.keywords),
            n_citation: self.n_citation.map(Scalar::into_text).unwrap_or_else(|| "0".into()),
            url: list_text(self.url),
        }
    }
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and maintain the barrel-sharded paper index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from JSON, JSONL or pipe-delimited files (or a directory of them)
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// JSON file with index configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of barrels to shard the inverted index into
        #[arg(long)]
        barrel_count: Option<u32>,
    },
    /// Rewrite all barrels for a new barrel count from the forward log
    Reshard {
        #[arg(long)]
        index: String,
        #[arg(long)]
        barrel_count: u32,
    },
    /// Print term, document and barrel counts
    Stats {
        #[arg(long)]
        index: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, config, barrel_count } => {
            let mut config = match config {
                Some(path) => IndexConfig::from_json_file(&path)?,
                None => IndexConfig::default(),
            };
            if let Some(n) = barrel_count {
                config.barrel_count = n;
            }
            build_index(&input, &output, config)
        }
        Commands::Reshard { index, barrel_count } => {
            let summary = reshard(&index, barrel_count)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Stats { index } => print_stats(&index),
    }
}

fn build_index(input: &str, output: &str, config: IndexConfig) -> Result<()> {
    let files = collect_inputs(Path::new(input))?;
    if files.is_empty() {
        bail!("no .json, .jsonl or .psv input found under {input}");
    }

    let mut builder = IndexBuilder::new(output, config)?;
    for file in files {
        let added = match file.extension().and_then(|s| s.to_str()) {
            Some("jsonl") => index_jsonl(&file, &mut builder)?,
            Some("psv") => index_psv(&file, &mut builder)?,
            _ => index_json(&file, &mut builder)?,
        };
        tracing::info!(file = %file.display(), added, "ingested file");
    }
    let summary = builder.finish()?;
    tracing::info!(output, num_docs = summary.num_docs, num_terms = summary.num_terms, "index build complete");
    Ok(())
}

fn collect_inputs(input_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl" | "psv") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        bail!("input path {} does not exist", input_path.display());
    }
    Ok(files)
}

fn index_jsonl(file: &Path, builder: &mut IndexBuilder) -> Result<usize> {
    let reader = BufReader::new(File::open(file)?);
    let mut added = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: InputDoc = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), n + 1))?;
        builder.add(doc.into_record())?;
        added += 1;
    }
    Ok(added)
}

fn index_json(file: &Path, builder: &mut IndexBuilder) -> Result<usize> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    let docs: Vec<InputDoc> = match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(serde_json::from_value::<InputDoc>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}", file.display()))?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    };
    let added = docs.len();
    for doc in docs {
        builder.add(doc.into_record())?;
    }
    Ok(added)
}

/// Pipe-delimited corpus export with a header row naming the six record columns.
fn index_psv(file: &Path, builder: &mut IndexBuilder) -> Result<usize> {
    let reader = BufReader::new(File::open(file)?);
    let mut lines = reader.lines();
    let header = lines.next().transpose()?.unwrap_or_default();
    let columns: Vec<&str> = header.trim_end().split('|').collect();
    if columns != PSV_HEADER {
        bail!("{}: expected header `{}`, found `{header}`", file.display(), PSV_HEADER.join("|"));
    }

    let mut added = 0;
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let fields: Vec<&str> = line.trim_end_matches('\r').split('|').collect();
        if fields.len() != PSV_HEADER.len() {
            tracing::warn!(file = %file.display(), line = n + 2, fields = fields.len(), "skipping malformed row");
            continue;
        }
        builder.add(DocumentRecord {
            title: fields[0].to_string(),
            abstract_text: fields[1].to_string(),
            year: fields[2].to_string(),
            keywords: strip_list_syntax(fields[3]),
            n_citation: fields[4].to_string(),
            url: strip_list_syntax(fields[5]),
        })?;
        added += 1;
    }
    Ok(added)
}

/// Turn a list literal such as `['a', 'b']` into `a,b`; other values pass through.
fn strip_list_syntax(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        Some(inner) => inner
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        None => trimmed.to_string(),
    }
}

fn print_stats(index: &str) -> Result<()> {
    let paths = IndexPaths::new(index);
    let meta = load_meta(&paths)?;
    let config = IndexConfig { barrel_count: meta.barrel_count, ..IndexConfig::default() };
    let service = IndexService::open(index, config)?;
    let rows = BarrelStore::open(paths.barrels_dir(), meta.barrel_count)?.row_counts()?;
    let stats = serde_json::json!({
        "num_docs": service.document_count(),
        "num_terms": service.term_count(),
        "barrel_count": meta.barrel_count,
        "created_at": meta.created_at,
        "max_rows": rows.iter().max().copied().unwrap_or(0),
        "rows_per_barrel": rows,
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
