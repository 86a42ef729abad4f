use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use chunkdb_core::config::{Config, EngineConfig, SearchConfig};
use chunkdb_core::filter::FilterSpec;
use chunkdb_core::types::{Chunk, SearchRequest, Source};
use chunkdb_hybrid::Backends;

const USAGE: &str = "Usage: chunkdb <command> [args...]

Commands:
  ingest <path> [--user ID] [--source text|pdf|ocr|image] [--tag TAG]...
      Index every .txt file under <path>. Form feeds split pages.
  index-chunks <file.json>
      Index a JSON array of pre-built chunks.
  search [--query TEXT] [--filters JSON] [--top-k N] [--weight W]
  search --json BODY
      Run one search request and print the response as JSON.
  stats
      Print index statistics as JSON.";

fn usage_exit() -> ! {
    eprintln!("{USAGE}");
    std::process::exit(2)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Pull the value following a flag, failing if it is missing.
fn flag_value(args: &[String], i: &mut usize) -> anyhow::Result<String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i).cloned().ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage_exit();
    }
    let cmd = args.remove(0);

    let config = Config::load().context("loading configuration")?;
    let engine_config = config.engine()?;
    info!(env = config.env_name(), "configuration loaded");

    match cmd.as_str() {
        "ingest" => ingest(&engine_config, &args),
        "index-chunks" => index_chunks(&engine_config, &args),
        "search" => search(&engine_config, &args),
        "stats" => stats(&engine_config),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            usage_exit()
        }
    }
}

fn open_backends(config: &EngineConfig) -> anyhow::Result<Backends> {
    Backends::open_local(config, Path::new("."))
}

fn ingest(config: &EngineConfig, args: &[String]) -> anyhow::Result<()> {
    let mut root: Option<PathBuf> = None;
    let mut user_id = "local".to_string();
    let mut source = Source::Text;
    let mut tags = BTreeSet::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--user" => user_id = flag_value(args, &mut i)?,
            "--source" => source = flag_value(args, &mut i)?.parse()?,
            "--tag" => {
                tags.insert(flag_value(args, &mut i)?);
            }
            a if !a.starts_with('-') => root = Some(PathBuf::from(a)),
            other => bail!("unknown ingest flag {other}"),
        }
        i += 1;
    }
    let Some(root) = root else { usage_exit() };

    let files: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
        .collect();
    if files.is_empty() {
        warn!(path = %root.display(), "no .txt files found");
        return Ok(());
    }

    let backends = open_backends(config)?;
    let indexer = backends.indexer(config)?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut total_chunks = 0usize;
    for path in &files {
        let document_id = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document").to_string();
        pb.set_message(document_id.clone());
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let pages: Vec<&str> = text.split('\u{c}').collect();
        let report = indexer.index_document(&document_id, &user_id, source, &tags, &pages)?;
        total_chunks += report.total_chunks;
        pb.inc(1);
    }
    pb.finish_with_message("done");
    info!(files = files.len(), chunks = total_chunks, "ingest complete");
    Ok(())
}

fn index_chunks(config: &EngineConfig, args: &[String]) -> anyhow::Result<()> {
    let Some(path) = args.first() else { usage_exit() };
    let body = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let chunks: Vec<Chunk> = serde_json::from_str(&body).with_context(|| format!("parsing chunks from {path}"))?;

    let backends = open_backends(config)?;
    let ids = backends.indexer(config)?.index_chunks(chunks)?;
    println!("{}", serde_json::to_string_pretty(&ids)?);
    Ok(())
}

fn parse_search_request(args: &[String], defaults: &SearchConfig) -> anyhow::Result<SearchRequest> {
    let mut query = None;
    let mut filters = None;
    let mut top_k = defaults.default_top_k;
    let mut weight = defaults.default_weight_vector;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => return Ok(SearchRequest::from_json(&flag_value(args, &mut i)?)?),
            "--query" | "-q" => query = Some(flag_value(args, &mut i)?),
            "--filters" | "-f" => {
                let raw: serde_json::Value = serde_json::from_str(&flag_value(args, &mut i)?)?;
                filters = Some(FilterSpec::from_value(&raw)?);
            }
            "--top-k" | "-k" => top_k = flag_value(args, &mut i)?.parse().context("--top-k expects an integer")?,
            "--weight" | "-w" => weight = flag_value(args, &mut i)?.parse().context("--weight expects a number")?,
            other => bail!("unknown search flag {other}"),
        }
        i += 1;
    }
    Ok(SearchRequest { query, filters, top_k, weight_vector: weight })
}

fn search(config: &EngineConfig, args: &[String]) -> anyhow::Result<()> {
    let request = parse_search_request(args, &config.search)?;
    let backends = open_backends(config)?;
    let engine = backends.engine(config);
    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(engine.search(&request))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn stats(config: &EngineConfig) -> anyhow::Result<()> {
    let backends = open_backends(config)?;
    let stats = backends.indexer(config)?.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
