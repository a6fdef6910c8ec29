use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use simcheck_core::config::load_or_default;
use simcheck_core::engine::{CheckRequest, Engine, UploadRequest};
use simcheck_core::store::{CorpusStore, FileStore, QueryFilter};
use simcheck_core::{Category, DocId, DocumentStatus};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One record of an import file.
#[derive(Debug, Deserialize)]
struct InputDoc {
    title: String,
    body: String,
    author: Option<String>,
    category: Option<String>,
    #[serde(default)]
    status: Option<String>,
    user_id: Option<String>,
    institution: Option<String>,
    /// Original file to keep, relative to the import file's directory.
    filename: Option<String>,
}

#[derive(Parser)]
#[command(name = "simcheck-indexer")]
#[command(about = "Import and manage the similarity corpus", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload every record of JSON/JSONL files (or a directory of them)
    Import {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
    },
    /// Upload a single document
    Upload {
        /// Original file as submitted
        #[arg(long)]
        file: PathBuf,
        /// Plain text extracted from the original
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "draft")]
        status: String,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        institution: Option<String>,
    },
    /// Score a text file against the corpus without storing it
    Check {
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        institution: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Remove a document and its saved original
    Delete {
        #[arg(long)]
        id: DocId,
    },
    /// List stored documents, most recent first
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// List categories that have a partition
    Categories,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    let store = FileStore::open(&config.storage.data_dir, config.storage.draft_ttl())
        .with_context(|| format!("Failed to open corpus at {}", config.storage.data_dir.display()))?;
    let engine = Engine::new(store, &config);

    match cli.command {
        Commands::Import { input } => {
            let imported = import(&engine, &input)?;
            tracing::info!(imported, input = %input.display(), "import complete");
        }
        Commands::Upload { file, text, title, author, category, status, user_id, institution } => {
            let file_bytes = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let content = fs::read_to_string(&text).with_context(|| format!("Failed to read {}", text.display()))?;
            let doc = engine.upload(UploadRequest {
                title,
                author,
                category,
                status: parse_status(&status)?,
                user_id,
                institution,
                original_filename: file_name(&file),
                file_bytes,
                content,
            })?;
            println!("{}\t{}\t{}", doc.id, doc.category, doc.title);
        }
        Commands::Check { text, category, institution, top_k } => {
            let content = fs::read_to_string(&text).with_context(|| format!("Failed to read {}", text.display()))?;
            let outcome = engine.check(&CheckRequest { content, category, institution, top_k, exclude_user_id: None })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Delete { id } => {
            if !engine.store().delete(id)? {
                bail!("document {id} not found");
            }
            println!("deleted {id}");
        }
        Commands::List { category } => {
            let filter = match category {
                Some(c) => QueryFilter::categories(vec![Category::sanitize(&c)]),
                None => QueryFilter::default(),
            };
            for doc in engine.store().query(&filter)? {
                let uploaded = doc.uploaded_at.format(&Rfc3339).unwrap_or_default();
                println!("{}\t{}\t{}\t{}\t{}", doc.id, doc.category, doc.status.as_str(), uploaded, doc.title);
            }
        }
        Commands::Categories => {
            for category in engine.store().categories()? {
                println!("{category}");
            }
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<DocumentStatus> {
    raw.parse::<DocumentStatus>().map_err(anyhow::Error::msg)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "upload.bin".to_string())
}

/// JSON and JSONL files under `input`, in a stable order.
fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

fn read_records(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut docs = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: InputDoc = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid record", file.display(), n + 1))?;
            docs.push(doc);
        }
        return Ok(docs);
    }
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    Ok(match json {
        serde_json::Value::Array(arr) => {
            arr.into_iter().map(serde_json::from_value).collect::<std::result::Result<Vec<InputDoc>, _>>()?
        }
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    })
}

fn import<S: CorpusStore>(engine: &Engine<S>, input: &Path) -> Result<usize> {
    let files = input_files(input);
    if files.is_empty() {
        bail!("no .json or .jsonl files found at {}", input.display());
    }
    let mut imported = 0;
    for file in files {
        let base = file.parent().unwrap_or(Path::new("."));
        for doc in read_records(&file)? {
            let title = doc.title.clone();
            let (original_filename, file_bytes) = match &doc.filename {
                Some(name) => {
                    let path = base.join(name);
                    let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
                    (file_name(&path), bytes)
                }
                None => (format!("{}.txt", title.trim()), doc.body.clone().into_bytes()),
            };
            let status = match doc.status.as_deref() {
                Some(s) => parse_status(s)?,
                None => DocumentStatus::Draft,
            };
            match engine.upload(UploadRequest {
                title: doc.title,
                author: doc.author,
                category: doc.category,
                status,
                user_id: doc.user_id,
                institution: doc.institution,
                original_filename,
                file_bytes,
                content: doc.body,
            }) {
                Ok(stored) => {
                    tracing::debug!(id = stored.id, title = %stored.title, "imported");
                    imported += 1;
                }
                Err(simcheck_core::Error::InputRejected(reason)) => {
                    tracing::warn!(file = %file.display(), %title, %reason, "skipping record");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcheck_core::config::Config;
    use simcheck_core::store::MemoryStore;
    use tempfile::tempdir;

    const BODY: &str = "Distributed consensus protocols tolerate crashed replicas by requiring \
        a majority quorum for every committed log entry in the cluster.";

    #[test]
    fn imports_json_and_jsonl_from_a_directory() {
        let dir = tempdir().unwrap();
        let one = serde_json::json!([
            { "title": "Raft", "body": BODY, "category": "diploma" },
            { "title": "Empty", "body": "   " }
        ]);
        fs::write(dir.path().join("a.json"), one.to_string()).unwrap();
        let line = serde_json::json!({ "title": "Paxos", "body": BODY, "status": "final", "user_id": "u7" });
        fs::write(dir.path().join("b.jsonl"), format!("{line}\n\n")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let engine = Engine::new(MemoryStore::default(), &Config::default());
        assert_eq!(import(&engine, dir.path()).unwrap(), 2);

        let docs = engine.store().query(&QueryFilter::default()).unwrap();
        let mut titles: Vec<_> = docs.iter().map(|d| d.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Paxos", "Raft"]);
        let paxos = docs.iter().find(|d| d.title == "Paxos").unwrap();
        assert_eq!(paxos.status, DocumentStatus::Final);
        let raft = docs.iter().find(|d| d.title == "Raft").unwrap();
        assert_eq!(raft.status, DocumentStatus::Draft);
        assert_eq!(paxos.category.as_str(), "uncategorized");
    }

    #[test]
    fn referenced_original_is_kept() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("thesis.pdf"), b"%PDF-1.7").unwrap();
        let rec = serde_json::json!({ "title": "Thesis", "body": BODY, "filename": "thesis.pdf" });
        fs::write(dir.path().join("corpus.json"), rec.to_string()).unwrap();

        let engine = Engine::new(MemoryStore::default(), &Config::default());
        import(&engine, &dir.path().join("corpus.json")).unwrap();
        let doc = &engine.store().query(&QueryFilter::default()).unwrap()[0];
        assert_eq!(doc.filename.as_deref(), Some("thesis.pdf"));
        let path = doc.file_path.clone().unwrap();
        assert_eq!(engine.store().read_original(&path).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn bad_status_fails_the_import() {
        let dir = tempdir().unwrap();
        let rec = serde_json::json!({ "title": "x", "body": BODY, "status": "published" });
        fs::write(dir.path().join("c.json"), rec.to_string()).unwrap();
        let engine = Engine::new(MemoryStore::default(), &Config::default());
        assert!(import(&engine, dir.path()).is_err());
    }

    #[test]
    fn empty_input_is_an_error() {
        let dir = tempdir().unwrap();
        let engine = Engine::new(MemoryStore::default(), &Config::default());
        assert!(import(&engine, dir.path()).is_err());
    }
}
