use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use treebox::compression::{Compression, DEFAULT_LEVEL};
use treebox::container::{Container, WriteOptions, CONTAINER_EXTENSION};
use treebox::index::Node;
use treebox::path::ContainerPath;
use treebox::tree::{convert_tree_with_global, ConvertOptions};

#[derive(Parser)]
#[command(name = "treebox", about = "Mirror a directory tree into a single .tbx container")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a directory tree into <OUT_DIR>/<name>.tbx
    Create {
        root: PathBuf,
        /// Directory the container is written to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Codec: zstd (default), lz4, brotli, lzma, none
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (zstd 1-19; brotli 0-11; ignored for lz4/lzma)
        #[arg(short, long, default_value_t = DEFAULT_LEVEL)]
        level: i32,
        /// Fail files with no registered encoder instead of storing raw bytes
        #[arg(long)]
        require_typed: bool,
        /// Follow symbolic links
        #[arg(long)]
        follow_links: bool,
    },
    /// List groups and records
    List {
        input: PathBuf,
    },
    /// Show container metadata
    Info {
        input: PathBuf,
    },
    /// Write one record's bytes to stdout
    Cat {
        input: PathBuf,
        path:  String,
    },
    /// Restore the original files from a container
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { root, out_dir, codec, level, require_typed, follow_links } => {
            let name = root
                .canonicalize()
                .unwrap_or_else(|_| root.clone())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| format!("{} has no directory name", root.display()))?;
            fs::create_dir_all(&out_dir)?;
            let output = out_dir.join(format!("{name}.{CONTAINER_EXTENSION}"));
            println!("Save destination: {}", output.display());

            let write_options = WriteOptions { compression: parse_codec(&codec), level };
            let options = ConvertOptions { require_typed, follow_links };
            let report = convert_tree_with_global(&root, &output, options, write_options)?;

            for failure in &report.failures {
                eprintln!("  failed  {}: {}", failure.path.display(), failure.error);
            }
            println!(
                "Conversion complete: {} record(s), {} group(s), {} deduplicated, {} failed",
                report.records,
                report.groups,
                report.deduplicated,
                report.failures.len(),
            );
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let reader = Container::open(&input)?;
            println!("Container: {} (root {:?})", input.display(), reader.root_name());
            println!("{:<40} {:>12} {:>12} {:<6} Hash", "Path", "Size", "Stored", "Kind");
            for (path, node) in reader.index.walk() {
                match node {
                    Node::Group(g) => println!("{:<40} {:>12} {:>12} {:<6}", format!("{path}/"), "", "", format!("[{}]", g.len())),
                    Node::Record(r) => println!(
                        "{:<40} {:>12} {:>12} {:<6} {}",
                        path.to_string(),
                        r.size,
                        r.stored_size,
                        r.kind.name(),
                        hex::encode(&r.content_hash[..6]),
                    ),
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let reader = Container::open(&input)?;
            let sb = &reader.superblock;
            let created = chrono::DateTime::from_timestamp(sb.created_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| sb.created_at.to_string());

            println!("── .tbx Container ───────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Root name      {}", reader.root_name());
            println!("  Format version {}", sb.version);
            println!("  UUID           {}", sb.uuid);
            println!("  Created        {}", created);
            println!("  Index offset   {} B", sb.index_offset);
            println!("  Index size     {} B", sb.index_size);
            println!("  Groups         {}", reader.index.group_count());
            println!("  Records        {}", reader.index.record_count());
            println!("  Root hash      {}", hex::encode(reader.index.root_hash));
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, path } => {
            let mut reader = Container::open(&input)?;
            let data = reader.read_raw(&ContainerPath::parse(&path)?)?;
            std::io::stdout().lock().write_all(&data)?;
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let mut reader = Container::open(&input)?;
            let entries: Vec<(ContainerPath, Node)> =
                reader.index.walk().into_iter().map(|(p, n)| (p, n.clone())).collect();
            let mut restored = 0usize;
            for (path, node) in entries {
                match node {
                    Node::Group(_) => fs::create_dir_all(dir_for(&output_dir, &path))?,
                    Node::Record(entry) => {
                        let dir = dir_for(&output_dir, &path.parent().unwrap_or_default());
                        let file_name = entry.file_name(path.name().unwrap_or_default());
                        fs::create_dir_all(&dir)?;
                        fs::write(dir.join(file_name), reader.read_raw(&path)?)?;
                        restored += 1;
                    }
                }
            }
            println!("Unpacked {} file(s) to: {}", restored, output_dir.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dir_for(base: &Path, group: &ContainerPath) -> PathBuf {
    group.segments().iter().fold(base.to_path_buf(), |dir, seg| dir.join(seg))
}

fn parse_codec(s: &str) -> Compression {
    Compression::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown codec '{}', defaulting to zstd", s);
        Compression::Zstd
    })
}
