use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vaultfs::digest::sha256_hex;
use vaultfs::{Engine, EngineConfig, FileDevice, FillMode, GracefulReadOptions, SearchFilter};

#[derive(Parser)]
#[command(name = "vaultfs", version = "1.0.0", about = "Fault-tolerant content-addressed block storage")]
struct Cli {
    /// Path to the backing device file.
    #[arg(short, long, global = true, default_value = "vault.img")]
    device: PathBuf,
    /// Device size in bytes, used only when the file does not yet exist.
    #[arg(long, global = true, default_value_t = 64 * 1024 * 1024)]
    device_size: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file under (name, owner)
    Put {
        path: PathBuf,
        #[arg(short, long, default_value = "default")]
        owner: String,
        /// Name to store it under; defaults to the file's base name
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        redundancy: Option<usize>,
    },
    /// Retrieve an object by id and write it to a path
    Get {
        id: String,
        output: PathBuf,
        /// Allow partial recovery instead of failing on any corruption
        #[arg(long)]
        graceful: bool,
        #[arg(long, default_value_t = 0.0)]
        min_recovery_rate: f64,
    },
    /// Delete an object by id
    Rm { id: String },
    /// List stored objects
    Ls {
        #[arg(short, long)]
        owner: Option<String>,
    },
    /// Run one scrub pass over every chunk
    Scrub,
    /// Full integrity scan over every object
    Verify,
    /// Coalesce the free list
    Defrag,
    /// Recompute tier assignments for every object
    Tier,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let device = open_device(&cli.device, cli.device_size)?;
    let engine = Engine::open(device, EngineConfig::default())?;

    if engine.is_metadata_corrupted() {
        eprintln!("warning: metadata region did not validate; engine is in MetadataCorrupted state");
    }

    match cli.command {
        Commands::Put { path, owner, name, redundancy } => {
            let data = std::fs::read(&path)?;
            let name = name.unwrap_or_else(|| {
                path.file_name().unwrap().to_string_lossy().into_owned()
            });
            let id = engine.write(&name, &owner, &data, redundancy)?;
            let checksum = engine
                .list(&SearchFilter::default())
                .into_iter()
                .find(|r| r.id == id)
                .map(|r| sha256_hex(&r.checksum))
                .unwrap_or_default();
            println!("stored {name} ({} B) as {id} (sha256 {checksum})", data.len());
        }

        Commands::Get { id, output, graceful, min_recovery_rate } => {
            let object_id = parse_object_id(&id)?;
            if graceful {
                let options = GracefulReadOptions { min_recovery_rate, fill: FillMode::Zeros };
                match engine.read_graceful(object_id, options) {
                    Ok((bytes, report)) => {
                        std::fs::write(&output, &bytes)?;
                        println!(
                            "wrote {} B to {} (recovery_rate={:.1}%, corrupted_chunks={})",
                            bytes.len(), output.display(), report.recovery_rate, report.corrupted_chunks
                        );
                    }
                    Err(e) => {
                        eprintln!("recovery below threshold: {e}");
                        std::process::exit(1);
                    }
                }
            } else {
                let bytes = engine.read(object_id)?;
                std::fs::write(&output, &bytes)?;
                println!("wrote {} B to {}", bytes.len(), output.display());
            }
        }

        Commands::Rm { id } => {
            let object_id = parse_object_id(&id)?;
            engine.delete(object_id)?;
            println!("deleted {id}");
        }

        Commands::Ls { owner } => {
            let filter = SearchFilter { owner, ..SearchFilter::default() };
            let mut records = engine.list(&filter);
            records.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{:<36} {:<20} {:>10} {:>6}  {:<64}  name", "id", "owner", "size", "tier", "sha256");
            for record in &records {
                println!(
                    "{:<36} {:<20} {:>10} {:>6?}  {:<64}  {}",
                    record.id, record.owner, record.size, record.tier,
                    sha256_hex(&record.checksum), record.name
                );
            }
        }

        Commands::Scrub => {
            let rx = engine.start_scrubber();
            println!("scrubber started; waiting for first pass...");
            if let Ok(stats) = rx.recv() {
                println!(
                    "examined={} detected={} repaired={} unrecoverable={}",
                    stats.chunks_examined, stats.corruptions_detected,
                    stats.corruptions_repaired, stats.unrecoverable
                );
            }
            engine.shutdown();
        }

        Commands::Verify => {
            let report = engine.integrity_scan();
            println!(
                "files_total={} files_corrupted={} chunks_total={} chunks_corrupted={} elapsed_ms={}",
                report.files_total, report.files_corrupted,
                report.chunks_total, report.chunks_corrupted, report.elapsed_ms
            );
        }

        Commands::Defrag => {
            let report = engine.defragment()?;
            println!("reclaimed {} B in {} ms", report.bytes_reclaimed, report.elapsed_ms);
        }

        Commands::Tier => {
            engine.tier_rebalance()?;
            println!("tier rebalance complete");
        }
    }

    Ok(())
}

fn open_device(path: &PathBuf, size: u64) -> std::io::Result<FileDevice> {
    if path.exists() {
        FileDevice::open(path)
    } else {
        FileDevice::create(path, size)
    }
}

fn parse_object_id(s: &str) -> Result<vaultfs::ObjectId, Box<dyn std::error::Error>> {
    let value = u128::from_str_radix(s, 16)?;
    Ok(vaultfs::ObjectId(value))
}
