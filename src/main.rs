use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;

use modelpack::build::Builder;
use modelpack::config::{BuildConfig, GenerateConfig, DEFAULT_BUILD_CONCURRENCY};
use modelpack::logging;
use modelpack::modelfile::Modelfile;
use modelpack::store::LocalStore;

#[derive(Parser)]
#[command(name = "modelpack")]
#[command(about = "Package model trees into OCI model artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable JSON logging
    #[arg(long, env = "MODELPACK_JSON_LOGS")]
    json_logs: bool,

    /// Storage directory for the local artifact store
    #[arg(long, env = "MODELPACK_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model artifact from a workspace
    Build {
        /// Path to the workspace
        #[arg(default_value = ".")]
        workdir: PathBuf,

        /// Target artifact reference, <repo>:<tag>
        #[arg(short, long)]
        target: String,

        /// Path to the Modelfile
        #[arg(short = 'f', long, default_value = "Modelfile")]
        modelfile: String,

        /// Number of concurrent layer workers
        #[arg(long, default_value_t = DEFAULT_BUILD_CONCURRENCY)]
        concurrency: usize,

        /// Push to a remote registry instead of the local store
        #[arg(long)]
        output_remote: bool,

        /// Use plain HTTP for the remote registry
        #[arg(long)]
        plain_http: bool,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,

        /// Mark layers as nydus blobs
        #[arg(long)]
        nydusify: bool,
    },
    /// Synthesize a Modelfile from a workspace
    Generate {
        /// Path to the workspace
        #[arg(default_value = ".")]
        workdir: PathBuf,

        /// Where to write the Modelfile, defaults to <workdir>/Modelfile
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model name
        #[arg(long)]
        name: Option<String>,

        /// Model architecture, e.g. transformer
        #[arg(long)]
        arch: Option<String>,

        /// Model family, e.g. llama3
        #[arg(long)]
        family: Option<String>,

        /// Weight format, e.g. safetensors
        #[arg(long)]
        format: Option<String>,

        /// Parameter size, e.g. 7B
        #[arg(long)]
        param_size: Option<String>,

        /// Numeric precision, e.g. bf16
        #[arg(long)]
        precision: Option<String>,

        /// Quantization scheme, e.g. awq
        #[arg(long)]
        quantization: Option<String>,

        /// Skip unrecognized file types instead of failing
        #[arg(long)]
        ignore_unrecognized: bool,
    },
    /// List tags in the local store for a repository
    Tags {
        /// Repository name
        repo: String,
    },
    /// Remove blobs unreachable from any tag
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.json_logs).ok();

    let storage_root = match cli.storage_dir {
        Some(dir) => dir,
        None => LocalStore::default_root()?,
    };

    match cli.command {
        Commands::Build {
            workdir,
            target,
            modelfile,
            concurrency,
            output_remote,
            plain_http,
            insecure,
            nydusify,
        } => {
            let cfg = BuildConfig {
                concurrency,
                target,
                modelfile,
                output_remote,
                plain_http,
                insecure,
                nydusify,
            };
            run_build(storage_root, workdir, cfg).await
        }
        Commands::Generate {
            workdir,
            output,
            name,
            arch,
            family,
            format,
            param_size,
            precision,
            quantization,
            ignore_unrecognized,
        } => {
            let cfg = GenerateConfig {
                name: name.unwrap_or_default(),
                arch: arch.unwrap_or_default(),
                family: family.unwrap_or_default(),
                format: format.unwrap_or_default(),
                param_size: param_size.unwrap_or_default(),
                precision: precision.unwrap_or_default(),
                quantization: quantization.unwrap_or_default(),
                ignore_unrecognized_file_types: ignore_unrecognized,
            };
            run_generate(workdir, output, cfg)
        }
        Commands::Tags { repo } => run_tags(storage_root, repo),
        Commands::Prune => run_prune(storage_root),
    }
}

async fn run_build(storage_root: PathBuf, workdir: PathBuf, cfg: BuildConfig) -> Result<()> {
    let store = Arc::new(LocalStore::new(storage_root)?);
    let builder = Builder::new(store);

    let manifest = builder
        .build(&workdir, &cfg)
        .await
        .with_context(|| format!("failed to build {}", cfg.target))?;

    println!("{} {} -> {}", "Built".green(), cfg.target.bold(), manifest.digest);
    Ok(())
}

fn run_generate(workdir: PathBuf, output: Option<PathBuf>, cfg: GenerateConfig) -> Result<()> {
    let modelfile = Modelfile::from_workspace(&workdir, &cfg)
        .with_context(|| format!("failed to scan workspace {}", workdir.display()))?;

    let output = output.unwrap_or_else(|| workdir.join("Modelfile"));
    std::fs::write(&output, modelfile.render(Utc::now()))
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{} {}", "Generated".green(), output.display());
    Ok(())
}

fn run_tags(storage_root: PathBuf, repo: String) -> Result<()> {
    let store = LocalStore::new(storage_root)?;
    for tag in store.list_tags(&repo)? {
        let digest = store.resolve_tag(&repo, &tag)?;
        println!("{}:{} {}", repo, tag.bold(), digest);
    }
    Ok(())
}

fn run_prune(storage_root: PathBuf) -> Result<()> {
    let store = LocalStore::new(storage_root)?;
    let removed = store.prune()?;

    println!("Deleted Blobs:");
    for digest in removed {
        println!("deleted: {digest}");
    }
    Ok(())
}
