use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use dms_tool_runner::constants::DEFAULT_CONFIG_FILE;
use dms_tool_runner::merge::{assemble_files, OrderedStreamMerge};
use dms_tool_runner::utils::{discover_files, format_bytes, format_duration, setup_logging};
use dms_tool_runner::{AbortSignal, Config, ParallelToolJob};

#[derive(Parser)]
#[command(name = "dms-tool-runner")]
#[command(about = "🧪 DMS Tool Runner - run an external analysis tool over input partitions and merge the results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split the input, run the tool once per part and combine the results
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Configuration file")]
        config: PathBuf,

        #[arg(short, long, help = "Input file to partition (e.g. MGF spectra)")]
        input: PathBuf,

        #[arg(short, long, help = "Combined result file")]
        output: PathBuf,

        #[arg(short, long, help = "Verbose output")]
        verbose: bool,

        #[arg(long, help = "Keep partitions, per-part results and console captures")]
        keep_intermediate: bool,
    },

    /// K-way merge of result files that are each sorted by block key
    Merge {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Configuration file")]
        config: PathBuf,

        #[arg(short, long, help = "Merged result file")]
        output: PathBuf,

        #[arg(short, long, help = "Verbose output")]
        verbose: bool,

        #[arg(required = true, help = "Result files, or directories searched for merge.input_suffix")]
        inputs: Vec<PathBuf>,
    },

    /// Concatenate result parts, keeping the header of the first part only
    Assemble {
        #[arg(long, default_value_t = 0, help = "Header lines at the top of every part")]
        header_lines: usize,

        #[arg(short, long, help = "Assembled result file")]
        output: PathBuf,

        #[arg(required = true, help = "Result parts in order")]
        inputs: Vec<PathBuf>,
    },

    /// Write a configuration file with default values
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            verbose,
            keep_intermediate,
        } => run(&config, &input, &output, verbose, keep_intermediate).await,
        Commands::Merge {
            config,
            output,
            verbose,
            inputs,
        } => merge(&config, &inputs, &output, verbose).await,
        Commands::Assemble {
            header_lines,
            output,
            inputs,
        } => {
            setup_logging("normal", None)?;
            let stats = assemble_files(&inputs, &output, header_lines)?;
            println!("✅ Assembled {} parts into {} ({} lines)", stats.parts, output.display(), stats.lines_written);
            Ok(())
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                return Err(anyhow::anyhow!(
                    "{} already exists; use --force to overwrite",
                    path.display()
                ));
            }
            Config::default().to_file(&path)?;
            println!("📄 Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path).await
    } else {
        println!("📄 Config file not found, creating default: {}", path.display());
        let default_config = Config::default();
        default_config.to_file(path)?;
        Ok(default_config)
    }
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let verbosity = if verbose { "verbose" } else { config.logging.verbosity.as_str() };
    setup_logging(verbosity, config.logging.log_file_path().as_deref())
}

async fn run(config_path: &Path, input: &Path, output: &Path, verbose: bool, keep_intermediate: bool) -> Result<()> {
    let mut config = load_or_create_config(config_path).await?;
    init_logging(&config, verbose)?;

    if keep_intermediate {
        config.job.keep_intermediate_files = true;
    }

    if !input.is_file() {
        return Err(anyhow::anyhow!("Input file does not exist: {}", input.display()));
    }

    println!("🧪 DMS Tool Runner");
    println!("🔍 Input: {} ({})", input.display(), format_bytes(std::fs::metadata(input)?.len()));
    println!("📝 Output: {}", output.display());
    println!("🔧 Tool: {}", config.tool.program);
    println!(
        "🧵 {} partitions, up to {} concurrent",
        config.job.partitions, config.pool.max_threads
    );

    let abort = AbortSignal::new();
    let abort_on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Shutdown signal received. Stopping workers...");
            abort_on_ctrl_c.abort();
        }
    });

    let job = ParallelToolJob::from_config(config)?.with_abort_signal(abort);
    let stats = job.run(input, output).await?;

    println!("\n🎉 Processing completed successfully! 🎉");
    println!("=======================================");
    println!("📊 Input records: {}", stats.input_records);
    println!("🧩 Partitions: {}", stats.partitions);
    if stats.attempts > 1 {
        println!("🔁 Attempts: {}", stats.attempts);
    }
    println!("⚙️ Tool time: {}", format_duration(stats.pool_elapsed.as_secs_f64()));
    if let Some(merge) = &stats.merge {
        println!("🔗 Blocks merged: {} ({} tied)", merge.blocks_written, merge.tied_blocks);
        if merge.order_violations > 0 || merge.malformed_sources > 0 {
            println!(
                "⚠️ {} order violations, {} malformed sources ({} lines appended unordered)",
                merge.order_violations, merge.malformed_sources, merge.unordered_lines
            );
        }
    }
    if let Some(assemble) = &stats.assemble {
        println!("📎 Lines assembled: {}", assemble.lines_written);
    }
    println!("🗑️ Intermediate files removed: {}", stats.intermediate_files_removed);
    println!("⏱️ Total time: {}", format_duration(stats.elapsed.as_secs_f64()));

    Ok(())
}

async fn merge(config_path: &Path, inputs: &[PathBuf], output: &Path, verbose: bool) -> Result<()> {
    let config = load_or_create_config(config_path).await?;
    init_logging(&config, verbose)?;

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = discover_files(input, &config.merge.input_suffix)?;
            info!("Found {} result files in {}", found.len(), input.display());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    if files.is_empty() {
        return Err(anyhow::anyhow!(
            "No files ending in '{}' found to merge",
            config.merge.input_suffix
        ));
    }

    println!("🔗 Merging {} files into {}", files.len(), output.display());

    let start_time = Instant::now();
    let merger = OrderedStreamMerge::new(config.merge)?;
    let stats = merger.merge_files(&files, output)?;

    println!("✅ Merged {} blocks ({} lines)", stats.blocks_written, stats.lines_written);
    if stats.malformed_sources > 0 {
        println!(
            "⚠️ {} malformed sources, {} lines appended unordered",
            stats.malformed_sources, stats.unordered_lines
        );
    }
    println!("⏱️ Total time: {}", format_duration(start_time.elapsed().as_secs_f64()));

    Ok(())
}
