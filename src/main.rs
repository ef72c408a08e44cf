//! avafs CLI - Command-line tool for Avalanche engine game resources.
//!
//! This is the main entry point for the avafs command-line application.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use avafs::common::hash::file_extension_hash;
use avafs::prelude::*;

/// avafs - Avalanche engine resource tool
#[derive(Parser)]
#[command(name = "avafs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing the game's .tab/.arc archives
    #[arg(short = 'd', long, global = true, env = "AVAFS_GAME_DIR")]
    game_dir: Option<PathBuf>,

    /// Dictionary JSON mapping resource names to archives
    #[arg(long, global = true, env = "AVAFS_DICTIONARY")]
    dictionary: Option<PathBuf>,

    /// Game the archives belong to (jc3 or jc4)
    #[arg(short, long, global = true, env = "AVAFS_GAME", default_value = "jc4")]
    game: Game,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a resource and write its bytes
    Read {
        /// Resource name
        name: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the dictionary as a tree
    Tree {
        /// Only show files whose name contains this text (case-sensitive)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List the entries of an archive table
    Table {
        /// Archive base name, e.g. "game0"
        archive: String,

        /// Filter pattern for resolved names (glob-style)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Load a stream archive in the background and print its contents
    Open {
        /// Stream archive resource name
        name: String,

        /// Only show files whose name contains this text (case-sensitive)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Extract every entry of one or more stream archives
    Unpack {
        /// Stream archive resource names
        #[arg(required = true)]
        names: Vec<String>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Read { name, output } => {
            cmd_read(&cli, name, output)?;
        }
        Commands::Tree { filter } => {
            cmd_tree(&cli, filter.as_deref())?;
        }
        Commands::Table { archive, filter } => {
            cmd_table(&cli, archive, filter.as_deref())?;
        }
        Commands::Open { name, filter } => {
            cmd_open(&cli, name, filter.as_deref())?;
        }
        Commands::Unpack { names, output } => {
            cmd_unpack(&cli, names, output)?;
        }
    }

    Ok(())
}

/// Build a resource manager from the global options.
fn open_resources(cli: &Cli) -> Result<ResourceManager> {
    let Some(game_dir) = &cli.game_dir else {
        bail!("no game directory given (use --game-dir or AVAFS_GAME_DIR)");
    };

    let mut resources = ResourceManager::new(game_dir);
    resources.set_flags(cli.game.flags());

    if let Some(path) = &cli.dictionary {
        let source = fs::read(path)
            .with_context(|| format!("Failed to read dictionary {}", path.display()))?;
        resources
            .load_dictionary(&source)
            .context("Failed to load dictionary")?;
        tracing::info!(path = %path.display(), "dictionary loaded");
    }

    Ok(resources)
}

/// Format handlers available to the CLI.
fn build_registry(
    resources: &Arc<ResourceManager>,
    loader: Arc<NestedArchiveLoader>,
) -> Result<FormatRegistry> {
    let mut registry = FormatRegistry::new();
    registry.register(Arc::new(FallbackHandler::new(Arc::clone(resources))))?;
    registry.register(loader)?;
    registry.validate()?;
    Ok(registry)
}

fn cmd_read(cli: &Cli, name: &str, output: &Path) -> Result<()> {
    let resources = Arc::new(open_resources(cli)?);
    let loader = Arc::new(NestedArchiveLoader::new(Arc::clone(&resources))?);
    let registry = build_registry(&resources, Arc::clone(&loader))?;

    // Bare stream archives carry no distinctive magic, so try the extension first.
    let handler = match registry.get_format_handler(file_extension_hash(name)) {
        Some(handler) => handler,
        None => match registry.get_format_handler_for_file(&resources, name) {
            Ok(handler) => handler,
            Err(e) => bail!("\"{name}\" cannot be opened: {e}"),
        },
    };
    println!("Opening {name} with the {} handler", handler.name());

    handler
        .load(name)
        .with_context(|| format!("\"{name}\" cannot be opened"))?;

    // Stream archives finish on the worker; tick until this one settles.
    while loader.state(name) == LoadState::Pending {
        if loader.update().is_none() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    let data = handler
        .save(name)
        .with_context(|| format!("\"{name}\" cannot be opened"))?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, &data).context("Failed to write output file")?;

    println!("Wrote {} bytes to {}", data.len(), output.display());

    Ok(())
}

fn cmd_tree(cli: &Cli, filter: Option<&str>) -> Result<()> {
    let resources = open_resources(cli)?;
    let Some(tree) = resources.dictionary_tree() else {
        bail!("no dictionary given (use --dictionary or AVAFS_DICTIONARY)");
    };

    print!("{}", tree.render(filter));
    println!("\nTotal: {} files", tree.file_count());

    Ok(())
}

fn cmd_table(cli: &Cli, archive: &str, filter: Option<&str>) -> Result<()> {
    let resources = open_resources(cli)?;
    let tab_path = resources.base_path().join(format!("{archive}.tab"));

    let data = fs::read(&tab_path)
        .with_context(|| format!("Failed to read {}", tab_path.display()))?;
    let layout = resources.flags().table_layout();
    let table = ArchiveTable::parse(&data, layout).context("Failed to parse archive table")?;

    let pattern = filter
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid glob pattern")?;

    let dictionary = resources.dictionary();
    let label = |hash: NameHash| -> String {
        dictionary
            .and_then(|d| d.name(hash))
            .map_or_else(|| hash.to_string(), str::to_owned)
    };

    let mut count = 0;
    for entry in table.entries() {
        let name = label(entry.name_hash);
        if let Some(pattern) = &pattern {
            if !glob_match(pattern, &name) {
                continue;
            }
        }

        println!(
            "{:>10x} {:>10} {:>10} {:<6} {}",
            entry.offset,
            entry.size,
            entry.uncompressed_size,
            format!("{:?}", entry.library),
            name
        );
        count += 1;
    }

    let blocks = match layout {
        TableLayout::Legacy => String::from("legacy layout"),
        TableLayout::Current => format!("{} compression blocks", table.blocks().len()),
    };
    println!("\nTotal: {count} entries ({blocks})");

    Ok(())
}

fn cmd_open(cli: &Cli, name: &str, filter: Option<&str>) -> Result<()> {
    let resources = Arc::new(open_resources(cli)?);
    let loader = NestedArchiveLoader::new(resources)?;

    let start = Instant::now();
    let state = loader
        .load(name)
        .with_context(|| format!("\"{name}\" cannot be opened"))?;

    if state == LoadState::Pending {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        spinner.set_message(format!("Decompressing {name}..."));

        let mut ticks = 0u64;
        loop {
            match loader.update() {
                Some(LoadOutcome::Ready(done)) if done == name => break,
                Some(LoadOutcome::Failed(done)) if done == name => {
                    spinner.finish_and_clear();
                    bail!("\"{name}\" cannot be opened: decompression failed");
                }
                _ => {}
            }
            ticks += 1;
            spinner.tick();
            std::thread::sleep(Duration::from_millis(16));
        }

        spinner.finish_and_clear();
        println!("Loaded in {:?} ({ticks} ticks)", start.elapsed());
    }

    let rendered = loader
        .with_archive(name, |archive| {
            format!(
                "{}\nTotal: {} entries",
                archive.tree().render(filter),
                archive.entries().len()
            )
        })
        .with_context(|| format!("\"{name}\" is not loaded"))?;
    println!("{rendered}");

    Ok(())
}

fn cmd_unpack(cli: &Cli, names: &[String], output: &Path) -> Result<()> {
    let resources = Arc::new(open_resources(cli)?);
    let loader = NestedArchiveLoader::new(resources)?;

    fs::create_dir_all(output)?;

    let pb = ProgressBar::new(names.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let results: Vec<_> = names
        .par_iter()
        .map(|name| {
            let target = output.join(name.replace('/', "_"));
            let result = loader.export_to(name, &target);
            pb.inc(1);
            (name, result)
        })
        .collect();
    pb.finish_with_message("Done");

    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(stats) => println!(
                "{name}: {} written, {} skipped",
                stats.written, stats.skipped
            ),
            Err(e) => {
                eprintln!("Error unpacking {name}: {e}");
                failed += 1;
            }
        }
    }

    println!("Unpacked in {:?}", start.elapsed());

    if failed > 0 {
        bail!("{failed} of {} archives could not be unpacked", names.len());
    }

    Ok(())
}

/// Case-insensitive glob match; `*` also crosses `/`.
fn glob_match(pattern: &glob::Pattern, name: &str) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    pattern.matches_with(name, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        glob_match(&glob::Pattern::new(pattern).unwrap(), name)
    }

    #[test]
    fn test_glob_match() {
        assert!(matches("*.ee", "locations/world.ee"));
        assert!(matches("models/*", "Models/foo.mesh"));
        assert!(!matches("*.ee", "locations/world.ee.toc"));
        assert!(!matches("models/*", "textures/models/foo"));
    }

    #[test]
    fn test_glob_match_anchors_last_part_at_end() {
        assert!(matches("*a", "aa"));
        assert!(matches("*.ee", "locations/a.ee.dir/b.ee"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "avafs",
            "--game-dir",
            "/tmp/game",
            "--game",
            "jc3",
            "table",
            "game0",
        ])
        .unwrap();

        assert_eq!(cli.game, Game::JustCause3);
        assert!(matches!(cli.command, Commands::Table { ref archive, .. } if archive == "game0"));
    }
}
