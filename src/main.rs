use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};

use specdex::config::Settings;
use specdex::documents::{Discovery, DocumentParser, MetadataValidator, TreeNode};
use specdex::indexing::{BulkLoader, LoadReport};
use specdex::registry::Registry;
use specdex::watcher::ChangeWatcher;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(name = "specdex", version)]
#[command(about = "Index hierarchical spec documents and keep them live")]
#[command(styles = clap_cargo_style())]
struct Cli {
    /// Settings file (defaults to .specdex/settings.toml in an ancestor)
    #[arg(long, global = true, env = "SPECDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Document root, repeatable (overrides configured roots)
    #[arg(short, long = "root", global = true)]
    roots: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .specdex/settings.toml
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Print the document tree
    Tree {
        /// Emit JSON instead of an indented outline
        #[arg(long)]
        json: bool,
    },

    /// Print one document with its hierarchy
    Show { id: String },

    /// Report load failures, orphans and parent cycles
    Check,

    /// Load, then keep watching for changes until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return init(force);
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("loading settings")?;
    if !cli.roots.is_empty() {
        let cwd = std::env::current_dir().context("resolving --root")?;
        settings.override_roots(&cli.roots, &cwd);
    }

    specdex::logging::init_with_config(&settings.logging);

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let registry = Arc::new(Registry::with_event_capacity(
        settings.registry.event_capacity,
    ));
    let parser = DocumentParser::new(MetadataValidator::new(settings.taxonomy.clone()));
    let discovery = Discovery::new(&settings.discovery);
    let roots = settings.resolved_roots();

    let loader = BulkLoader::new(discovery.clone(), parser.clone(), settings.indexing.clone());
    let report = loader
        .load_all(&roots, &registry)
        .context("loading documents")?;

    match cli.command {
        Commands::Tree { json } => {
            let forest = registry.get_tree();
            if json {
                println!("{}", serde_json::to_string_pretty(&forest)?);
            } else {
                for node in &forest {
                    print_node(node, 0);
                }
            }
        }
        Commands::Show { id } => {
            let Some(doc) = registry.get(&id) else {
                bail!("no document with id {id}");
            };
            let hierarchy = registry.hierarchy(&id);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "document": doc,
                    "hierarchy": hierarchy,
                }))?
            );
        }
        Commands::Check => {
            print_report(&report);
            for warning in registry.diagnostics() {
                println!("warning: {warning}");
            }
            if !report.failures.is_empty() {
                bail!("{} documents failed to load", report.failures.len());
            }
        }
        Commands::Watch => {
            print_summary(&report);
            let watcher = ChangeWatcher::builder()
                .registry(Arc::clone(&registry))
                .parser(parser)
                .discovery(discovery)
                .config(&settings.watcher)
                .build()?;
            watcher.start_watching(&roots)?;
            eprintln!("Watching {} roots, press Ctrl-C to stop", roots.len());

            let mut events = registry.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(event) => println!("{} {}", event.kind(), event.id()),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            eprintln!("skipped {n} events");
                        }
                        Err(_) => break,
                    },
                }
            }

            watcher.stop().await;
            let stats = watcher.stats();
            eprintln!(
                "Stopped: {} reparsed, {} upserted, {} deleted, {} parse failures",
                stats.reparsed(),
                stats.upserted(),
                stats.deleted(),
                stats.parse_failures()
            );
        }
        Commands::Init { .. } | Commands::Config => {}
    }

    Ok(())
}

fn init(force: bool) -> Result<()> {
    let config_path = PathBuf::from(".specdex").join("settings.toml");
    if config_path.exists() && !force {
        bail!(
            "configuration already exists at {}, use --force to overwrite",
            config_path.display()
        );
    }

    Settings::default().save(&config_path)?;
    println!("Created configuration file at: {}", config_path.display());
    Ok(())
}

fn print_node(node: &TreeNode, depth: usize) {
    let doc = &node.document;
    let marker = if node.orphan { " (orphan)" } else { "" };
    println!(
        "{}{} [{}] {} ({}){marker}",
        "  ".repeat(depth),
        doc.id(),
        doc.metadata.document_type,
        doc.metadata.title,
        doc.metadata.status
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn print_summary(report: &LoadReport) {
    eprintln!(
        "Loaded {} of {} documents in {:?}",
        report.loaded, report.discovered, report.elapsed
    );
}

fn print_report(report: &LoadReport) {
    print_summary(report);
    for (path, error) in &report.failures {
        println!("error: {}: {error}", path.display());
    }
    for (id, path) in &report.duplicate_ids {
        println!("warning: duplicate id {id} in {}", path.display());
    }
}
