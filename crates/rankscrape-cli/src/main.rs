//! rankscrape: command-line entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{info, warn};

use rankscrape::config::{resolve_dataset_path, ScraperConfig};
use rankscrape::orchestrator::{Orchestrator, RunMode};
use rankscrape::parser::{parse_page, ExtractedPage};
use rankscrape::renderer::chromium::ChromiumLauncher;
use rankscrape::renderer::BrowserLauncher;
use rankscrape::resolver::EntityDirectory;
use rankscrape::retriever::PageRetriever;
use rankscrape::session::capture_from_endpoint;
use rankscrape::store::{slugify_name, DocumentStore};
use rankscrape::{BrowserController, Entity, PageType, RunReport};

#[derive(Parser)]
#[command(
    name = "rankscrape",
    about = "Download and parse university profile pages through a controlled Chromium",
    version
)]
struct Cli {
    /// Config file (JSON). Falls back to RANKSCRAPE_CONFIG, then ./rankscrape.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// University dataset (JSON array).
    #[arg(long, global = true)]
    dataset: Option<String>,

    /// Directory for downloaded documents.
    #[arg(long, global = true)]
    downloads: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,

    /// Attach to a running Chrome instead of launching one.
    #[arg(long, global = true)]
    attach: bool,

    /// Copy the logged-in session from the Chrome on the debug endpoint.
    #[arg(long, global = true)]
    transplant_session: bool,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List universities in dataset order.
    List,

    /// Download the pages of one university.
    Download {
        /// University name, exact or partial.
        name: String,

        /// Page types to fetch (comma separated). Defaults to all.
        #[arg(long, value_delimiter = ',')]
        pages: Vec<String>,
    },

    /// Download the pages of every university in the dataset.
    DownloadAll {
        /// Page types to fetch (comma separated). Defaults to all.
        #[arg(long, value_delimiter = ',')]
        pages: Vec<String>,

        /// Skip this many universities from the start of the dataset.
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Stop after this many universities.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show which pages are stored for each university.
    Status,

    /// Parse one stored page into a JSON record.
    Parse {
        /// Page type, e.g. applying or campus-info.
        page_type: String,

        /// University name, exact or partial.
        name: String,

        /// Output directory for JSON records.
        #[arg(long, default_value = "data/extracted")]
        output: PathBuf,
    },

    /// Parse one page type for every university that has it stored.
    ParseAll {
        /// Page type, e.g. applying or campus-info.
        page_type: String,

        /// Output directory for JSON records.
        #[arg(long, default_value = "data/extracted")]
        output: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   rankscrape completions bash > ~/.local/share/bash-completion/completions/rankscrape
    ///   rankscrape completions zsh > ~/.zfunc/_rankscrape
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        if cli.json {
            println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "rankscrape", &mut std::io::stdout());
        return Ok(());
    }

    let config = effective_config(cli)?;
    let dataset_path = resolve_dataset_path(cli.dataset.as_deref());
    let directory = EntityDirectory::load(&dataset_path)?;
    let store = DocumentStore::new(&config.retriever.downloads_dir);

    match &cli.command {
        Commands::List => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(directory.list_all())?);
            } else {
                for (i, e) in directory.list_all().iter().enumerate() {
                    println!("{:>4}. {} ({})", i + 1, e.name, e.profile_segment());
                }
                println!("\n{} universities", directory.len());
            }
        }

        Commands::Download { name, pages } => {
            let entity = directory.resolve(name)?;
            info!("Resolved '{name}' to {}", entity.name);
            let pages = select_pages(pages)?;
            let report = download(&config, &[entity], &pages, RunMode::Single).await;
            print_report(&report, cli.json)?;
        }

        Commands::DownloadAll { pages, skip, limit } => {
            let pages = select_pages(pages)?;
            let entities: Vec<Entity> = directory
                .list_all()
                .iter()
                .skip(*skip)
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            let report = download(&config, &entities, &pages, RunMode::All).await;
            print_report(&report, cli.json)?;
        }

        Commands::Status => {
            let statuses = store.status(directory.list_all(), &PageType::ALL);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                let complete = statuses.iter().filter(|s| s.is_complete()).count();
                for s in statuses.iter().filter(|s| !s.present.is_empty()) {
                    let missing: Vec<String> = s.missing.iter().map(|p| p.to_string()).collect();
                    println!(
                        "{:<50} {}/{}{}",
                        s.name,
                        s.present.len(),
                        PageType::ALL.len(),
                        if missing.is_empty() {
                            String::new()
                        } else {
                            format!("  missing: {}", missing.join(", "))
                        }
                    );
                }
                println!(
                    "\n{complete} of {} universities complete ({})",
                    statuses.len(),
                    store.root().display()
                );
            }
        }

        Commands::Parse {
            page_type,
            name,
            output,
        } => {
            let page_type = parsable(page_type)?;
            let entity = directory.resolve(name)?;
            let markup = store.read_document(&entity, page_type)?;
            let Some(record) = parse_page(page_type, &markup) else {
                bail!("no data found in the {page_type} page of {}", entity.name);
            };
            let extracted = ExtractedPage {
                university_name: entity.name.clone(),
                extracted_at: chrono::Utc::now(),
                record,
            };
            let path = write_extracted(output, &entity, &extracted)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&extracted)?);
            } else {
                println!("Wrote {}", path.display());
            }
        }

        Commands::ParseAll { page_type, output } => {
            let page_type = parsable(page_type)?;
            let (mut parsed, mut empty, mut missing) = (0usize, 0usize, 0usize);
            for entity in directory.list_all() {
                if !store.has_document(entity, page_type) {
                    missing += 1;
                    continue;
                }
                let markup = store.read_document(entity, page_type)?;
                match parse_page(page_type, &markup) {
                    Some(record) => {
                        let extracted = ExtractedPage {
                            university_name: entity.name.clone(),
                            extracted_at: chrono::Utc::now(),
                            record,
                        };
                        write_extracted(output, entity, &extracted)?;
                        parsed += 1;
                    }
                    None => {
                        warn!(entity = %entity.name, page = %page_type, "No data found");
                        empty += 1;
                    }
                }
            }
            if cli.json {
                let summary = serde_json::json!({
                    "page_type": page_type,
                    "parsed": parsed,
                    "empty": empty,
                    "missing": missing,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Parsed {parsed}, no data {empty}, not downloaded {missing}");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Config file plus command-line overrides.
fn effective_config(cli: &Cli) -> anyhow::Result<ScraperConfig> {
    let mut config = ScraperConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.downloads {
        config.retriever.downloads_dir = dir.clone();
    }
    if cli.headed {
        config.browser.headless = false;
    }
    if cli.attach {
        config.browser.attach_existing = true;
    }
    if cli.transplant_session {
        config.session.transplant = true;
    }
    Ok(config)
}

fn select_pages(names: &[String]) -> anyhow::Result<Vec<PageType>> {
    if names.is_empty() {
        return Ok(PageType::ALL.to_vec());
    }
    let pages = names
        .iter()
        .map(|n| n.parse::<PageType>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PageType::canonical_order(&pages))
}

fn parsable(name: &str) -> anyhow::Result<PageType> {
    let page_type: PageType = name.parse()?;
    if page_type == PageType::Main {
        bail!("the main page has no parser");
    }
    Ok(page_type)
}

fn write_extracted(
    output: &Path,
    entity: &Entity,
    extracted: &ExtractedPage,
) -> anyhow::Result<PathBuf> {
    let dir = output.join(extracted.record.page_type().to_string());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", slugify_name(&entity.name)));
    std::fs::write(&path, serde_json::to_vec_pretty(extracted)?)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}

async fn download(
    config: &ScraperConfig,
    entities: &[Entity],
    pages: &[PageType],
    mode: RunMode,
) -> RunReport {
    let launcher: Arc<dyn BrowserLauncher> = Arc::new(ChromiumLauncher);

    let session = if config.session.transplant {
        let state =
            capture_from_endpoint(launcher.clone(), &config.browser, &config.session).await;
        info!(
            cookies = state.cookie_count(),
            storage = state.storage_count(),
            "Session captured"
        );
        Some(state)
    } else {
        None
    };

    let controller = BrowserController::new(launcher, config.browser.clone());
    let retriever = PageRetriever::new(
        DocumentStore::new(&config.retriever.downloads_dir),
        config.retriever.clone(),
        config.session.clone(),
    );
    let mut orchestrator = Orchestrator::new(controller, retriever, config.orchestrator.clone());
    if let Some(state) = session {
        orchestrator = orchestrator.with_session(state);
    }

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current university");
            token.cancel();
        }
    });

    let report = orchestrator.run(entities, pages, mode).await;
    orchestrator.shutdown().await;
    report
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Universities: {}", report.entities_attempted);
    println!("  Saved:            {}", report.saved);
    println!("  Unchanged:        {}", report.skipped_duplicate);
    println!("  Already complete: {}", report.skipped_already_complete);
    println!("  Failed:           {}", report.failed);
    if let Some(rate) = report.success_rate() {
        println!("  Success rate:     {rate:.1}%");
    }
    for r in report.results.iter().filter(|r| r.error_detail.is_some()) {
        println!(
            "  {} / {}: {}",
            r.entity,
            r.page_type,
            r.error_detail.as_deref().unwrap_or_default()
        );
    }
    if report.interrupted {
        println!("Interrupted; results are partial.");
    }
    Ok(())
}
