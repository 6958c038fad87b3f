use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bomgraph::batch::{BatchJobManager, JobKind};
use bomgraph::cache::Caches;
use bomgraph::db::{migrate, Db};
use bomgraph::ontology::GraphRenderer;
use bomgraph::search::coordinator::SearchCoordinator;
use bomgraph::search::{engine, parse_spec_text, SearchQuery};
use bomgraph::{store, Config, TargetSyntax};

#[derive(Parser, Debug)]
#[command(name = "bomgraph")]
#[command(about = "BOM semantic-graph export and similarity search")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one item's BOM and render it as a semantic graph
    Export {
        /// Root item code
        item_code: String,

        /// Target syntax: rdfxml, turtle, ntriples or jsonld
        #[arg(short, long, default_value = "rdfxml")]
        syntax: String,

        /// Depth bound for resolution (0 = unbounded)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Write the document to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rank catalog items by spec similarity
    Search {
        /// Spec text, e.g. "series: CA2; bore: 050; stroke: 100"
        spec: String,

        /// Minimum score to include (overrides config)
        #[arg(long)]
        min_score: Option<f64>,

        /// Maximum number of matches (overrides config)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Abort the search after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Export every catalog item through the batch worker pool
    BatchExport {
        /// Target syntax for every document
        #[arg(short, long, default_value = "rdfxml")]
        syntax: String,

        /// Depth bound for resolution (0 = unbounded)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Directory the rendered documents are written into
        #[arg(short, long, default_value = "exports")]
        output_dir: PathBuf,
    },

    /// Load items and BOM relations from a JSON file
    Load {
        /// JSON file with "items" and "components" arrays
        file: PathBuf,
    },

    /// Verify database schema
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let db = Db::new(config.db_path());
    db.with_connection(migrate::run_migrations).await?;

    match cli.command {
        Command::Export {
            item_code,
            syntax,
            max_depth,
            output,
        } => run_export(&config, &db, &item_code, &syntax, max_depth, output).await,
        Command::Search {
            spec,
            min_score,
            limit,
            timeout_secs,
        } => run_search(&config, db, &spec, min_score, limit, timeout_secs).await,
        Command::BatchExport {
            syntax,
            max_depth,
            output_dir,
        } => run_batch_export(&config, db, &syntax, max_depth, output_dir).await,
        Command::Load { file } => run_load(&db, &file).await,
        Command::Verify => run_schema_verification(&db).await,
    }
}

async fn run_export(
    config: &Config,
    db: &Db,
    item_code: &str,
    syntax: &str,
    max_depth: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let syntax: TargetSyntax = syntax.parse()?;
    let max_depth = max_depth.unwrap_or(config.resolver.default_max_depth);
    let caches = Caches::new(&config.cache);
    let renderer = GraphRenderer;

    let document = engine::export(db, &renderer, &caches, item_code, syntax, max_depth).await?;
    match output {
        Some(path) => {
            std::fs::write(&path, document.as_bytes())?;
            log::info!("Wrote {} as {} to {}", item_code, syntax, path.display());
        }
        None => print!("{}", document),
    }
    Ok(())
}

async fn run_search(
    config: &Config,
    db: Db,
    spec_text: &str,
    min_score: Option<f64>,
    limit: Option<usize>,
    timeout_secs: u64,
) -> Result<()> {
    let spec = parse_spec_text(spec_text);
    if spec.is_empty() {
        anyhow::bail!(
            "No spec fields recognized in {:?}. Expected \"key: value\" pairs separated by ';'.",
            spec_text
        );
    }

    let caches = Arc::new(Caches::new(&config.cache));
    let coordinator = SearchCoordinator::new(Arc::new(db), caches, config.search.clone());
    let query = SearchQuery {
        spec,
        min_score,
        limit,
    };
    let search_id = coordinator.start(query, Duration::from_secs(timeout_secs));

    // Poll until the spawned search lands, echoing progress to stderr
    let outcome = loop {
        if let Some(outcome) = coordinator.result(&search_id)? {
            break outcome;
        }
        if let Some(progress) = coordinator.poll(&search_id) {
            log::info!(
                "Search {:?}: {}/{} scored, {} matched",
                progress.current_phase,
                progress.processed_items,
                progress.total_items,
                progress.found_matches
            );
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_batch_export(
    config: &Config,
    db: Db,
    syntax: &str,
    max_depth: Option<usize>,
    output_dir: PathBuf,
) -> Result<()> {
    let syntax: TargetSyntax = syntax.parse()?;
    let max_depth = max_depth.unwrap_or(config.resolver.default_max_depth);
    std::fs::create_dir_all(&output_dir)?;

    let db = Arc::new(db);
    let caches = Arc::new(Caches::new(&config.cache));
    let item_codes = store::list_item_codes(&db).await?;
    if item_codes.is_empty() {
        log::warn!("Catalog is empty, nothing to export");
        return Ok(());
    }
    log::info!(
        "Exporting {} items as {} into {}",
        item_codes.len(),
        syntax,
        output_dir.display()
    );

    let manager = BatchJobManager::new(&config.batch, Some(Arc::clone(&db)), Some(Arc::clone(&caches)));
    let extension = file_extension(syntax);

    let worker_db = Arc::clone(&db);
    let worker_caches = Arc::clone(&caches);
    let worker_dir = output_dir.clone();
    let job_id = manager.submit(JobKind::ExportAll, item_codes, move |item_code| {
        let db = Arc::clone(&worker_db);
        let caches = Arc::clone(&worker_caches);
        let path = worker_dir.join(format!("{}.{}", item_code, extension));
        async move {
            let document =
                engine::export(&db, &GraphRenderer, &caches, &item_code, syntax, max_depth).await?;
            std::fs::write(&path, document.as_bytes())?;
            Ok(())
        }
    });
    manager.start(&job_id)?;

    let snapshot = loop {
        let snapshot = manager
            .snapshot(&job_id)
            .ok_or_else(|| anyhow::anyhow!("batch job {} disappeared", job_id))?;
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        log::info!(
            "Batch export {:.0}% ({}/{})",
            snapshot.percent_complete,
            snapshot.processed_items,
            snapshot.total_items
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    log::info!(
        "Batch export finished: {:?}, {} succeeded, {} failed",
        snapshot.status,
        snapshot.success_count,
        snapshot.failure_count
    );
    for failure in &snapshot.item_failures {
        log::warn!("  {}: {}", failure.item_id, failure.error);
    }
    if let Some(detail) = snapshot.error_detail {
        anyhow::bail!("Batch export aborted: {}", detail);
    }
    if snapshot.failure_count > 0 {
        return Err(bomgraph::BomGraphError::PartialFailure {
            failed: snapshot.failure_count,
            total: snapshot.total_items,
        }
        .into());
    }
    Ok(())
}

fn file_extension(syntax: TargetSyntax) -> &'static str {
    match syntax {
        TargetSyntax::RdfXml => "rdf",
        TargetSyntax::Turtle => "ttl",
        TargetSyntax::NTriples => "nt",
        TargetSyntax::JsonLd => "jsonld",
    }
}

#[derive(serde::Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<CatalogItem>,
    #[serde(default)]
    components: Vec<CatalogComponent>,
}

#[derive(serde::Deserialize)]
struct CatalogItem {
    item_code: String,
    item_name: String,
    spec_text: Option<String>,
    characteristic_code: Option<String>,
}

#[derive(serde::Deserialize)]
struct CatalogComponent {
    parent_code: String,
    component_code: String,
    quantity: f64,
    effective_date: Option<chrono::NaiveDate>,
    expiry_date: Option<chrono::NaiveDate>,
    characteristic_code: Option<String>,
    #[serde(default)]
    seq: i64,
}

async fn run_load(db: &Db, file: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let catalog: CatalogFile = serde_json::from_str(&raw)?;
    log::info!(
        "Loading {} items and {} relations from {}",
        catalog.items.len(),
        catalog.components.len(),
        file.display()
    );

    for item in &catalog.items {
        store::upsert_item(
            db,
            &item.item_code,
            &item.item_name,
            item.spec_text.as_deref(),
            item.characteristic_code.as_deref(),
        )
        .await?;
    }
    for component in &catalog.components {
        store::insert_component(
            db,
            &component.parent_code,
            &component.component_code,
            component.quantity,
            component.effective_date,
            component.expiry_date,
            component.characteristic_code.as_deref(),
            component.seq,
        )
        .await?;
    }

    log::info!("Catalog load complete");
    Ok(())
}

/// Verify that all expected database objects exist
async fn run_schema_verification(db: &Db) -> Result<()> {
    use bomgraph::error::BomGraphError;

    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = vec!["batch_checkpoints", "bom_components", "items", "schema_migrations"];
        let mut all_tables_exist = true;

        for table in &expected_tables {
            if !tables.iter().any(|t| t == table) {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            } else {
                log::debug!("✓ Table exists: {}", table);
            }
        }

        if !all_tables_exist {
            return Err(BomGraphError::Config(
                "Not all required tables exist".to_string(),
            ));
        }

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.len() < 2 {
            return Err(BomGraphError::Config(format!(
                "Expected at least 2 migrations, found {}",
                applied.len()
            )));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
        )?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for index_name in &["idx_bom_components_parent", "idx_items_created_at"] {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                log::warn!("Index not found: {}", index_name);
            }
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(BomGraphError::Config(format!(
                "Journal mode is not WAL: {}",
                journal_mode
            )));
        }
        log::debug!("✓ Journal mode: WAL");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(BomGraphError::Config(format!(
                "Database integrity check failed: {}",
                integrity
            )));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })
    .await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
