//! CLI command handlers.

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::catalog::ViewCatalog;
use crate::engine::arg_parser::{Cli, Commands, ReindexCommand};
use crate::engine::db_ops::{DbConfig, open_db, open_db_or_detect_encrypted};
use crate::engine::pump::PumpOutcome;
use crate::engine::progress::{create_counter, finish_counter, set_counter};
use crate::pipeline::{ReindexContext, ReindexController};
use crate::predicate::{Predicate, SearchRequest};
use crate::router::route;
use crate::search::{SearchContext, search};
use crate::sink::{Framing, HttpSink};
use crate::utils::config::JobConsts;
use crate::utils::{
    Colors, SettingsToml, apply_file_to_opts, catalog_from_file, get_passphrase,
    load_settings_toml, setup_logging,
};
use crate::{IterationParams, Opts, ReindexJob};

/// Defaults, then `.invstream.toml`, then CLI flags.
fn setup_opts(cli: &Cli, file: Option<&SettingsToml>, dir: &Path) -> Opts {
    let mut opts = Opts::default();
    if let Some(file) = file {
        apply_file_to_opts(file, &mut opts);
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    if let Some(x) = cli.encrypt {
        opts.encrypt = x;
    }
    if let Some(n) = cli.batch_size {
        opts.batch_size = n.max(1);
    }
    opts.db_path = Some(cli.db_path(opts.db_path.as_deref(), dir));
    setup_logging(opts.verbose);
    opts
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    let dir = std::env::current_dir().context("current directory")?;
    let file = load_settings_toml(&dir);
    let opts = setup_opts(cli, file.as_ref(), &dir);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), opts);
    let catalog = catalog_from_file(file.as_ref())?;

    match &cli.command {
        Commands::Route { query } => handle_route(&catalog, query),
        Commands::Search {
            query,
            limit,
            offset,
            http,
        } => {
            let mut request = parse_request(query)?;
            if limit.is_some() {
                request.limit = *limit;
            }
            if let Some(offset) = offset {
                request.offset = *offset;
            }
            let db = open_store(&opts, &dir)?;
            handle_search(catalog, db, &opts, &request, *http)
        }
        Commands::Reindex { action } => {
            let db = open_store(&opts, &dir)?;
            handle_reindex(&db, &opts, action)
        }
    }
}

/// Open (creating if needed) the database and return how to reconnect to it.
fn open_store(opts: &Opts, dir: &Path) -> Result<DbConfig> {
    let path = opts
        .db_path
        .clone()
        .ok_or_else(|| anyhow!("no database path"))?;
    let passphrase = if opts.encrypt {
        let pass = get_passphrase(dir, !path.exists())?;
        open_db(&path, Some(pass.as_str()))?;
        Some(pass)
    } else {
        open_db_or_detect_encrypted(&path, dir)?.1
    };
    Ok(DbConfig::new(path).with_passphrase(passphrase))
}

/// Query text: inline JSON or `@FILE`. Either a full search request or a bare predicate.
fn parse_request(query: &str) -> Result<SearchRequest> {
    let text = match query.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => query.to_string(),
    };
    if let Ok(request) = serde_json::from_str::<SearchRequest>(&text) {
        return Ok(request);
    }
    let predicate: Predicate = serde_json::from_str(&text).context("parse query")?;
    Ok(SearchRequest::new(predicate))
}

fn handle_route(catalog: &ViewCatalog, query: &str) -> Result<()> {
    let request = parse_request(query)?;
    let routed = route(catalog, &request)?;
    println!("scope:  {}", routed.scope_level);
    println!("view:   {}", routed.view_name);
    println!("where:  {}", routed.where_clause);
    println!("sql:    {}", routed.sql);
    for (i, p) in routed.params.iter().enumerate() {
        println!("?{}:     {:?}", i + 1, p);
    }
    Ok(())
}

fn handle_search(
    catalog: ViewCatalog,
    db: DbConfig,
    opts: &Opts,
    request: &SearchRequest,
    http: bool,
) -> Result<()> {
    let framing = if http {
        Framing::Chunked
    } else {
        Framing::Identity
    };
    let mut sink = HttpSink::new(io::stdout(), framing, opts.http_watermarks)?;
    let ctx = SearchContext {
        catalog,
        db,
        batch_size: opts.batch_size,
    };
    let report = search(&ctx, request, &mut sink)?;
    if !http {
        println!();
    }
    info!(
        "{} rows ({})",
        report.rows_emitted,
        report.outcome.label().to_lowercase()
    );
    if matches!(
        report.outcome,
        PumpOutcome::FailedBeforeStart(_) | PumpOutcome::FailedMidStream(_)
    ) {
        return Err(anyhow!("search failed: {}", report.outcome.label()));
    }
    Ok(())
}

fn handle_reindex(db: &DbConfig, opts: &Opts, action: &ReindexCommand) -> Result<()> {
    let controller = ReindexController::new(ReindexContext::from_opts(db, opts)?);
    match action {
        ReindexCommand::Start { resource, wait } => {
            let job = controller.start((*resource).into())?;
            print_job(&job);
            let finished = follow_job(&controller, &job.id, *wait)?;
            print_job(&finished);
        }
        ReindexCommand::Iterate {
            topic,
            event_type,
            wait,
        } => {
            let mut params = IterationParams::new(topic);
            if let Some(event_type) = event_type {
                params = params.with_event_type(event_type);
            }
            let job = controller.start_iteration(&params)?;
            print_job(&job);
            let finished = follow_job(&controller, &job.id, *wait)?;
            print_job(&finished);
        }
        ReindexCommand::Cancel { id } => print_job(&controller.cancel(id)?),
        ReindexCommand::Get { id } => print_job(&controller.get(id)?),
        ReindexCommand::List => {
            let jobs = controller.list()?;
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in &jobs {
                print_job(job);
            }
        }
    }
    Ok(())
}

/// The pass lives in this process: poll until it ends, turning Ctrl+C into a cancel request.
fn follow_job(controller: &ReindexController, job_id: &str, show_progress: bool) -> Result<ReindexJob> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("Ctrl+C handler not installed: {}", e);
    }
    let counter = show_progress.then(|| create_counter("Published"));
    let mut cancel_sent = false;

    loop {
        let job = controller.get(job_id)?;
        if let Some(pb) = &counter {
            set_counter(pb, job.published);
        }
        if job.job_status.is_terminal() {
            break;
        }
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            warn!("Interrupted: cancelling job {}", job_id);
            controller.cancel(job_id)?;
            cancel_sent = true;
        }
        thread::sleep(Duration::from_millis(JobConsts::WAIT_POLL_MS));
    }

    let job = controller.wait(job_id)?;
    if let Some(pb) = &counter {
        finish_counter(pb, job.published);
    }
    Ok(job)
}

fn print_job(job: &ReindexJob) {
    println!(
        "{}  {:<9}  {:<9}  {}  {}  published={}  submitted={}{}",
        job.id,
        job.kind.as_str(),
        job.resource_name.as_str(),
        job.topic_name,
        Colors::status(job.job_status),
        job.published,
        job.submitted_date,
        if job.cancel_requested && !job.job_status.is_terminal() {
            "  (cancel requested)"
        } else {
            ""
        }
    );
}
