//! acl-crawler - Queue-driven recursive ACL crawler
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use console::{style, Term};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use acl_crawler::config::{CliArgs, Command, QueueSettings, WorkerArgs, WorkerConfig};
use acl_crawler::context::SharedClients;
use acl_crawler::coordinator::{Coordinator, SystemStatus};
use acl_crawler::crawler::crawl_in_process;
use acl_crawler::item::CreateWorkItem;
use acl_crawler::progress::{print_summary, ProgressReporter};
use acl_crawler::queue::WorkQueue;
use acl_crawler::sink::open_sink;
use acl_crawler::store::{HierarchicalStore, LocalStore};
use acl_crawler::worker::{MessageHandler, QueueWorker, WorkerProgress};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    // Handle Ctrl+C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown_clone.load(Ordering::Relaxed) {
            eprintln!("\nForce shutdown!");
            std::process::exit(130);
        }
        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let settings = QueueSettings::from_args(&args).context("Invalid configuration")?;

    match args.command.clone() {
        Command::Seed { root } => {
            let clients = SharedClients::new(settings, args.store_root.clone(), None);
            let ack = clients
                .seed_dispatcher()
                .await?
                .dispatch(&root)
                .await
                .with_context(|| format!("Failed to seed {}", root))?;
            println!("{}", ack);
        }

        Command::Work { output, worker } => {
            let clients = SharedClients::new(settings, args.store_root.clone(), output.clone());
            let queue = clients.visit_queue().await?;
            let handler = Arc::new(clients.visit_handler().await?);

            eprintln!(
                "{} Crawling '{}' from {}",
                style("[Worker]").cyan().bold(),
                style(queue.name()).green(),
                style(clients.store().await?.describe()).yellow()
            );
            eprintln!("  Output: {}", style(clients.sink().await?.describe()).yellow());
            eprintln!("  Redis: {}", style(&args.redis).dim());

            let summary = (!writes_stdout(output.as_deref())).then_some("Crawl Worker Complete");
            run_worker(queue, handler, &worker, args.quiet, shutdown, summary).await?;
        }

        Command::Crawl {
            root,
            output,
            concurrency,
            max_deliveries,
        } => {
            run_crawl(
                &args,
                &root,
                output,
                concurrency,
                max_deliveries,
                settings.lease,
                shutdown,
            )
            .await?
        }

        Command::Create {
            path,
            max_depth,
            dir_count,
            dir_pattern,
            file_count,
            acl_count,
            create_files,
            create_acls,
            file_pattern,
        } => {
            let mut item = CreateWorkItem::root(path, max_depth, dir_count, &dir_pattern);
            item.file_count = file_count;
            item.acl_count = acl_count;
            item.create_files = create_files;
            item.create_acls = create_acls;
            item.file_pattern = file_pattern;
            item.validate_pattern()?;

            let clients = SharedClients::new(settings, args.store_root.clone(), None);
            let queue = clients.create_queue().await?;
            queue.enqueue(&item.to_json()?).await?;

            println!(
                "{} Queued tree under {} ({} levels x {} dirs) on '{}'",
                style("[Create]").cyan().bold(),
                style(&item.path).green(),
                item.max_depth,
                item.dir_count,
                queue.name()
            );
        }

        Command::Build { worker, halt } => {
            let clients = SharedClients::new(settings, args.store_root.clone(), None);
            let queue = clients.create_queue().await?;
            let builder = clients.tree_builder().await?;
            if halt {
                builder.halt_flag().store(true, Ordering::SeqCst);
                println!(
                    "{} Tree builder halted; create items will be drained without effect",
                    style("Warning:").yellow().bold()
                );
            }

            println!(
                "{} Building trees from '{}' into {}",
                style("[Builder]").cyan().bold(),
                style(queue.name()).green(),
                style(clients.store().await?.describe()).yellow()
            );

            run_worker(
                queue,
                Arc::new(builder),
                &worker,
                args.quiet,
                shutdown,
                Some("Build Worker Complete"),
            )
            .await?;
        }

        Command::Serve { bind } => {
            let clients = Arc::new(SharedClients::new(settings, args.store_root.clone(), None));
            acl_crawler::server::serve(clients, &bind, shutdown).await?;
        }

        Command::Status {
            watch,
            interval,
            format,
        } => run_status(settings, watch, interval, &format, shutdown).await?,

        Command::Redrive { queue, list, limit } => {
            let clients = SharedClients::new(settings, args.store_root.clone(), None);
            let coordinator = Coordinator::new(vec![
                clients.visit_queue().await?,
                clients.create_queue().await?,
            ]);
            let name = queue.unwrap_or_else(|| clients.settings().visit_queue.clone());

            if list {
                let letters = coordinator.dead_letters(&name, limit).await?;
                if letters.is_empty() {
                    println!("No dead-lettered messages on '{}'.", name);
                }
                for letter in letters {
                    println!(
                        "{} {}\n    {} {}",
                        style(&letter.message_id).dim(),
                        letter.body,
                        style("reason:").yellow(),
                        letter.reason
                    );
                }
            } else {
                let moved = coordinator.redrive(&name).await?;
                if moved > 0 {
                    println!(
                        "{} Requeued {} message(s) on '{}'.",
                        style("Success:").green().bold(),
                        moved,
                        name
                    );
                } else {
                    println!("No dead-lettered messages on '{}'.", name);
                }
            }
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let directive = if verbose {
        "acl_crawler=debug"
    } else {
        "acl_crawler=info"
    };

    // Logs go to stderr so JSON lines on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

fn progress_callback(reporter: Option<ProgressReporter>) -> impl Fn(WorkerProgress) + Send + Sync + 'static {
    move |progress: WorkerProgress| {
        if let Some(ref reporter) = reporter {
            reporter.update(&progress);
        }
    }
}

async fn run_worker(
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn MessageHandler>,
    worker: &WorkerArgs,
    quiet: bool,
    shutdown: Arc<AtomicBool>,
    summary: Option<&str>,
) -> Result<()> {
    let config = WorkerConfig::from_worker_args(worker, quiet)?;

    eprintln!("  Worker ID: {}", style(&config.worker_id).green());
    eprintln!(
        "  Mode: {}",
        if config.continuous {
            style("continuous").green()
        } else {
            style("until queue empty").yellow()
        }
    );
    eprintln!();

    let reporter = config.show_progress.then(ProgressReporter::new);

    let stats = QueueWorker::new(queue, handler, config)
        .with_shutdown(shutdown)
        .run(progress_callback(reporter.clone()))
        .await?;

    if let Some(reporter) = reporter {
        reporter.finish_and_clear();
    }
    match summary {
        Some(title) => print_summary(title, &stats),
        None => tracing::info!(
            "Worker finished: {} directories, {} files, {} dead-lettered",
            stats.directories,
            stats.files,
            stats.dead_lettered
        ),
    }
    Ok(())
}

async fn run_crawl(
    args: &CliArgs,
    root: &str,
    output: Option<PathBuf>,
    concurrency: usize,
    max_deliveries: u32,
    lease: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let store = LocalStore::open(&args.store_root).context("Failed to open store")?;
    let store: Arc<dyn HierarchicalStore> = Arc::new(store);
    let sink = open_sink(output.as_deref()).await?;

    let mut config = WorkerConfig::with_concurrency(concurrency)?;
    config.max_deliveries = max_deliveries.max(1);
    config.show_progress = !args.quiet;
    config.receive_wait = Duration::from_millis(200);

    // Progress and banners go to stderr when results stream to stdout
    eprintln!(
        "{} Crawling {} in {} (in-process, {} tasks)",
        style("[Crawl]").cyan().bold(),
        style(root).green(),
        style(store.describe()).yellow(),
        concurrency
    );
    eprintln!("  Output: {}", style(sink.describe()).yellow());

    let reporter = config.show_progress.then(ProgressReporter::new);
    let stats = crawl_in_process(
        store,
        sink,
        root,
        config,
        lease,
        shutdown,
        progress_callback(reporter.clone()),
    )
    .await
    .with_context(|| format!("Crawl of {} failed", root))?;

    if let Some(reporter) = reporter {
        reporter.finish_and_clear();
    }
    if writes_stdout(output.as_deref()) {
        tracing::info!(
            "Crawl finished: {} directories, {} files, {} dead-lettered",
            stats.directories,
            stats.files,
            stats.dead_lettered
        );
    } else {
        print_summary("Crawl Complete", &stats);
    }
    Ok(())
}

/// Results stream to stdout, so the summary must not
fn writes_stdout(output: Option<&Path>) -> bool {
    output.map_or(true, |p| p.as_os_str() == "-")
}

async fn run_status(
    settings: QueueSettings,
    watch: bool,
    interval: u64,
    format: &str,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let clients = SharedClients::new(settings, PathBuf::from("."), None);
    let coordinator = Coordinator::new(vec![
        clients.visit_queue().await?,
        clients.create_queue().await?,
    ]);

    loop {
        let status = coordinator.status().await?;

        if format == "json" {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            // Clear screen in watch mode
            if watch {
                let term = Term::stdout();
                let _ = term.clear_screen();
            }
            print_status(&status);
        }

        if !watch || shutdown.load(Ordering::Relaxed) {
            break;
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}

fn print_status(status: &SystemStatus) {
    println!("{}", style("acl-crawler Status").cyan().bold());
    println!("{}", "=".repeat(50));
    println!();

    // Health indicator
    let health_style = match status.health.as_str() {
        "healthy" => style(&status.health).green(),
        "idle" => style(&status.health).dim(),
        "degraded" => style(&status.health).yellow(),
        _ => style(&status.health).red(),
    };
    println!("Health: {}", health_style.bold());
    println!();

    for queue in &status.queues {
        let stats = &queue.stats;
        println!("{}", style(format!("Queue '{}'", queue.name)).yellow().bold());
        println!("  Pending:       {}", style(stats.pending).cyan());
        println!("  In flight:     {}", style(stats.in_flight).blue());
        println!("  Completed:     {}", style(stats.total_completed).green());
        println!("  Retried:       {}", style(stats.total_abandoned).dim());
        println!(
            "  Dead-lettered: {}",
            if stats.dead_lettered > 0 {
                style(stats.dead_lettered).red()
            } else {
                style(stats.dead_lettered).dim()
            }
        );
        println!("  Workers:       {}", style(stats.active_workers).magenta());
        println!();
    }

    // Messages
    if !status.messages.is_empty() {
        println!("{}", style("Messages").yellow().bold());
        for msg in &status.messages {
            println!("  {} {}", style("!").yellow(), msg);
        }
        println!();
    }

    println!(
        "Last updated: {}",
        style(status.timestamp.format("%Y-%m-%d %H:%M:%S UTC")).dim()
    );
}
