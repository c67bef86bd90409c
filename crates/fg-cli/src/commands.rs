use std::time::Duration;

use anyhow::Context as _;
use colored::Colorize;
use fg_crypto::SigningKey;
use fg_node::{Node, NodeConfig, RootStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::*;
use crate::demo::{self, Writer};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Keygen => cmd_keygen(),
        Command::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(cmd_run(args))
        }
    }
}

fn cmd_keygen() -> anyhow::Result<()> {
    let key = SigningKey::generate();
    println!("{} {}", "feed:  ".bold(), key.feed().to_hex().cyan());
    println!("{} {}", "secret:".bold(), key.to_hex().yellow());
    Ok(())
}

fn node_config(args: &RunArgs) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(ms) = args.interval_ms {
        config.tick_interval_ms = ms;
    }
    if let Some(dir) = &args.data_dir {
        config.in_memory = false;
        config.data_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = node_config(&args)?;
    let key = match &args.key {
        Some(hex) => SigningKey::from_hex(hex).context("invalid --key")?,
        None => SigningKey::generate(),
    };
    let feed = key.feed();

    let node = Node::new(config, demo::registry()?)?;
    node.add_feed(feed)?;
    println!("{} writing feed {}", "▶".green().bold(), feed.short_id().cyan());

    let watcher = tokio::spawn(watch(node.subscribe(&feed)?));
    let quit = node.quitting();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            quit.cancel();
        }
    });

    let writer = Writer::new(node.container(), key);
    let outcome = match writer.init() {
        Ok(_) => write_loop(&writer, node.quitting(), node.config().tick_interval(), args.ticks).await,
        Err(e) => Err(e),
    };

    node.close();
    if let Err(e) = watcher.await {
        warn!(error = %e, "root watcher ended abnormally");
    }

    match outcome {
        Ok(ticks) => {
            println!("{} stopped after {} ticks", "✓".green().bold(), ticks.to_string().bold());
            Ok(())
        }
        Err(e) => {
            println!("{} write loop failed: {e:#}", "✗".red().bold());
            Err(e)
        }
    }
}

/// Tick until cancelled, the tick limit is reached, or a tick fails.
/// Cancellation is only observed between ticks. Needs the multi-threaded
/// runtime.
async fn write_loop(
    writer: &Writer<'_>,
    cancel: CancellationToken,
    period: Duration,
    limit: Option<u64>,
) -> anyhow::Result<u64> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut done = 0u64;
    while limit.map_or(true, |limit| done < limit) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("write loop cancelled");
                break;
            }
            _ = interval.tick() => {}
        }
        // A tick saves synchronously and may fsync; keep it off the async workers.
        let root = tokio::task::block_in_place(|| writer.tick(done))?;
        println!(
            "  {} {} {}",
            format!("#{}", root.seq).yellow(),
            root.hash().short_hex().dimmed(),
            root.timestamp
        );
        done += 1;
    }
    Ok(done)
}

/// Log every root the node publishes for the demo feed until the hub closes.
async fn watch(mut stream: RootStream) {
    loop {
        match stream.recv().await {
            Ok(root) => info!(feed = %root.feed, seq = root.seq, root = %root.hash().short_hex(), "root published"),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "root watcher lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
