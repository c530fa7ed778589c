//! Agora CLI binary entry point.

use std::sync::Arc;

use agora::cli::{CheckArgs, Cli, Commands, DemoArgs};
use agora::config::RuntimeConfig;
use agora::model::{Fallback, ScriptedModel};
use agora::types::{SpaceEvent, SpaceEventKind};
use agora::Runtime;
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("AGORA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check(args) => handle_check(args),
        Commands::Demo(args) => handle_demo(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn handle_check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(&args.config)?;
    println!("{} is valid", args.config.display());
    println!("  humans: {}", config.humans.len());
    for agent in &config.agents {
        let autostart = if agent.autostart { " (autostart)" } else { "" };
        println!("  agent {} {}{autostart}", agent.name, agent.entity_id);
    }
    for space in &config.spaces {
        println!("  space {} {} members={}", space.name, space.id, space.members.len());
    }
    Ok(())
}

async fn handle_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::load_default()?,
    };
    let space = config
        .spaces
        .first()
        .cloned()
        .ok_or("the demo needs at least one configured space")?;
    let human = match args.human {
        Some(id) => id,
        None => config
            .humans
            .first()
            .map(|h| h.id)
            .ok_or("the demo needs at least one configured human")?,
    };

    let runtime = Runtime::builder()
        .config(config)
        .model(Arc::new(ScriptedModel::with_fallback(Fallback::Echo)))
        .build()?;
    runtime.boot()?;

    let after = runtime.services().store.max_message_seq(space.id).await?;
    let mut events = runtime.space_events(space.id, after);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => print_event(&event),
                Err(e) => {
                    eprintln!("stream ended: {e}");
                    break;
                }
            }
        }
    });

    eprintln!("posting to '{}' as {human}; Ctrl-D to quit", space.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        runtime.post_message(space.id, human, line, true).await?;
    }

    runtime.shutdown().await;
    Ok(())
}

fn print_event(event: &SpaceEvent) {
    match event.kind {
        SpaceEventKind::Message => {
            if let Some(message) = event.message() {
                let content = message.content.as_deref().unwrap_or("");
                println!("[{}] {}: {content}", message.seq, message.entity_id);
            }
        }
        SpaceEventKind::AgentActive | SpaceEventKind::AgentInactive => {
            eprintln!("  {} {}", event.kind, event.payload["entityId"].as_str().unwrap_or("?"));
        }
        _ => {}
    }
}
