use anyhow::{Context, Result};
use clap::Parser;
use shuffle_client::{ChannelDispatcher, EvmBridge};
use shuffle_observer::{replay, Config, Engine, EngineConfig};
use shuffle_types::GameStatus;
use std::{fs::File, io::BufReader, path::PathBuf, str::FromStr};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow a shuffle game and report when the local player must shuffle")]
struct Args {
    /// YAML config file
    #[arg(long)]
    config: PathBuf,

    /// Replay a JSON-lines event file instead of following the chain
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // Setup logging
    let level = Level::from_str(&config.log_level).context("invalid log level")?;
    if config.json_logs {
        tracing_subscriber::fmt().json().with_max_level(level).init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }
    info!(
        game_id = ?config.game_id,
        rpc_url = %config.rpc_url,
        replay = ?args.replay,
        "starting shuffle observer"
    );

    let session = match config.session_config()?.session() {
        Ok(session) => session,
        Err(condition) => {
            error!(%condition, "cannot start session");
            return Err(condition.into());
        }
    };

    if let Some(path) = args.replay {
        let file = File::open(&path)
            .with_context(|| format!("could not open event file {}", path.display()))?;
        let initial = config.initial_status.unwrap_or(GameStatus::WaitingForStart);
        let replay = replay(session, initial, BufReader::new(file)).await?;
        for snapshot in &replay.snapshots {
            println!("{}", serde_json::to_string(snapshot)?);
        }
        for action in &replay.actions {
            info!(?action, "action requested");
        }
        return Ok(());
    }

    // Follow the chain. Signing is left to the wallet: requested actions are
    // printed for it to pick up.
    let bridge = EvmBridge::new(config.evm_config()?)?;
    let (dispatcher, mut actions) = ChannelDispatcher::new(16);
    let (engine, mut mailbox) = Engine::new(EngineConfig::default(), session, bridge, dispatcher);
    let engine = tokio::spawn(engine.run());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            action = actions.recv() => {
                let Some(action) = action else {
                    break;
                };
                let snapshot = mailbox.snapshot().await?;
                info!(?action, status = %snapshot.status, epoch = snapshot.epoch, "action requested");
                println!("{}", serde_json::to_string(&action)?);
            },
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            },
        }
    }

    drop(actions);
    drop(mailbox);
    engine.await.context("engine task failed")?;
    Ok(())
}
