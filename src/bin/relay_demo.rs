/// Two players, one game: runs the relay end to end over the in-process hub
///
/// Usage: relay_demo [GAME_ID] [CONFIG_JSON]

use anyhow::{bail, Context, Result};
use moverelay::{
    init_logging, Element, JoinOutcome, LocalHub, MemoryHost, MovePayload, MoveRelay, RelayConfig,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let game_id = args.next().unwrap_or_else(|| "42".to_string());
    let config = match args.next() {
        Some(path) => RelayConfig::load(&path)
            .with_context(|| format!("loading relay configuration from {}", path))?,
        None => RelayConfig::default(),
    };

    let hub = LocalHub::new();
    let socket = Arc::new(hub.connect(&config.socket)?);

    let white_ui = Arc::new(MemoryHost::new());
    let black_ui = Arc::new(MemoryHost::new());

    let white = MoveRelay::builder(socket.clone(), white_ui.clone())
        .config(config.clone())
        .build()?;
    let black = MoveRelay::builder(socket, black_ui.clone())
        .config(config.clone())
        .build()?;

    let element = Element::new().with_data(&config.session_attribute, game_id.clone());
    for relay in [&white, &black] {
        let ticket = relay
            .mount(&element)?
            .context("element carries no session identifier")?;
        match ticket.outcome().await? {
            JoinOutcome::Joined(_) => {}
            other => bail!("join on game:{} did not succeed: {:?}", game_id, other),
        }
    }

    let opening = MovePayload::new("e2", "e4").with_player("white");
    white_ui.emit_local(&config.host_outbound_event, opening);

    for pushed in black_ui.pushed_events() {
        info!("Black's board received {}: {}", pushed.event, pushed.payload.as_value());
        println!("{} {}", pushed.event, serde_json::to_string(&pushed.payload)?);
    }

    white.destroy();
    black.destroy();
    info!("Relays destroyed; {} channel(s) left", hub.leave_count());
    Ok(())
}
