//! Interactive chat command.
//!
//! Messages are read from stdin and submitted through a
//! [`ClientSessionController`]; replies are printed as they arrive on the
//! session's subscription.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use parley::client::{
    ClientSessionController, ControllerError, LocalRelay, RelayClient, RelayTransport,
};
use parley::config::Config;
use parley::llm;
use parley::protocol::{Exchange, SessionId};
use parley::session::{ExchangeDispatcher, ResponsePublisher, SubmitOutcome, SubscriptionRegistry};

/// Chat against a running server.
pub async fn run(server_url: &str, session: Option<&str>) -> Result<()> {
    let client = RelayClient::new(server_url);
    client
        .health()
        .await
        .with_context(|| format!("server at {server_url} is not ready"))?;

    run_interactive_loop(controller(client, session)?).await
}

/// Chat against an in-process relay built from the config file.
pub async fn run_local(config_path: &str, session: Option<&str>) -> Result<()> {
    let config = Config::load(config_path).await?;
    let backend =
        llm::build_backend(&config.backend).context("failed to configure inference backend")?;

    let registry = SubscriptionRegistry::new(config.server.subscriber_buffer);
    let dispatcher = ExchangeDispatcher::new(
        backend,
        ResponsePublisher::new(registry.clone()),
        config.dispatcher.max_concurrent_requests,
        Duration::from_secs(config.backend.timeout_seconds),
    )
    .with_history(config.dispatcher.conversation_history());
    let relay = LocalRelay::new(registry, dispatcher.clone());

    run_interactive_loop(controller(relay, session)?).await?;
    dispatcher.shutdown().await;
    Ok(())
}

fn controller<T: RelayTransport>(
    transport: T,
    session: Option<&str>,
) -> Result<ClientSessionController<T>> {
    Ok(match session {
        Some(raw) => ClientSessionController::with_session_id(transport, SessionId::parse(raw)?),
        None => ClientSessionController::new(transport),
    })
}

async fn run_interactive_loop<T: RelayTransport>(
    mut controller: ClientSessionController<T>,
) -> Result<()> {
    println!("Session: {}", controller.session_id());
    println!("Type /exit to quit, /reconnect to resubscribe.");
    if let Err(e) = controller.connect().await {
        eprintln!("Subscription failed: {e}. Use /reconnect to retry.");
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut async_stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    loop {
        async_stdout.write_all(b"> ").await?;
        async_stdout.flush().await?;

        let Some(input) = lines.next_line().await? else {
            println!();
            break;
        };

        let input = input.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reconnect" => {
                match controller.resubscribe().await {
                    Ok(()) => println!("Reconnected."),
                    Err(e) => eprintln!("Reconnect failed: {e}"),
                }
                continue;
            }
            _ => {}
        }

        let exchange_id = match controller.submit(input).await {
            Ok(SubmitOutcome::Dispatched { exchange_id }) => exchange_id,
            Ok(SubmitOutcome::Skipped) => continue,
            Err(ControllerError::NotActive(state)) => {
                eprintln!("Not connected ({state}). Use /reconnect.");
                continue;
            }
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        wait_for_reply(&mut controller, &exchange_id).await;
    }

    controller.close();
    Ok(())
}

/// Print exchanges until the one for `exchange_id` arrives.
async fn wait_for_reply<T: RelayTransport>(
    controller: &mut ClientSessionController<T>,
    exchange_id: &str,
) {
    loop {
        match controller.next_exchange().await {
            Ok(exchange) => {
                println!("{}", render(&exchange));
                if exchange.id == exchange_id {
                    return;
                }
            }
            Err(e) => {
                eprintln!("Subscription lost: {e}. Use /reconnect.");
                return;
            }
        }
    }
}

/// Both sides of an exchange, so messages submitted by other clients sharing
/// the session show up too.
fn render(exchange: &Exchange) -> String {
    let time = exchange.timestamp.format("%H:%M:%S");
    format!(
        "[{time}] user: {}\n[{time}] {}: {}",
        exchange.message, exchange.sender, exchange.response
    )
}
