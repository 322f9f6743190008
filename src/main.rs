use chatline::{
    bus::{Event, EventBus},
    client::HttpQueryClient,
    config::Config,
    controller::{ControllerOptions, SubmitOutcome, TranscriptController},
    render::Renderer,
    store::SqliteStore,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist
        debug!("No .env file found or failed to load: {}", e);
    }

    // Logs go to stderr so they don't interleave with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = SqliteStore::new(&config.db_path).await?;
    store.init().await?;

    let client = HttpQueryClient::new(&config.endpoint)?;
    info!("Posting questions to {}", client.endpoint());

    let bus = Arc::new(EventBus::new());
    let controller = Arc::new(TranscriptController::new(
        Arc::new(store),
        Arc::new(client),
        bus.clone(),
        ControllerOptions {
            send_history: config.send_history,
        },
    ));

    controller.restore().await;

    let renderer = Arc::new(Mutex::new(Renderer::new()));
    print_fresh(&renderer, &controller.snapshot());

    // Print transcript changes as they are published
    let mut bus_rx = bus.subscribe();
    let renderer_clone = renderer.clone();
    let render_handle = tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            if let Event::TranscriptChanged { messages } = event {
                print_fresh(&renderer_clone, &messages);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/session" => println!("session: {}", controller.session_id().await),
                    _ => {
                        // The draft may change while a reply is outstanding; submitting may not
                        controller.set_draft(line.clone());
                        // Start before reading the next line so the transcript already
                        // shows this question, or refuses it
                        let pending = match controller.start(&line) {
                            Ok(pending) => pending,
                            Err(SubmitOutcome::Busy) => {
                                println!("(still waiting for a reply, try again in a moment)");
                                continue;
                            }
                            Err(_) => continue,
                        };
                        let controller = controller.clone();
                        tokio::spawn(async move {
                            controller.finish(pending).await;
                        });
                    }
                }
            }
        }
    }

    render_handle.abort();
    Ok(())
}

fn print_fresh(renderer: &Mutex<Renderer>, messages: &[chatline::chat::Message]) {
    let mut renderer = renderer.lock().unwrap_or_else(PoisonError::into_inner);
    for line in renderer.fresh_lines(messages) {
        println!("{line}");
    }
}
