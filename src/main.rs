use anyhow::Result;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod app;
mod bridge;
mod config;
mod handler;
mod history;
mod message;
mod openai;
mod session;
mod tui;
mod ui;

use app::App;
use bridge::spawn_backend;
use config::Config;
use history::HistoryStore;
use openai::OpenAiClient;
use session::Session;

/// Log to a file; the terminal itself is in raw mode on the alternate screen.
fn init_logging() {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("coding-assistant");
    std::fs::create_dir_all(&log_dir).ok();

    let Ok(log_file) = std::fs::File::create(log_dir.join("assistant.log")) else {
        return;
    };

    let filter = EnvFilter::try_from_env("ASSISTANT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(log_file))
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load().unwrap_or_default();

    let api_key = openai::load_api_key().unwrap_or_else(|e| {
        // Prompts will fail with a visible error dialog; not fatal here
        warn!("no API key available: {e}");
        String::new()
    });
    let client = OpenAiClient::new(&api_key);
    let store = HistoryStore::open_default()?;
    let bridge = spawn_backend(store, client);

    let mut app = App::new(Session::new(bridge), config);
    app.load_history().await;
    app.session.start_listening();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app).await;
    tui::restore()?;

    result
}

enum LoopEvent {
    Input(tui::AppEvent),
    Bridge(bridge::BridgeEvent),
}

async fn run(terminal: &mut tui::Tui, app: &mut App) -> Result<()> {
    let mut events = tui::EventHandler::new();

    loop {
        terminal.draw(|frame| ui::render(app, frame))?;

        // One event per cycle; bridge fragments merge strictly in arrival order
        let event = tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(event) => LoopEvent::Input(event),
                None => break,
            },
            Some(event) = app.session.next_event(), if app.session.is_listening() => {
                LoopEvent::Bridge(event)
            }
        };

        match event {
            LoopEvent::Input(event) => handler::handle_event(app, event).await?,
            LoopEvent::Bridge(event) => app.apply_bridge_event(event),
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
