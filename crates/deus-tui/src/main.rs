use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod autosave;
mod editor;
mod html;
mod ui;

use api::{ApiClient, UserPreferences};
use app::{App, AppEvent, View};
use autosave::AutosaveConfig;

/// The terminal belongs to the UI, so logs go to `<config dir>/deus-code/deus-tui.log`.
fn init_logging() -> Result<()> {
    let path = api::config_dir()?.join("deus-tui.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Could not open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deus_tui=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args: Vec<String> = std::env::args().collect();
    let mut reset_token: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--reset-token" => {
                if i + 1 < args.len() {
                    reset_token = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Error: --reset-token requires a token argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("Usage: deus-tui [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --reset-token <TOKEN>  Choose a new password with a reset token");
                println!("  --help, -h             Show this help message");
                println!();
                println!("Environment:");
                println!("  DEUS_SERVER_URL              Server address (default http://localhost:3000)");
                println!("  DEUS_AUTOSAVE_DEBOUNCE_SECS  Quiet period before autosave (default 3)");
                println!("  DEUS_AUTOSAVE_FLUSH_SECS     Safety flush interval (default 30)");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = init_logging() {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    // Get server URL from environment
    let server_url = std::env::var("DEUS_SERVER_URL")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    tracing::info!("Starting deus-tui against {}", server_url);

    // Create API client
    let mut api = ApiClient::new(&server_url);
    let has_tokens = api.load_tokens().unwrap_or_else(|e| {
        tracing::warn!("Ignoring stored session: {:#}", e);
        false
    });

    let prefs = UserPreferences::load().unwrap_or_else(|e| {
        tracing::warn!("Using default preferences: {:#}", e);
        UserPreferences::default()
    });

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let mut app = App::new(api, has_tokens, prefs, AutosaveConfig::from_env(), reset_token);
    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Some(notice) = app.exit_notice.take() {
        eprintln!("{}", notice);
    }

    if let Err(err) = res {
        tracing::error!("Exited with error: {:?}", err);
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::channel::<AppEvent>(100);

    // Spawn input handler
    let tx_input = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press {
                        let _ = tx_input.send(AppEvent::Key(key)).await;
                    }
                }
            }
            // Ticks drive autosave deadlines and flash expiry
            let _ = tx_input.send(AppEvent::Tick).await;
        }
    });

    // Verify tokens on startup if we have them
    if app.view == View::VerifyingAuth {
        let _ = tx.send(AppEvent::VerifyAuth).await;
    }

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if let Some(event) = rx.recv().await {
            match event {
                AppEvent::Key(key) => {
                    if app.handle_key(key, tx.clone()).await? {
                        return Ok(());
                    }
                    // Check if terminal needs clearing after external editor
                    if app.needs_terminal_clear {
                        terminal.clear()?;
                        app.needs_terminal_clear = false;
                    }
                }
                AppEvent::Tick => {
                    app.on_tick(&tx).await;
                }
                AppEvent::VerifyAuth => {
                    app.verify_auth(&tx).await;
                }
                AppEvent::AuthSuccess => {
                    app.on_auth_success(&tx).await;
                }
                AppEvent::AuthFailed(msg) => {
                    app.on_auth_failed(msg);
                }
                AppEvent::SaveFinished {
                    page_id,
                    revision,
                    trigger,
                    result,
                } => {
                    app.on_save_finished(page_id, revision, trigger, result);
                }
            }
        }
    }
}
