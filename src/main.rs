use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use guidebot::config::WidgetConfig;
use guidebot::dialogue::{GraphLoader, GraphStore};
use guidebot::narration::{AudioOutput, CommandAudioOutput, HttpSynthesizer, NarrationController};
use guidebot::session::ChatSession;

// ---------------------------------------------------------------------------
// Terminal shell
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    Quit,
}

/// Prints transcript entries as they arrive plus the current question.
#[derive(Default)]
struct Shell {
    shown: usize,
}

impl Shell {
    fn render(&mut self, session: &ChatSession) {
        if !session.is_open() {
            println!("(chat closed, type /open)");
            return;
        }

        let transcript = session.transcript();
        if transcript.len() < self.shown {
            // New page, fresh transcript.
            self.shown = 0;
        }
        for entry in &transcript[self.shown..] {
            println!("{entry}");
        }
        self.shown = transcript.len();

        match session.current_question() {
            Some(question) => {
                println!("\n[Assistant]: {}", question.text);
                for (i, option) in question.options.iter().enumerate() {
                    println!("  [{}] {}", i + 1, option.label);
                }
            }
            None if session.is_loading() => println!("(loading...)"),
            None => println!("(nothing to ask on this page)"),
        }

        let narration = session.narration();
        if narration.muted {
            println!("(muted)");
        }
    }

    fn handle(&mut self, session: &mut ChatSession, input: &str) -> Flow {
        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (input, ""),
        };

        match command {
            "/quit" | "/exit" => return Flow::Quit,
            "/help" => print_help(),
            "/open" => session.open(),
            "/close" => session.close(),
            "/mute" => session.toggle_mute(),
            "/page" => session.navigate_path(if arg.is_empty() { "/" } else { arg }),
            _ if !session.is_open() => println!("(chat closed, type /open)"),
            _ => match input.parse::<usize>() {
                Ok(n) if n >= 1 => {
                    if session.select_option_at(n - 1).is_none() {
                        println!("(no option {n})");
                    }
                }
                _ => {
                    if session.submit_free_text(input).is_none() {
                        println!("(Please say something.)");
                    }
                }
            },
        }
        Flow::Continue
    }
}

fn print_help() {
    println!("\n========================================");
    println!("            GUIDED ASSISTANT");
    println!("========================================");
    println!("  <number>      pick an option");
    println!("  <text>        type a message");
    println!("  /open /close  show or hide the chat");
    println!("  /mute         toggle narration");
    println!("  /page <path>  navigate, e.g. /page /services");
    println!("  /quit         leave");
    println!("========================================\n");
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Control verbosity with RUST_LOG:
    //   RUST_LOG=info   page loads + transitions
    //   RUST_LOG=debug  + dropped narrations, stale loads, TTS requests
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = WidgetConfig::from_env();
    if let Some(path) = args.get(1) {
        config.questions_path = path.into();
    }
    let start_path = args.get(2).map(String::as_str).unwrap_or("/");

    let store = GraphStore::from_file(&config.questions_path)
        .await
        .with_context(|| {
            format!(
                "failed to load question graphs from {}\n\
                 \n\
                 Usage: guidebot [questions.json] [page-path]\n\
                 Example:\n  guidebot data/questions.json /services",
                config.questions_path.display()
            )
        })?;
    info!("Pages available: {:?}", store.page_ids().collect::<Vec<_>>());
    let loader = GraphLoader::new(Arc::new(store)).with_fallback(config.fallback_page.clone());

    let synthesizer = HttpSynthesizer::new(
        config.tts_url.clone(),
        Duration::from_millis(config.synthesis_timeout_ms),
    )
    .context("failed to create TTS client")?;
    info!("Speech synthesis at {}", synthesizer.url());

    let mut narration = config.narration();
    let player = config
        .player
        .clone()
        .map(CommandAudioOutput::new)
        .or_else(CommandAudioOutput::detect);
    let output: Arc<dyn AudioOutput> = match player {
        Some(player) => {
            info!("Audio player: {}", player.player().display());
            Arc::new(player)
        }
        None => {
            warn!("No audio player found (set GUIDEBOT_PLAYER); narration starts muted");
            narration.start_muted = true;
            Arc::new(CommandAudioOutput::new("ffplay"))
        }
    };

    let narrator = NarrationController::spawn(Arc::new(synthesizer), output, narration);
    let mut session = ChatSession::mount(loader, narrator, config.entry_question_id.clone());
    session.navigate_path(start_path);

    print_help();
    let mut shell = Shell::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    shell.render(&session);
    prompt()?;

    loop {
        tokio::select! {
            _ = session.next_load(), if session.is_loading() => {
                if let Some(page) = session.page_id() {
                    println!("\n(page: {page})");
                }
                shell.render(&session);
                prompt()?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    prompt()?;
                    continue;
                }
                if let Flow::Quit = shell.handle(&mut session, input) {
                    break;
                }
                shell.render(&session);
                prompt()?;
            }
        }
    }

    session.shutdown().await;
    println!("Bye!");
    Ok(())
}
