//! `cadence` - run a guided session in the terminal.
//!
//! Starts one session, prints each new instruction as it comes due, and reads
//! commands from stdin: `pause`, `resume`, `info`, `end` / `quit`. Any other
//! line is passed to the engine as a message, so typing the interrupt token
//! stops the session. Ctrl-C ends the session and prints its summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{
    Engine, EngineConfig, EngineError, InMemoryTemplateStore, Intensity, NextInstruction,
    SessionEvent, SessionId, SessionSummary, StartRequest, TemplateSource, UserId,
    UserPreferences,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Run a timed, multi-phase guided session", long_about = None)]
struct Args {
    /// Template id to run, or "random"
    #[arg(short, long, default_value = "guided_breathing")]
    template: String,

    /// Rescale the session to this many minutes
    #[arg(short, long)]
    minutes: Option<u32>,

    /// Wording intensity: low, medium or high
    #[arg(short, long)]
    intensity: Option<Intensity>,

    /// User the session belongs to
    #[arg(short, long, default_value = "local")]
    user: String,

    /// Typing a line containing this word stops the session immediately
    #[arg(long)]
    interrupt_token: Option<String>,

    /// Engine config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra templates file (JSON map or array), added to the built-ins
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Seconds between instruction polls
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,

    /// List available templates and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("error ({}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), EngineError> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let completion_message = config.completion_message.clone();

    let store = InMemoryTemplateStore::with_defaults();
    if let Some(path) = &args.templates {
        store.extend_from_json(path)?;
    }

    let engine = Arc::new(
        Engine::builder()
            .config(config)
            .templates(Arc::new(store))
            .build()?,
    );

    if args.list {
        for template in engine.available_templates() {
            println!(
                "{:<24} {:>5.1} min  {:<6}  {}",
                template.id, template.duration_minutes, template.intensity, template.name
            );
        }
        return Ok(());
    }

    let user = UserId::from(args.user.as_str());
    engine.set_user_preferences(
        &user,
        UserPreferences {
            preferred_intensity: args.intensity,
            preferred_duration_minutes: args.minutes,
            interrupt_token: args.interrupt_token.clone(),
        },
    );

    let source = if args.template.eq_ignore_ascii_case("random") {
        TemplateSource::Random
    } else {
        TemplateSource::Id(args.template.clone())
    };
    let started = engine.start_session(StartRequest::new(user.clone(), source))?;

    println!(
        "{} ({} min, {} intensity)",
        started.name,
        started.duration_secs / 60,
        started.intensity
    );
    if !started.description.is_empty() {
        println!("{}", started.description);
    }
    if started.interrupt_token_set {
        println!("Type your interrupt word at any time to stop.");
    }
    println!();
    println!("[{}] {}", started.current_phase, started.initial_instruction);

    let printer = tokio::spawn(print_events(engine.clone(), started.session_id.clone()));
    let outcome = drive(&engine, &started.session_id, &user, args.poll_secs).await;
    printer.abort();

    let summary = match outcome? {
        Some(summary) => summary,
        None => engine.end_session(&started.session_id, &user)?,
    };
    print_summary(&summary, &completion_message);
    Ok(())
}

/// Poll, read stdin and handle Ctrl-C until the session is over.
///
/// Returns the summary when the session was ended here, `None` when it
/// finished on its own and still needs to be collected.
async fn drive(
    engine: &Engine,
    session_id: &SessionId,
    user: &UserId,
    poll_secs: u64,
) -> Result<Option<SessionSummary>, EngineError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
    let mut shown = Some((0, 0));
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return engine.end_session(session_id, user).map(Some);
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };

                match line.trim().to_ascii_lowercase().as_str() {
                    "" => {}
                    "pause" => report(engine.pause(session_id, user).map(|_| println!("Paused."))),
                    "resume" => report(engine.resume(session_id, user).map(|_| println!("Resumed."))),
                    "info" => report(engine.get_session_info(session_id, user).map(|info| {
                        match serde_json::to_string_pretty(&info) {
                            Ok(json) => println!("{json}"),
                            Err(e) => log::warn!("Failed to render session info: {}", e),
                        }
                    })),
                    "end" | "quit" | "exit" => {
                        return engine.end_session(session_id, user).map(Some);
                    }
                    _ => {
                        let next = engine.get_next_instruction(session_id, user, Some(line.as_str()))?;
                        if show(next, &mut shown) {
                            return Ok(None);
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                let next = engine.get_next_instruction(session_id, user, None)?;
                if show(next, &mut shown) {
                    return Ok(None);
                }
            }
        }
    }
}

/// Print a poll outcome. Returns whether the session is over.
///
/// `shown` is the (phase, instruction) position last printed; a position is
/// only printed once however its wording varies between polls.
fn show(next: NextInstruction, shown: &mut Option<(usize, usize)>) -> bool {
    match next {
        NextInstruction::Instruction(update) => {
            let position = (update.phase_index, update.instruction_index);
            if *shown != Some(position) && !update.paused {
                println!(
                    "[{} {:>3.0}%] {}",
                    update.current_phase, update.session_progress, update.instruction
                );
                *shown = Some(position);
            }
            false
        }
        NextInstruction::Interrupted { .. } => {
            println!("Session stopped.");
            true
        }
        NextInstruction::Completed { .. } => true,
    }
}

fn report(result: Result<(), EngineError>) {
    if let Err(e) = result {
        println!("({})", e);
    }
}

async fn print_events(engine: Arc<Engine>, session_id: SessionId) {
    let mut rx = engine.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) if event.session_id() == &session_id => {
                if let SessionEvent::PhaseChanged { phase, .. } = event {
                    println!("--- {} ---", phase.replace('_', " "));
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Event printer skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_summary(summary: &SessionSummary, completion_message: &str) {
    println!();
    if summary.was_interrupted {
        println!("Session interrupted.");
    } else if summary.session_progress >= 100.0 {
        println!("{completion_message}");
    } else {
        println!("Session ended early.");
    }
    println!(
        "Time: {:.0}s of {}s  Phases: {}  Instructions: {}",
        summary.duration_actual_secs,
        summary.planned_duration_secs,
        summary.phases_completed,
        summary.instructions_given_count
    );
}
