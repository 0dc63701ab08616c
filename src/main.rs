use lifeforge_companion::config::Config;
use lifeforge_companion::logging::init_tracing;
use lifeforge_companion::session::{ChatSession, RejectReason, SessionEvent, SubmitOutcome};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    let mut session = match ChatSession::connect(&config) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    print_transcript(&session);
    println!("(type /reset to start over, /quit to exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };

        match line.trim() {
            "/quit" => break,
            "/reset" => {
                session.reset();
                print_transcript(&session);
                continue;
            }
            _ => {}
        }

        match session.submit(&line) {
            SubmitOutcome::Accepted { urgent, .. } => {
                if urgent {
                    println!(
                        "[!] This looks urgent. If someone is in danger, call 108 or 112 now."
                    );
                }
                stream_answer(&mut session).await;
            }
            SubmitOutcome::Rejected(RejectReason::EmptyInput) => {}
            SubmitOutcome::Rejected(RejectReason::Busy) => {
                println!("Still answering, please wait.");
            }
        }
    }
}

async fn stream_answer(session: &mut ChatSession) {
    loop {
        let next = tokio::select! {
            event = session.next_event() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = next else {
            session.cancel();
            println!("\n(stopped)");
            return;
        };

        match event {
            Some(SessionEvent::Chunk { text, .. }) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Some(SessionEvent::Completed { .. }) => {
                println!();
                return;
            }
            Some(SessionEvent::Failed { .. }) => {
                if let Some(turn) = session.snapshot().last() {
                    println!("\n{}", turn.content);
                }
                return;
            }
            None => return,
        }
    }
}

fn print_transcript(session: &ChatSession) {
    for turn in session.snapshot() {
        println!("{}: {}", turn.role.as_str(), turn.content);
    }
}
