//! Run a single message through the assistant and print the event stream.
//!
//! Usage: assistant [--session <id>] <user_id> <message...>

use finance_assistant::{bootstrap, AppConfig, TurnRequest};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct CliArgs {
    session_id: Option<String>,
    user_id: String,
    message: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<CliArgs> {
    let mut session_id = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" | "-s" => session_id = args.next(),
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 {
        return None;
    }

    let user_id = positional.remove(0);
    Some(CliArgs {
        session_id,
        user_id,
        message: positional.join(" "),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Some(args) = parse_args(std::env::args().skip(1)) else {
        eprintln!("Usage: assistant [--session <id>] <user_id> <message...>");
        std::process::exit(2);
    };

    let config = AppConfig::from_env()?;
    let components = bootstrap::build(&config).await?;

    let request = TurnRequest::new(args.user_id, args.message).with_session(args.session_id);
    info!(session_id = %request.session_id(), "Running assistant");

    let (tx, mut rx) = mpsc::channel(32);
    let assistant = components.assistant.clone();
    let turn = tokio::spawn(async move { assistant.run_streaming(request, tx).await });

    while let Some(event) = rx.recv().await {
        print!("{}", event.to_ndjson());
    }

    let outcome = turn.await??;
    info!(status = ?outcome.status, iterations = outcome.iterations, "Turn finished");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(args(&["--session", "s1", "u1", "spent", "12", "on", "lunch"])).unwrap();
        assert_eq!(parsed.session_id.as_deref(), Some("s1"));
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.message, "spent 12 on lunch");

        assert!(parse_args(args(&["u1"])).is_none());
    }
}
