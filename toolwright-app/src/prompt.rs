use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use toolwright_core::{ConfirmationKind, ConfirmationOutcome, ToolConfirmationDetails};
use toolwright_policy::ConfirmationHandler;
use tracing::warn;

/// Asks on the terminal.
pub struct TerminalConfirmationHandler;

#[async_trait]
impl ConfirmationHandler for TerminalConfirmationHandler {
    async fn confirm(&self, call_id: &str, details: &ToolConfirmationDetails) -> ConfirmationOutcome {
        let summary = describe(call_id, details);
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout();
            writeln!(stdout, "{summary}")?;
            write!(stdout, "Proceed? [y]es / [a]lways / always for [s]ource / [n]o: ")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            Ok(Err(e)) => {
                warn!("Failed to read confirmation: {}", e);
                ConfirmationOutcome::Cancelled
            }
            Err(e) => {
                warn!("Confirmation prompt aborted: {}", e);
                ConfirmationOutcome::Cancelled
            }
        }
    }
}

pub fn parse_answer(line: &str) -> ConfirmationOutcome {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConfirmationOutcome::ProceedOnce,
        "a" | "always" => ConfirmationOutcome::ProceedAlways,
        "s" | "source" => ConfirmationOutcome::ProceedAlwaysForSource,
        _ => ConfirmationOutcome::Cancelled,
    }
}

fn describe(call_id: &str, details: &ToolConfirmationDetails) -> String {
    let mut out = format!("\n[{call_id}] {}", details.title);
    if details.dangerous {
        out.push_str("  (dangerous)");
    }
    match &details.kind {
        ConfirmationKind::Edit { file_path, preview, .. } => {
            out.push_str(&format!("\n  file: {file_path}\n{preview}"));
        }
        ConfirmationKind::Exec { command, .. } => {
            out.push_str(&format!("\n  $ {command}"));
        }
        ConfirmationKind::Remote { server, tool } => {
            out.push_str(&format!("\n  {tool} on {server}"));
        }
        ConfirmationKind::Info { prompt } => {
            out.push_str(&format!("\n  {prompt}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n"), ConfirmationOutcome::ProceedOnce);
        assert_eq!(parse_answer(" Always "), ConfirmationOutcome::ProceedAlways);
        assert_eq!(parse_answer("s"), ConfirmationOutcome::ProceedAlwaysForSource);
        assert_eq!(parse_answer(""), ConfirmationOutcome::Cancelled);
        assert_eq!(parse_answer("nope"), ConfirmationOutcome::Cancelled);
    }
}
