//! Interactive approval on the terminal.

use async_trait::async_trait;
use sandbox_tools::{ApprovalRequest, ApprovalResponse, Suspender};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Asks on stderr and reads the answer from stdin.
///
/// `y` approves, `a` approves and remembers the command, anything else
/// rejects; text after `n ` is passed back as feedback.
pub struct TerminalPrompt {
    stdin: Mutex<BufReader<tokio::io::Stdin>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret one answer line.
pub fn parse_answer(line: &str) -> ApprovalResponse {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head.to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalResponse::approve(),
        "a" | "always" => ApprovalResponse::approve_always(),
        "n" | "no" if !rest.is_empty() => ApprovalResponse::reject(rest),
        _ => ApprovalResponse {
            approved: false,
            feedback: None,
            allow_always: false,
        },
    }
}

#[async_trait]
impl Suspender for TerminalPrompt {
    async fn suspend(
        &self,
        step_key: &str,
        request: ApprovalRequest,
        timeout: Option<Duration>,
    ) -> sandbox_tools::Result<ApprovalResponse> {
        let mut stderr = tokio::io::stderr();
        let question = format!(
            "[{}] {} wants to run: {}\nApprove? [y]es / [a]lways / [n]o <feedback>: ",
            step_key, request.tool, request.summary
        );
        stderr
            .write_all(question.as_bytes())
            .await
            .map_err(|e| sandbox_tools::Error::approval(e.to_string()))?;
        stderr
            .flush()
            .await
            .map_err(|e| sandbox_tools::Error::approval(e.to_string()))?;

        let mut stdin = self.stdin.lock().await;
        let mut line = String::new();
        let read = stdin.read_line(&mut line);
        let bytes = match timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| sandbox_tools::Error::approval("timed out waiting for an answer"))?,
            None => read.await,
        }
        .map_err(|e| sandbox_tools::Error::approval(e.to_string()))?;

        if bytes == 0 {
            return Err(sandbox_tools::Error::approval("stdin closed"));
        }
        Ok(parse_answer(&line))
    }
}
