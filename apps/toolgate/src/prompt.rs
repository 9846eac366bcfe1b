//! Terminal approval prompt

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::warn;

use toolgate_gateway::{ApprovalDecision, ApprovalPrompt, ApprovalRequest};

/// Asks on stdin: `y` approve, `a` approve and always trust, `n` deny
pub struct TerminalPrompt {
    // One question at a time
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_answer(line: &str) -> Option<ApprovalDecision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ApprovalDecision::approve()),
        "a" | "always" => Some(ApprovalDecision::approve_always()),
        "n" | "no" | "" => Some(ApprovalDecision::deny()),
        _ => None,
    }
}

#[async_trait]
impl ApprovalPrompt for TerminalPrompt {
    async fn request(&self, request: ApprovalRequest) -> ApprovalDecision {
        let mut input = self.input.lock().await;
        let mut stdout = tokio::io::stdout();

        loop {
            let question = format!(
                "\nClient '{}' ({}) wants to use this machine's tools. Allow? [y]es / [a]lways / [N]o: ",
                request.client, request.connection_id
            );
            if stdout.write_all(question.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                warn!(client = %request.client, "[Prompt] Terminal unavailable, denying");
                return ApprovalDecision::deny();
            }

            match input.next_line().await {
                Ok(Some(line)) => match parse_answer(&line) {
                    Some(decision) => return decision,
                    None => continue,
                },
                Ok(None) | Err(_) => {
                    warn!(client = %request.client, "[Prompt] stdin closed, denying");
                    return ApprovalDecision::deny();
                }
            }
        }
    }
}
