//! Terminal prompts answering the engine's interactive questions.

use async_trait::async_trait;
use exn::ResultExt;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use todosync_provider::error::{ErrorKind as ProviderErrorKind, Result as ProviderResult};
use todosync_provider::{Authorizer, BasicCredentials, Provider};
use todosync_sync::{Conflict, ConflictResolver, Resolution};

pub struct Prompt {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    default_url: Option<String>,
}

impl Prompt {
    pub fn new(default_url: Option<String>) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            default_url,
        }
    }

    pub fn is_interactive() -> bool {
        std::io::stdin().is_terminal()
    }

    /// Print `question` and read one trimmed line. `None` on end of input.
    async fn ask(&self, question: &str) -> std::io::Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        let mut stderr = tokio::io::stderr();
        stderr.write_all(question.as_bytes()).await?;
        stderr.flush().await?;
        Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
    }

    async fn ask_required(&self, question: &str) -> ProviderResult<String> {
        match self.ask(question).await.or_raise(|| ProviderErrorKind::Authorization("could not read from the terminal".to_string()))? {
            Some(answer) if !answer.is_empty() => Ok(answer),
            _ => exn::bail!(ProviderErrorKind::Authorization("sign-in cancelled".to_string())),
        }
    }
}

#[async_trait]
impl Authorizer for Prompt {
    async fn authorization_code(&self, provider: Provider, url: &str) -> ProviderResult<String> {
        eprintln!("Open this address to allow access to {provider}:\n\n    {url}\n");
        self.ask_required("Authorization code: ").await
    }

    async fn basic_credentials(&self, provider: Provider) -> ProviderResult<BasicCredentials> {
        let url = match &self.default_url {
            Some(default) => {
                let answer = self.ask(&format!("{provider} server [{default}]: ")).await.or_raise(|| {
                    ProviderErrorKind::Authorization("could not read from the terminal".to_string())
                })?;
                answer.filter(|answer| !answer.is_empty()).unwrap_or_else(|| default.clone())
            },
            None => self.ask_required(&format!("{provider} server: ")).await?,
        };
        let username = self.ask_required("Username: ").await?;
        let password = self.ask_required("Password: ").await?;
        Ok(BasicCredentials { url, username, password })
    }
}

#[async_trait]
impl ConflictResolver for Prompt {
    async fn resolve(&self, conflict: &Conflict) -> Option<Resolution> {
        eprintln!(
            "{} and {} ({}) both changed since the last sync.",
            conflict.local_path.display(),
            conflict.remote.path,
            conflict.provider,
        );
        loop {
            let answer = match self.ask("Keep [l]ocal, keep [r]emote or [s]kip? ").await {
                Ok(Some(answer)) => answer,
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, "could not read conflict resolution");
                    return None;
                },
            };
            match answer.to_ascii_lowercase().as_str() {
                "l" | "local" => return Some(Resolution::KeepLocal),
                "r" | "remote" => return Some(Resolution::KeepRemote),
                "s" | "skip" | "" => return None,
                _ => continue,
            }
        }
    }
}
