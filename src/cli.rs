use clap::{Parser, Subcommand};
use std::path::PathBuf;
use todosync_provider::Provider;
use todosync_refs::ArchiveMode;

#[derive(Debug, Parser)]
#[command(name = "todosync", version, about = "Keep todo.txt task lists in sync with Dropbox and WebDAV")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Extra configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true, env = "TODOSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in to a provider.
    Login { provider: Provider },
    /// Sign out of a provider and forget every file linked to it.
    Logout { provider: Provider },
    /// Upload a local task list and keep it in sync.
    Link {
        file: PathBuf,
        #[arg(short, long)]
        provider: Provider,
        /// Remote path, `/<file name>` by default.
        #[arg(short, long)]
        remote: Option<String>,
    },
    /// Download a remote task list and keep it in sync.
    Import {
        remote: String,
        file: PathBuf,
        #[arg(short, long)]
        provider: Provider,
    },
    /// Stop syncing a file. Nothing is deleted.
    Unlink { file: PathBuf },
    /// Delete the remote copies of a file and its done file, then unlink it.
    Delete { file: PathBuf },
    /// Sync one file, or every linked file.
    Sync {
        file: Option<PathBuf>,
        /// Skip the batch if anything was synced recently.
        #[arg(long, conflicts_with = "file")]
        outdated: bool,
    },
    /// Show linked files.
    Status,
    /// List a remote folder.
    Ls {
        provider: Provider,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Move completed tasks into the done file.
    Archive { file: PathBuf },
    /// Move archived tasks back into the task list.
    Restore {
        file: PathBuf,
        /// The exact task line to restore; every task when omitted.
        task: Option<String>,
    },
    /// Show or change the archive mode.
    Mode { mode: Option<ArchiveMode> },
}

/// Split completed tasks (`x ` prefix) from the rest, keeping blank lines and
/// the line ending of `text`.
pub fn split_completed(text: &str) -> (String, Vec<String>) {
    let ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let (done, open): (Vec<&str>, Vec<&str>) = text.lines().partition(|line| line.starts_with("x "));
    let mut remaining = open.join(ending);
    if text.ends_with('\n') && !open.is_empty() {
        remaining.push_str(ending);
    }
    (remaining, done.into_iter().map(str::to_string).collect())
}
