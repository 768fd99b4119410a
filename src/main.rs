mod cli;
mod error;
mod prompt;

use crate::cli::{Cli, Command, split_completed};
use crate::error::{ErrorKind, Result};
use crate::prompt::Prompt;
use clap::Parser;
use exn::ResultExt;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use todosync_config::Config;
use todosync_provider::credentials::FileCredentials;
use todosync_provider::{CredentialStore, Provider, ProviderAdapter, RemoteItem};
use todosync_refs::JsonFilePreferences;
use todosync_sync::{FileNames, LocalFiles, LogNotifier, SyncEngine, SyncEvent, SyncOutcome, SyncSettings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "loaded configuration");
    let prompt = Arc::new(Prompt::new(config.webdav.url.clone()));
    let engine = engine(&config, &prompt).await?;
    let report = engine.migration_report();
    if !report.is_empty() {
        println!("Upgraded {} linked file(s) and {} done file(s) from an older version.", report.files, report.done_files);
    }

    match cli.command {
        Command::Login { provider } => {
            engine.authenticate(provider, prompt.as_ref()).await.or_raise(|| command("sign-in failed"))?;
            println!("Signed in to {provider}.");
        },
        Command::Logout { provider } => {
            let removed = engine.remove_provider(provider).await.or_raise(|| command("sign-out failed"))?;
            println!("Signed out of {provider}, {removed} file(s) unlinked.");
        },
        Command::Link { file, provider, remote } => {
            let file = absolute(&file)?;
            let outcome = engine.link_file(&file, provider, remote.as_deref()).await.or_raise(|| command("link failed"))?;
            print_outcome(&file, &outcome);
        },
        Command::Import { remote, file, provider } => {
            let file = absolute(&file)?;
            let outcome = engine.import_file(&file, provider, &remote).await.or_raise(|| command("import failed"))?;
            print_outcome(&file, &outcome);
        },
        Command::Unlink { file } => {
            let file = absolute(&file)?;
            if engine.unlink(&file).await.or_raise(|| command("unlink failed"))? {
                println!("{} is no longer synced.", file.display());
            } else {
                println!("{} was not linked.", file.display());
            }
        },
        Command::Delete { file } => {
            let file = absolute(&file)?;
            engine.delete_file(&file).await.or_raise(|| command("delete failed"))?;
            println!("Deleted the remote copies of {}.", file.display());
        },
        Command::Sync { file: Some(file), .. } => {
            let file = absolute(&file)?;
            let outcome = engine.sync_file(&file).await.or_raise(|| command("sync failed"))?;
            print_outcome(&file, &outcome);
        },
        Command::Sync { file: None, outdated } => sync_all(&engine, outdated).await?,
        Command::Status => status(&engine).await?,
        Command::Ls { provider, path } => list(&engine, provider, &path).await?,
        Command::Archive { file } => {
            let file = absolute(&file)?;
            let text = engine.local_files().read(&file).await.or_raise(|| command("could not read task list"))?;
            let (remaining, completed) = split_completed(&text.unwrap_or_default());
            if completed.is_empty() {
                println!("No completed tasks to archive.");
                return Ok(());
            }
            if let Some(outcome) = engine.archive_tasks(&file, &completed).await.or_raise(|| command("archive failed"))? {
                print_outcome(&engine.done_path(&file).unwrap_or_default(), &outcome);
            }
            engine.local_files().write(&file, &remaining).await.or_raise(|| command("could not write task list"))?;
            if engine.refs().get(&file).await.or_raise(|| command("could not read file refs"))?.is_some() {
                let outcome = engine.sync_content(&file, remaining).await.or_raise(|| command("sync failed"))?;
                print_outcome(&file, &outcome);
            }
            println!("Archived {} task(s).", completed.len());
        },
        Command::Restore { file, task: Some(task) } => {
            let file = absolute(&file)?;
            if engine.restore_task(&file, &task).await.or_raise(|| command("restore failed"))? {
                println!("Restored 1 task.");
            } else {
                println!("No such archived task.");
            }
        },
        Command::Restore { file, task: None } => {
            let file = absolute(&file)?;
            let count = engine.restore_all(&file).await.or_raise(|| command("restore failed"))?;
            println!("Restored {count} task(s).");
        },
        Command::Mode { mode: None } => {
            let mode = engine.archive_settings().mode().await.or_raise(|| command("could not read archive mode"))?;
            println!("{mode}");
        },
        Command::Mode { mode: Some(mode) } => {
            engine.archive_settings().set_mode(mode).await.or_raise(|| command("could not set archive mode"))?;
            println!("Archive mode set to {mode}.");
        },
    }
    Ok(())
}

fn command(message: &str) -> ErrorKind {
    ErrorKind::Command(message.to_string())
}

async fn engine(config: &Config, prompt: &Arc<Prompt>) -> Result<SyncEngine> {
    let prefs = Arc::new(JsonFilePreferences::new(config.preferences_path()));
    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentials::new(config.credentials_path()));
    let settings = SyncSettings {
        stale_after: config.sync.stale_after(),
        concurrency: config.sync.concurrency,
        names: FileNames { todo: config.names.todo.clone(), done: config.names.done.clone() },
    };
    let mut builder = SyncEngine::builder(prefs).settings(settings).notifier(Arc::new(LogNotifier));
    if Prompt::is_interactive() {
        builder = builder.resolver(prompt.clone());
    }

    #[cfg(feature = "dropbox")]
    {
        match &config.dropbox.app_key {
            Some(app_key) => {
                let adapter = todosync_provider::adapter::DropboxAdapter::new(app_key.clone(), credentials.clone())
                    .or_raise(|| ErrorKind::Provider(Provider::Dropbox.to_string()))?;
                builder = builder.adapter(Arc::new(adapter));
            },
            None => tracing::debug!("no Dropbox app key configured, Dropbox is unavailable"),
        }
    }
    #[cfg(feature = "webdav")]
    {
        let adapter = todosync_provider::adapter::WebDavAdapter::new(credentials.clone())
            .or_raise(|| ErrorKind::Provider(Provider::WebDav.to_string()))?;
        builder = builder.adapter(Arc::new(adapter));
    }

    builder.build().await.or_raise(|| command("could not open file refs"))
}

/// Refs are keyed by absolute path, whatever directory the command runs in.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).or_raise(|| command("could not resolve path"))
}

fn print_outcome(path: &Path, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::NoAction => println!("{}: up to date", path.display()),
        SyncOutcome::Pushed { new_ref } => println!("{}: uploaded revision {}", path.display(), new_ref.revision),
        SyncOutcome::Pulled { new_ref, .. } => println!("{}: downloaded revision {}", path.display(), new_ref.revision),
        SyncOutcome::Conflict { remote, .. } => {
            println!("{}: conflict with {} left unresolved", path.display(), remote.path);
        },
    }
}

async fn sync_all(engine: &SyncEngine, outdated: bool) -> Result<()> {
    let mut events = std::pin::pin!(engine.sync_all(outdated));
    let mut failures = 0_usize;
    while let Some(event) = events.next().await {
        match event.or_raise(|| command("sync failed"))? {
            SyncEvent::Started => {},
            SyncEvent::DiscoveryComplete(0) => println!("Nothing to sync."),
            SyncEvent::DiscoveryComplete(count) => println!("Syncing {count} file(s)."),
            SyncEvent::Synced { path, outcome } => print_outcome(&path, &outcome),
            SyncEvent::Failed { path, error } => {
                failures += 1;
                println!("{}: {error}", path.display());
            },
            SyncEvent::Complete => {},
        }
    }
    if failures > 0 {
        exn::bail!(command(&format!("{failures} file(s) failed to sync")));
    }
    Ok(())
}

async fn status(engine: &SyncEngine) -> Result<()> {
    let file_refs = engine.refs().list(None).await.or_raise(|| command("could not read file refs"))?;
    if file_refs.is_empty() {
        println!("No linked files.");
    }
    for file_ref in file_refs {
        let last_sync = file_ref.last_sync.format(&Rfc3339).unwrap_or_default();
        println!(
            "{}\n    {} {} (revision {}, synced {last_sync})",
            file_ref.local_file_path.display(),
            file_ref.provider,
            file_ref.path,
            file_ref.revision,
        );
        if let Some(done_ref) = engine.refs().get_done(&file_ref.local_file_path).await.or_raise(|| command("could not read file refs"))? {
            println!("    done file {} (revision {})", done_ref.path, done_ref.revision);
        }
    }
    let mode = engine.archive_settings().mode().await.or_raise(|| command("could not read archive mode"))?;
    println!("Archive mode: {mode}");
    Ok(())
}

async fn list(engine: &SyncEngine, provider: Provider, path: &str) -> Result<()> {
    let adapter = engine.adapter(provider).or_raise(|| command("provider unavailable"))?;
    let mut cursor = None;
    loop {
        let page = adapter.list_files(path, cursor.as_deref()).await.or_raise(|| command("listing failed"))?;
        for item in &page.items {
            match item {
                RemoteItem::Folder { path, .. } => println!("{path}/"),
                RemoteItem::File(file) => println!("{}", file.path),
            }
        }
        if !page.has_more {
            break;
        }
        cursor = page.cursor;
    }
    Ok(())
}
