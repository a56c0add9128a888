//! Command line interface.

use clap::{Args, Parser, Subcommand};
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::error::{
    AppError, ConfigSnafu, MessageUploadSnafu, ObjectUploadSnafu, QueueSnafu, ReadInputSnafu,
    StorageSnafu,
};
use crate::queue::{Payload, QueueManager};
use crate::storage::{StorageManager, StorageObject};

#[derive(Parser, Debug)]
#[command(version, about = "Batch clients for a message queue and blob storage")]
pub struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue operations
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Storage operations
    #[command(subcommand)]
    Storage(StorageCommand),
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Send one message per non-empty line of a file
    Upload { file: PathBuf },
    /// Receive messages and print their bodies
    Receive {
        #[arg(long, default_value_t = 1)]
        max: usize,
        /// Delete each message after printing it
        #[arg(long)]
        delete: bool,
    },
    /// Print the approximate number of waiting messages
    Size,
    /// Remove every message
    Purge,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, default_value = "")]
    pub prefix: String,
    /// Stop after this many keys
    #[arg(long)]
    pub max: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    /// Upload files, keyed by file name under an optional prefix
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Print an object as UTF-8 text
    Get { key: String },
    /// List keys
    List(ListArgs),
    /// Report whether a key or prefix exists
    Exists { key: String },
    /// Delete an object
    Delete { key: String },
    /// List buckets, newest first
    Buckets,
}

/// Run a parsed command to completion.
pub async fn run(args: CliArgs) -> Result<(), AppError> {
    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    match args.command {
        Command::Queue(command) => run_queue(&config, command).await,
        Command::Storage(command) => run_storage(&config, command).await,
    }
}

async fn run_queue(config: &Config, command: QueueCommand) -> Result<(), AppError> {
    let queue_config = config.queue().context(ConfigSnafu)?;
    let manager = QueueManager::from_config(queue_config, &config.batch)
        .await
        .context(QueueSnafu)?;

    match command {
        QueueCommand::Upload { file } => {
            let contents = tokio::fs::read_to_string(&file)
                .await
                .context(ReadInputSnafu { path: file.clone() })?;
            let messages: Vec<Payload> = contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| Payload::decode(line.to_string()))
                .collect();

            let summary = manager.upload(messages).await.context(MessageUploadSnafu)?;
            info!(
                "Sent {} messages in {} batches to {}",
                summary.items(),
                summary.batches(),
                manager.url()
            );
        }
        QueueCommand::Receive { max, delete } => {
            for message in manager.receive(max).await.context(QueueSnafu)? {
                println!("{}", message.payload.encode());
                if delete {
                    manager.delete(message).await.context(QueueSnafu)?;
                }
            }
        }
        QueueCommand::Size => {
            println!("{}", manager.size().await.context(QueueSnafu)?);
        }
        QueueCommand::Purge => {
            manager.purge().await.context(QueueSnafu)?;
        }
    }

    Ok(())
}

/// Object key for an uploaded file: its file name under `prefix`.
fn object_key(prefix: Option<&str>, file: &std::path::Path) -> String {
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    match prefix.map(|p| p.trim_end_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
        _ => name,
    }
}

async fn run_storage(config: &Config, command: StorageCommand) -> Result<(), AppError> {
    let storage_config = config.storage().context(ConfigSnafu)?;
    let manager = StorageManager::from_config(storage_config, &config.batch)
        .await
        .context(StorageSnafu)?;

    match command {
        StorageCommand::Upload { files, prefix } => {
            let mut objects = Vec::with_capacity(files.len());
            for file in &files {
                let bytes = tokio::fs::read(file)
                    .await
                    .context(ReadInputSnafu { path: file.clone() })?;
                objects.push(StorageObject::new(object_key(prefix.as_deref(), file), bytes));
            }

            let summary = manager.upload_many(objects).await.context(ObjectUploadSnafu)?;
            info!(
                "Uploaded {} objects to {}",
                summary.items(),
                manager.provider().canonical_url()
            );
        }
        StorageCommand::Get { key } => {
            print!("{}", manager.read_file(&key).await.context(StorageSnafu)?);
        }
        StorageCommand::List(ListArgs { prefix, max }) => {
            let keys = manager
                .list_all_files(&prefix, max)
                .await
                .context(StorageSnafu)?;
            for key in keys {
                println!("{key}");
            }
        }
        StorageCommand::Exists { key } => {
            println!("{}", manager.exists(&key).await.context(StorageSnafu)?);
        }
        StorageCommand::Delete { key } => {
            manager.delete(&key).await.context(StorageSnafu)?;
        }
        StorageCommand::Buckets => {
            for bucket in manager.list_buckets().await.context(StorageSnafu)? {
                println!("{bucket}");
            }
        }
    }

    Ok(())
}
