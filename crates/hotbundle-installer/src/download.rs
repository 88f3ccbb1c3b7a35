use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use hotbundle_core::{BodyEvent, HttpTransport, UpdateError, UpdateResult};
use hotbundle_security::Sha256Writer;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::progress::ProgressHub;

const WRITE_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub bytes: u64,
    pub sha256: String,
}

/// Streams `url` into `target`. A leftover file from an earlier attempt is
/// discarded, never resumed.
pub async fn download_to_file(
    transport: &dyn HttpTransport,
    url: &str,
    target: &Path,
    key: &str,
    progress: &ProgressHub,
) -> UpdateResult<DownloadSummary> {
    match fs::remove_file(target).await {
        Ok(()) => debug!(path = %target.display(), "discarded stale download"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(UpdateError::storage_at("remove", target, err)),
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| UpdateError::storage_at("create", parent, err))?;
    }

    let response = transport.get(url).await?;
    if response.status > 299 {
        return Err(UpdateError::Network(format!(
            "server responded with status {} for {url}",
            response.status
        )));
    }
    let mut declared = response.content_length.filter(|length| *length > 0);

    let file = File::create(target)
        .await
        .map_err(|err| UpdateError::storage_at("create", target, err))?;
    let (sender, receiver) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
    let writer = tokio::spawn(write_queue(file, target.to_path_buf(), receiver));

    let mut body = response.body;
    let mut digest = Sha256Writer::new();
    let mut stream_error = None;
    while let Some(event) = body.next().await {
        match event {
            Ok(BodyEvent::Data(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                digest.update(&chunk);
                if sender.send(chunk).await.is_err() {
                    break;
                }
                progress.publish(key, digest.written(), declared.unwrap_or(0));
            }
            Ok(BodyEvent::Progress { total, .. }) => {
                if declared.is_none() && total > 0 {
                    declared = Some(total);
                }
            }
            Err(err) => {
                stream_error = Some(err);
                break;
            }
        }
    }
    drop(sender);

    let written = writer
        .await
        .map_err(|err| UpdateError::State(format!("download writer task failed: {err}")))??;
    if let Some(err) = stream_error {
        return Err(err);
    }
    if written != digest.written() {
        return Err(UpdateError::Integrity(format!(
            "wrote {written} of {} received bytes to {}",
            digest.written(),
            target.display()
        )));
    }
    if let Some(expected) = declared {
        if written != expected {
            return Err(UpdateError::Integrity(format!(
                "expected {expected} bytes from {url}, received {written}"
            )));
        }
    }

    Ok(DownloadSummary {
        bytes: written,
        sha256: digest.finish_hex(),
    })
}

/// Drains the queue in order so chunks land on disk as they were received.
async fn write_queue(
    mut file: File,
    path: PathBuf,
    mut receiver: mpsc::Receiver<Vec<u8>>,
) -> UpdateResult<u64> {
    let mut written = 0_u64;
    while let Some(chunk) = receiver.recv().await {
        file.write_all(&chunk)
            .await
            .map_err(|err| UpdateError::storage_at("write", &path, err))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|err| UpdateError::storage_at("flush", &path, err))?;
    file.sync_all()
        .await
        .map_err(|err| UpdateError::storage_at("sync", &path, err))?;
    Ok(written)
}
