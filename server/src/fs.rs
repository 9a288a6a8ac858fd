//! A data plane moving files between directories of the local file system.
//!
//! Every data plane owns a storage directory. As a provider, it serves datasets stored as files
//! named after their dataset ID. As a consumer, it prepares destinations in a subdirectory named
//! after the flow ID.

use async_std::{
    channel::{unbounded, Receiver, Sender},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    task::{sleep, spawn, JoinHandle},
};
use async_trait::async_trait;
use dataplane::{Builder, DataAddress, DataFlow, Dataplane, Error, Hook};
use std::collections::HashMap;
use std::future::Future;
use std::path::Component;
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Transfer types supported by the file-system data plane.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, EnumIter, EnumString)]
pub enum TransferType {
    /// Copy the dataset once to a file prepared by the consumer.
    #[strum(serialize = "FileSystem-PUSH")]
    Push,
    /// Like [`Push`](Self::Push), but the consumer prepares its destination asynchronously.
    #[strum(serialize = "FileSystemAsync-PUSH")]
    AsyncPush,
    /// Keep writing copies of the dataset into a folder prepared by the consumer, until the
    /// flow is suspended or terminated.
    #[strum(serialize = "FileSystemStreaming-PUSH")]
    StreamingPush,
}

impl TransferType {
    fn of(flow: &DataFlow) -> anyhow::Result<Self> {
        flow.transfer_type().parse().map_err(|_| {
            anyhow::Error::msg(format!(
                "unsupported transfer type {}",
                flow.transfer_type()
            ))
        })
    }
}

/// The result of work done in the background, to be reported to the control plane.
#[derive(Clone, Debug)]
enum Outcome {
    Prepared(String),
    Completed(String),
    Errored(String, String),
}

/// Shared state of the file-system hooks.
#[derive(Clone)]
struct FileSystem {
    storage: PathBuf,
    interval: Duration,
    streams: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    outcomes: Sender<Outcome>,
}

/// Build a file-system data plane on top of `builder`.
///
/// `storage` is the directory holding datasets and prepared destinations; streaming transfers
/// write a new file every `interval`.
pub fn dataplane(builder: Builder, storage: impl Into<PathBuf>, interval: Duration) -> Dataplane {
    let (outcomes, reports) = unbounded();
    let fs = FileSystem {
        storage: storage.into(),
        interval,
        streams: Default::default(),
        outcomes,
    };

    let dataplane = TransferType::iter()
        .fold(builder, |builder, ty| builder.transfer_type(ty.to_string()))
        .on_prepare(Prepare(fs.clone()))
        .on_start(Start(fs.clone()))
        .on_started(Stop(fs.clone()))
        .on_completed(Stop(fs.clone()))
        .on_suspend(Stop(fs.clone()))
        .on_terminate(Stop(fs.clone()))
        .build();
    spawn(report(dataplane.clone(), fs.storage, reports));
    dataplane
}

/// The path of the entry `name` directly inside `storage`.
///
/// Names come from the control plane, so anything other than a single plain path component is
/// rejected rather than allowed to resolve outside of `storage`.
fn entry(storage: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let mut components = std::path::Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(storage.join(name)),
        _ => Err(anyhow::Error::msg(format!("invalid storage entry {name:?}"))),
    }
}

/// Set the destination of a consumer-side flow, creating its directory.
async fn prepare_destination(storage: &Path, mut flow: DataFlow) -> anyhow::Result<DataFlow> {
    let dir = entry(storage, flow.id())?;
    fs::create_dir_all(&dir).await?;
    let address = match TransferType::of(&flow)? {
        TransferType::Push | TransferType::AsyncPush => {
            DataAddress::new("file", dir.join("content").to_string_lossy(), vec![])
        }
        TransferType::StreamingPush => DataAddress::new("folder", dir.to_string_lossy(), vec![]),
    };
    flow.set_data_address(address);
    Ok(flow)
}

struct Prepare(FileSystem);

#[async_trait]
impl Hook for Prepare {
    async fn call(&self, mut flow: DataFlow) -> anyhow::Result<DataFlow> {
        if TransferType::of(&flow)? == TransferType::AsyncPush {
            flow.transition_to_preparing();
            self.0
                .outcomes
                .send(Outcome::Prepared(flow.id().into()))
                .await?;
            return Ok(flow);
        }
        prepare_destination(&self.0.storage, flow).await
    }
}

/// Finishes an asynchronous preparation.
struct Destination(PathBuf);

#[async_trait]
impl Hook for Destination {
    async fn call(&self, flow: DataFlow) -> anyhow::Result<DataFlow> {
        prepare_destination(&self.0, flow).await
    }
}

struct Start(FileSystem);

#[async_trait]
impl Hook for Start {
    async fn call(&self, flow: DataFlow) -> anyhow::Result<DataFlow> {
        let ty = TransferType::of(&flow)?;
        let destination = flow
            .data_address()
            .map(|address| PathBuf::from(&address.endpoint))
            .ok_or_else(|| anyhow::Error::msg("missing destination data address"))?;
        let source = entry(&self.0.storage, flow.dataset_id())?;
        let id = flow.id().to_string();
        let outcomes = self.0.outcomes.clone();
        tracing::info!(
            %id,
            %ty,
            source = %source.display(),
            destination = %destination.display(),
            "starting transfer"
        );

        match ty {
            TransferType::Push | TransferType::AsyncPush => {
                spawn(async move {
                    let outcome = match fs::copy(&source, &destination).await {
                        Ok(bytes) => {
                            tracing::info!(%id, bytes, "transfer complete");
                            Outcome::Completed(id)
                        }
                        Err(err) => {
                            tracing::warn!(%id, "transfer failed: {err}");
                            Outcome::Errored(id, err.to_string())
                        }
                    };
                    outcomes.send(outcome).await.ok();
                });
            }
            TransferType::StreamingPush => {
                // Hold the lock until the handle is stored, so a stream failing right away
                // cannot try to remove itself before it is registered.
                let mut streams = self.0.streams.lock().await;
                let stream = spawn(stream(
                    source,
                    destination,
                    self.0.interval,
                    id.clone(),
                    outcomes,
                    self.0.streams.clone(),
                ));
                if let Some(old) = streams.insert(id, stream) {
                    old.cancel().await;
                }
            }
        }
        Ok(flow)
    }
}

/// Write a copy of `source` into the folder `destination` every `interval`.
async fn stream(
    source: PathBuf,
    destination: PathBuf,
    interval: Duration,
    id: String,
    outcomes: Sender<Outcome>,
    streams: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
) {
    loop {
        let target = destination.join(Uuid::new_v4().to_string());
        if let Err(err) = fs::copy(&source, &target).await {
            tracing::warn!(%id, "stream failed: {err}");
            // Dropping our own handle detaches this task, which is about to finish anyway.
            streams.lock().await.remove(&id);
            outcomes.send(Outcome::Errored(id, err.to_string())).await.ok();
            return;
        }
        sleep(interval).await;
    }
}

/// Stops any stream running for the flow, then accepts it.
struct Stop(FileSystem);

#[async_trait]
impl Hook for Stop {
    async fn call(&self, flow: DataFlow) -> anyhow::Result<DataFlow> {
        let stream = self.0.streams.lock().await.remove(flow.id());
        if let Some(stream) = stream {
            tracing::info!(id = flow.id(), "stopping stream");
            stream.cancel().await;
        }
        Ok(flow)
    }
}

/// Report background outcomes to the control plane.
async fn report(dataplane: Dataplane, storage: PathBuf, reports: Receiver<Outcome>) {
    let dataplane = &dataplane;
    let storage = &storage;
    while let Ok(outcome) = reports.recv().await {
        let res = match &outcome {
            Outcome::Prepared(id) => {
                once_saved(move || dataplane.notify_prepared(id, Destination(storage.clone())))
                    .await
            }
            Outcome::Completed(id) => once_saved(move || dataplane.notify_completed(id)).await,
            Outcome::Errored(id, err) => {
                once_saved(move || dataplane.notify_errored(id, err)).await
            }
        };
        if let Err(err) = res {
            tracing::error!(?outcome, "unable to notify control plane: {err}");
        }
    }
}

/// Retry `notify` while the flow is not yet stored.
///
/// Hooks run before the flow they act on is first saved, so work they start in the background
/// may finish before the flow can be found.
async fn once_saved<F, Fut>(mut notify: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    const MAX_ATTEMPTS: usize = 50;

    for _ in 1..MAX_ATTEMPTS {
        match notify().await {
            Err(Error::NotFound { id }) => {
                tracing::debug!(%id, "flow not saved yet, retrying");
                sleep(Duration::from_millis(20)).await;
            }
            res => return res,
        }
    }
    notify().await
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_storage() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dataplane-fs-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.into()
    }

    fn file_system(storage: PathBuf) -> (FileSystem, Receiver<Outcome>) {
        let (outcomes, reports) = unbounded();
        let fs = FileSystem {
            storage,
            interval: Duration::from_millis(10),
            streams: Default::default(),
            outcomes,
        };
        (fs, reports)
    }

    #[test]
    fn test_entry() {
        let storage = PathBuf::from("/var/lib/dataplane");
        assert_eq!(
            entry(&storage, "flow-1").unwrap(),
            PathBuf::from("/var/lib/dataplane/flow-1")
        );
        for name in ["", ".", "..", "/etc/passwd", "../../../etc/passwd", "a/b", "./a"] {
            assert!(entry(&storage, name).is_err(), "{name:?} accepted");
        }
    }

    #[async_std::test]
    async fn test_prepare_destination() {
        let storage = temp_storage();

        let flow = DataFlow::new("flow").with_transfer_type("FileSystem-PUSH");
        let flow = prepare_destination(&storage, flow).await.unwrap();
        let address = flow.data_address().unwrap();
        assert_eq!(address.endpoint_type, "file");
        assert_eq!(
            PathBuf::from(&address.endpoint),
            storage.join("flow").join("content")
        );
        assert!(storage.join("flow").is_dir().await);

        let flow = DataFlow::new("stream").with_transfer_type("FileSystemStreaming-PUSH");
        let flow = prepare_destination(&storage, flow).await.unwrap();
        let address = flow.data_address().unwrap();
        assert_eq!(address.endpoint_type, "folder");
        assert_eq!(PathBuf::from(&address.endpoint), storage.join("stream"));
    }

    #[async_std::test]
    async fn test_prepare_destination_outside_storage() {
        let storage = temp_storage();

        let outside = std::env::temp_dir().join(format!("dataplane-outside-{}", Uuid::new_v4()));
        let flow = DataFlow::new(outside.to_string_lossy()).with_transfer_type("FileSystem-PUSH");
        prepare_destination(&storage, flow).await.unwrap_err();
        assert!(!outside.exists());

        let flow = DataFlow::new("../escaped").with_transfer_type("FileSystem-PUSH");
        prepare_destination(&storage, flow).await.unwrap_err();
        assert!(!storage.join("..").join("escaped").exists().await);
    }

    #[async_std::test]
    async fn test_start_source_outside_storage() {
        let storage = temp_storage();
        let (fs, _reports) = file_system(storage.clone());
        let destination = storage.join("copy");

        for dataset in ["/etc/passwd", "../../../etc/passwd"] {
            let flow = DataFlow::new("flow")
                .with_transfer_type("FileSystem-PUSH")
                .with_dataset_id(dataset)
                .with_data_address(Some(DataAddress::new(
                    "file",
                    destination.to_string_lossy(),
                    vec![],
                )));
            Start(fs.clone()).call(flow).await.unwrap_err();
        }
        assert!(!destination.exists().await);
    }

    #[async_std::test]
    async fn test_failed_stream_is_forgotten() {
        let storage = temp_storage();
        let (fs, reports) = file_system(storage.clone());

        let flow = DataFlow::new("flow")
            .with_transfer_type("FileSystemStreaming-PUSH")
            .with_dataset_id("missing")
            .with_data_address(Some(DataAddress::new(
                "folder",
                storage.to_string_lossy(),
                vec![],
            )));
        Start(fs.clone()).call(flow).await.unwrap();

        let outcome = reports.recv().await.unwrap();
        assert!(
            matches!(&outcome, Outcome::Errored(id, _) if id == "flow"),
            "{outcome:?}"
        );
        assert!(fs.streams.lock().await.is_empty());
    }
}
