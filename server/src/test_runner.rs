#![cfg(test)]

//! End-to-end scenarios for the file-system data plane.
//!
//! Each scenario starts a consumer and a provider data plane, exactly as the binary would, plus a
//! minimal control plane. The control plane records every request it receives and relays the
//! provider's `completed` and `errored` callbacks to the consumer, the way a real control plane
//! would after matching the two sides of a transfer. Flow IDs follow the convention
//! `consumer_<process>` / `provider_<process>` so the relay can find the other side.

use super::Options;
use anyhow::{ensure, Error};
use async_std::{
    sync::{Arc, Mutex},
    task::{sleep, spawn},
};
use dataplane::testing::{eventually, wait_for_server};
use portpicker::pick_unused_port;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use surf::{http::StatusCode, Client};
use tide::{Request, Response};
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
struct Recorded {
    path: String,
    body: Value,
}

#[derive(Clone)]
struct ControlPlane {
    consumer: String,
    client: Client,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl ControlPlane {
    async fn record(&self, req: &mut Request<Self>) -> Recorded {
        let body = req.body_json().await.unwrap_or(Value::Null);
        let recorded = Recorded {
            path: req.url().path().to_string(),
            body,
        };
        tracing::info!(?recorded, "control plane received");
        self.requests.lock().await.push(recorded.clone());
        recorded
    }
}

async fn accept(mut req: Request<ControlPlane>) -> tide::Result {
    let control_plane = req.state().clone();
    control_plane.record(&mut req).await;
    Ok(Response::new(StatusCode::Ok))
}

async fn relay(mut req: Request<ControlPlane>) -> tide::Result {
    let control_plane = req.state().clone();
    let recorded = control_plane.record(&mut req).await;
    let consumer_id = req.param("id")?.replacen("provider_", "consumer_", 1);

    let (path, body) = match req.param("action")? {
        "completed" => ("completed", json!({})),
        "errored" => ("terminate", json!({ "reason": recorded.body["error"] })),
        _ => return Ok(Response::new(StatusCode::Ok)),
    };
    let res = control_plane
        .client
        .post(format!(
            "{}/dataflows/{consumer_id}/{path}",
            control_plane.consumer
        ))
        .body_json(&body)?
        .await?;
    if res.status().is_success() {
        Ok(Response::new(StatusCode::Ok))
    } else {
        Ok(Response::new(StatusCode::BadGateway))
    }
}

struct Scenario {
    client: Client,
    control_plane: String,
    consumer: String,
    provider: String,
    provider_storage: PathBuf,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Scenario {
    async fn start() -> Result<Self, Error> {
        dataplane::init_logging();

        let control_plane_port = pick_unused_port().unwrap();
        let consumer_port = pick_unused_port().unwrap();
        let provider_port = pick_unused_port().unwrap();
        let control_plane = format!("http://127.0.0.1:{control_plane_port}");
        let consumer = format!("http://127.0.0.1:{consumer_port}");
        let provider = format!("http://127.0.0.1:{provider_port}");

        // Start the control plane.
        let requests = Arc::new(Mutex::new(vec![]));
        let mut app = tide::with_state(ControlPlane {
            consumer: consumer.clone(),
            client: Client::new(),
            requests: requests.clone(),
        });
        app.at("/dataplanes/register").post(accept);
        app.at("/consumer/transfers/:id/dataflow/:action").post(accept);
        app.at("/provider/transfers/:id/dataflow/:action").post(relay);
        spawn(app.listen(format!("127.0.0.1:{control_plane_port}")));
        wait_for_server(control_plane_port).await?;

        // Start both data planes.
        let provider_storage = temp_dir("provider")?;
        for (id, port, endpoint, storage) in [
            ("consumer", consumer_port, &consumer, temp_dir("consumer")?),
            ("provider", provider_port, &provider, provider_storage.clone()),
        ] {
            let opt = Options {
                port,
                storage,
                stream_interval: 20,
                control_plane: Some(control_plane.clone()),
                dataplane: dataplane::Options {
                    id: Some(id.into()),
                    name: Some(format!("{id} data plane")),
                    description: None,
                    endpoint: Some(endpoint.clone()),
                    transfer_types: vec![],
                    labels: vec!["test".into()],
                    control_plane_timeout: 5,
                },
            };
            spawn(async move {
                if let Err(err) = opt.serve().await {
                    tracing::error!("{id} exited: {err:#}");
                }
            });
            wait_for_server(port).await?;
        }

        let scenario = Self {
            client: Client::new(),
            control_plane,
            consumer,
            provider,
            provider_storage,
            requests,
        };

        // Both data planes register once they are listening.
        let scenario_ref = &scenario;
        eventually(TIMEOUT, move || async move {
            let registered = scenario_ref.requests_to("/dataplanes/register").await;
            ensure!(registered.len() == 2, "{} registrations", registered.len());
            Ok(())
        })
        .await?;

        Ok(scenario)
    }

    /// Make `content` available as dataset `id` on the provider.
    fn provide(&self, id: &str, content: &str) -> Result<(), Error> {
        Ok(fs::write(self.provider_storage.join(id), content)?)
    }

    fn callback_address(&self, side: &str) -> String {
        format!("{}/{side}", self.control_plane)
    }

    async fn post(&self, url: String, body: Value) -> Result<(StatusCode, Value), Error> {
        let mut res = self
            .client
            .post(url)
            .body_json(&body)
            .map_err(Error::msg)?
            .await
            .map_err(Error::msg)?;
        let body = res.body_json().await.unwrap_or(Value::Null);
        Ok((res.status(), body))
    }

    async fn prepare(&self, id: &str, transfer_type: &str) -> Result<(StatusCode, Value), Error> {
        let msg = json!({
            "messageId": Uuid::new_v4().to_string(),
            "participantId": "theParticipantId",
            "counterPartyId": "theCounterPartyId",
            "dataspaceContext": "theDataspaceContext",
            "processId": id,
            "agreementId": "theAgreementId",
            "datasetId": "theDatasetId",
            "callbackAddress": self.callback_address("consumer"),
            "transferType": transfer_type,
            "labels": [],
            "metadata": {}
        });
        self.post(format!("{}/dataflows/prepare", self.consumer), msg)
            .await
    }

    async fn start_flow(
        &self,
        id: &str,
        transfer_type: &str,
        dataset: &str,
        destination: Value,
    ) -> Result<(StatusCode, Value), Error> {
        let msg = json!({
            "messageId": Uuid::new_v4().to_string(),
            "participantId": "theParticipantId",
            "counterPartyId": "theCounterPartyId",
            "dataspaceContext": "theDataspaceContext",
            "processId": id,
            "agreementId": "theAgreementId",
            "datasetId": dataset,
            "callbackAddress": self.callback_address("provider"),
            "transferType": transfer_type,
            "dataAddress": destination,
            "labels": [],
            "metadata": {}
        });
        self.post(format!("{}/dataflows/start", self.provider), msg)
            .await
    }

    async fn state(&self, dataplane: &str, id: &str) -> Result<String, Error> {
        let mut res = self
            .client
            .get(format!("{dataplane}/dataflows/{id}/status"))
            .await
            .map_err(Error::msg)?;
        ensure!(
            res.status() == StatusCode::Ok,
            "status request failed with {}",
            res.status()
        );
        let body: Value = res.body_json().await.map_err(Error::msg)?;
        Ok(body["state"].as_str().unwrap_or_default().to_string())
    }

    async fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }
}

fn temp_dir(name: &str) -> Result<PathBuf, Error> {
    let dir = std::env::temp_dir().join(format!("dataplane-{name}-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn count_files(dir: &Path) -> Result<usize, Error> {
    Ok(fs::read_dir(dir)?.count())
}

fn process_ids() -> (String, String) {
    let process = Uuid::new_v4();
    (format!("consumer_{process}"), format!("provider_{process}"))
}

#[async_std::test]
async fn test_registration() -> Result<(), Error> {
    let scenario = Scenario::start().await?;

    let registrations = scenario.requests_to("/dataplanes/register").await;
    let mut ids = registrations
        .iter()
        .map(|req| req.body["dataplaneId"].as_str().unwrap_or_default())
        .collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, ["consumer", "provider"]);
    for req in &registrations {
        assert_eq!(
            req.body["transferTypes"],
            json!([
                "FileSystem-PUSH",
                "FileSystemAsync-PUSH",
                "FileSystemStreaming-PUSH"
            ])
        );
        assert_eq!(req.body["labels"], json!(["test"]));
    }
    Ok(())
}

#[async_std::test]
async fn test_provider_push() -> Result<(), Error> {
    let scenario = Scenario::start().await?;
    let (consumer_id, provider_id) = process_ids();
    scenario.provide("dataset-1", "hello world")?;

    let (status, prepared) = scenario.prepare(&consumer_id, "FileSystem-PUSH").await?;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(prepared["state"], "PREPARED");
    let destination = prepared["dataAddress"].clone();
    assert_eq!(destination["endpointType"], "file");
    let path = PathBuf::from(destination["endpoint"].as_str().unwrap());

    let (status, started) = scenario
        .start_flow(&provider_id, "FileSystem-PUSH", "dataset-1", destination)
        .await?;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(started["state"], "STARTED");
    assert!(started.get("dataAddress").is_none());

    let scenario = &scenario;
    let (consumer_id, provider_id) = (&consumer_id, &provider_id);
    let path = &path;
    eventually(TIMEOUT, move || async move {
        ensure!(fs::read_to_string(path).ok().as_deref() == Some("hello world"));
        let provider_state = scenario.state(&scenario.provider, provider_id).await?;
        ensure!(provider_state == "COMPLETED", "provider is {provider_state}");
        let consumer_state = scenario.state(&scenario.consumer, consumer_id).await?;
        ensure!(consumer_state == "COMPLETED", "consumer is {consumer_state}");
        Ok(())
    })
    .await
}

#[async_std::test]
async fn test_provider_push_failure() -> Result<(), Error> {
    let scenario = Scenario::start().await?;
    let (consumer_id, provider_id) = process_ids();
    scenario.provide("dataset-1", "hello world")?;

    let (status, _) = scenario.prepare(&consumer_id, "FileSystem-PUSH").await?;
    assert_eq!(status, StatusCode::Ok);

    let invalid = json!({ "endpointType": "file", "endpoint": "" });
    let (status, started) = scenario
        .start_flow(&provider_id, "FileSystem-PUSH", "dataset-1", invalid)
        .await?;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(started["state"], "STARTED");

    let scenario = &scenario;
    let (consumer_id, provider_id) = (&consumer_id, &provider_id);
    eventually(TIMEOUT, move || async move {
        let provider_state = scenario.state(&scenario.provider, provider_id).await?;
        ensure!(provider_state == "TERMINATED", "provider is {provider_state}");
        let consumer_state = scenario.state(&scenario.consumer, consumer_id).await?;
        ensure!(consumer_state == "TERMINATED", "consumer is {consumer_state}");
        Ok(())
    })
    .await?;

    let errored = scenario
        .requests_to(&format!("/provider/transfers/{provider_id}/dataflow/errored"))
        .await;
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].body["state"], "TERMINATED");
    assert!(errored[0].body["error"].is_string());
    Ok(())
}

#[async_std::test]
async fn test_async_preparation() -> Result<(), Error> {
    let scenario = Scenario::start().await?;
    let (consumer_id, _) = process_ids();

    let (status, prepared) = scenario
        .prepare(&consumer_id, "FileSystemAsync-PUSH")
        .await?;
    assert_eq!(status, StatusCode::Accepted);
    assert_eq!(prepared["state"], "PREPARING");
    assert!(prepared.get("dataAddress").is_none());

    let scenario = &scenario;
    let consumer_id = &consumer_id;
    eventually(TIMEOUT, move || async move {
        let state = scenario.state(&scenario.consumer, consumer_id).await?;
        ensure!(state == "PREPARED", "consumer is {state}");
        Ok(())
    })
    .await?;

    let notified = scenario
        .requests_to(&format!("/consumer/transfers/{consumer_id}/dataflow/prepared"))
        .await;
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].body["dataplaneId"], "consumer");
    assert_eq!(notified[0].body["state"], "PREPARED");
    assert_eq!(notified[0].body["dataAddress"]["endpointType"], "file");
    Ok(())
}

#[async_std::test]
async fn test_streaming_push() -> Result<(), Error> {
    let scenario = Scenario::start().await?;
    let (consumer_id, provider_id) = process_ids();
    scenario.provide("stream", "tick")?;

    let (status, prepared) = scenario
        .prepare(&consumer_id, "FileSystemStreaming-PUSH")
        .await?;
    assert_eq!(status, StatusCode::Ok);
    let destination = prepared["dataAddress"].clone();
    assert_eq!(destination["endpointType"], "folder");
    let folder = PathBuf::from(destination["endpoint"].as_str().unwrap());

    let (status, started) = scenario
        .start_flow(&provider_id, "FileSystemStreaming-PUSH", "stream", destination)
        .await?;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(started["state"], "STARTED");

    let folder_ref = &folder;
    eventually(TIMEOUT, move || async move {
        let files = count_files(folder_ref)?;
        ensure!(files > 15, "only {files} files");
        Ok(())
    })
    .await?;

    // Data stops flowing once the provider is suspended.
    let (status, _) = scenario
        .post(
            format!("{}/dataflows/{provider_id}/suspend", scenario.provider),
            json!({ "reason": "enough" }),
        )
        .await?;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(
        scenario.state(&scenario.provider, &provider_id).await?,
        "SUSPENDED"
    );
    let files = count_files(&folder)?;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(count_files(&folder)?, files);
    Ok(())
}

#[async_std::test]
async fn test_unsupported_transfer_type() -> Result<(), Error> {
    let scenario = Scenario::start().await?;
    let (consumer_id, _) = process_ids();

    let (status, body) = scenario.prepare(&consumer_id, "HttpData-PULL").await?;
    assert_eq!(status, StatusCode::InternalServerError);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("unsupported transfer type HttpData-PULL"));
    Ok(())
}
