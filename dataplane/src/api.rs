//! The signaling API: HTTP endpoints through which the control plane drives a data plane.
//!
//! | method | path                       | operation                        |
//! |--------|----------------------------|----------------------------------|
//! | POST   | `/dataflows/prepare`       | [`Dataplane::prepare`]           |
//! | POST   | `/dataflows/start`         | [`Dataplane::start`]             |
//! | POST   | `/dataflows/:id/started`   | [`Dataplane::started`]           |
//! | POST   | `/dataflows/:id/completed` | [`Dataplane::completed`]         |
//! | POST   | `/dataflows/:id/suspend`   | [`Dataplane::suspend`]           |
//! | POST   | `/dataflows/:id/terminate` | [`Dataplane::terminate`]         |
//! | GET    | `/dataflows/:id/status`    | [`Dataplane::status`]            |
//!
//! Failures are answered with a JSON body `{"error": "..."}`.

use crate::{
    error::Error,
    flow::State,
    message::{
        DataFlowPrepareMessage, DataFlowStartMessage, DataFlowStartedNotificationMessage,
        DataFlowSuspendMessage, DataFlowTerminateMessage,
    },
    sdk::Dataplane,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tide::{
    utils::{After, Before},
    Body, Request, Response, StatusCode,
};

impl Dataplane {
    /// The signaling API of this data plane.
    ///
    /// The returned server can listen on its own or be nested under a prefix in a larger
    /// application.
    pub fn controller(&self) -> tide::Server<Dataplane> {
        let mut app = tide::with_state(self.clone());
        app.with(Before(|req: Request<Dataplane>| async move {
            tracing::debug!(method = %req.method(), path = req.url().path(), "signaling request");
            req
        }));
        app.with(After(render_error));

        app.at("/dataflows/prepare").post(prepare);
        app.at("/dataflows/start").post(start);
        app.at("/dataflows/:id/started").post(started);
        app.at("/dataflows/:id/completed").post(completed);
        app.at("/dataflows/:id/suspend").post(suspend);
        app.at("/dataflows/:id/terminate").post(terminate);
        app.at("/dataflows/:id/status").get(status);
        app
    }
}

async fn prepare(mut req: Request<Dataplane>) -> tide::Result {
    let msg: DataFlowPrepareMessage = parse(&mut req).await?;
    let res = req.state().prepare(msg).await?;
    let status = if res.state == State::Preparing.to_string() {
        StatusCode::Accepted
    } else {
        StatusCode::Ok
    };
    reply(status, &res)
}

async fn start(mut req: Request<Dataplane>) -> tide::Result {
    let msg: DataFlowStartMessage = parse(&mut req).await?;
    let res = req.state().start(msg).await?;
    let status = if res.state == State::Starting.to_string() {
        StatusCode::Accepted
    } else {
        StatusCode::Ok
    };
    reply(status, &res)
}

async fn started(mut req: Request<Dataplane>) -> tide::Result {
    let id = req.param("id")?.to_string();
    let msg: DataFlowStartedNotificationMessage = parse(&mut req).await?;
    req.state().started(&id, msg).await?;
    Ok(Response::new(StatusCode::Ok))
}

async fn completed(req: Request<Dataplane>) -> tide::Result {
    let id = req.param("id")?;
    req.state().completed(id).await?;
    Ok(Response::new(StatusCode::Ok))
}

async fn suspend(mut req: Request<Dataplane>) -> tide::Result {
    let id = req.param("id")?.to_string();
    let msg: DataFlowSuspendMessage = parse(&mut req).await?;
    req.state().suspend(&id, msg).await?;
    Ok(Response::new(StatusCode::Ok))
}

async fn terminate(mut req: Request<Dataplane>) -> tide::Result {
    let id = req.param("id")?.to_string();
    let msg: DataFlowTerminateMessage = parse(&mut req).await?;
    req.state().terminate(&id, msg).await?;
    Ok(Response::new(StatusCode::Ok))
}

async fn status(req: Request<Dataplane>) -> tide::Result {
    let id = req.param("id")?;
    let res = req.state().status(id).await?;
    reply(StatusCode::Ok, &res)
}

/// Parse a JSON request body, treating an empty body as an empty object.
async fn parse<T: DeserializeOwned>(req: &mut Request<Dataplane>) -> tide::Result<T> {
    let body = req.body_string().await?;
    let body = if body.trim().is_empty() { "{}" } else { &body };
    serde_json::from_str(body)
        .map_err(|err| tide::Error::from_str(StatusCode::BadRequest, format!("invalid body: {err}")))
}

fn reply(status: StatusCode, body: &impl Serialize) -> tide::Result {
    Ok(Response::builder(status)
        .body(Body::from_json(body)?)
        .build())
}

async fn render_error(mut res: Response) -> tide::Result {
    if let Some(err) = res.error() {
        let status = err
            .downcast_ref::<Error>()
            .map(Error::status)
            .unwrap_or_else(|| err.status());
        let message = err.to_string();
        if status.is_server_error() {
            tracing::error!(%status, "signaling request failed: {message}");
        } else {
            tracing::info!(%status, "signaling request rejected: {message}");
        }
        res.set_status(status);
        res.set_body(json!({ "error": message }));
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{address::DataAddress, flow::DataFlow, hook::accept, testing::wait_for_server};
    use async_std::task::spawn;
    use portpicker::pick_unused_port;
    use serde_json::Value;
    use surf::Client;

    /// Serve `dataplane` under `/dataplane` on a free port and connect a client to it.
    async fn serve(dataplane: Dataplane) -> Client {
        crate::init_logging();

        let port = pick_unused_port().unwrap();
        let mut app = tide::new();
        app.at("/dataplane").nest(dataplane.controller());
        spawn(app.listen(format!("127.0.0.1:{port}")));
        wait_for_server(port).await.unwrap();

        surf::Config::default()
            .set_base_url(format!("http://127.0.0.1:{port}/dataplane/").parse().unwrap())
            .try_into()
            .unwrap()
    }

    async fn post(client: &Client, path: &str, body: Value) -> (StatusCode, Value) {
        let mut res = client
            .post(path)
            .body_json(&body)
            .unwrap()
            .send()
            .await
            .unwrap();
        let body = res.body_json().await.unwrap_or(Value::Null);
        (res.status(), body)
    }

    async fn get(client: &Client, path: &str) -> (StatusCode, Value) {
        let mut res = client.get(path).send().await.unwrap();
        let body = res.body_json().await.unwrap_or(Value::Null);
        (res.status(), body)
    }

    fn prepare_body(id: &str, transfer_type: &str) -> Value {
        json!({
            "messageId": "message",
            "processId": id,
            "callbackAddress": "http://localhost/callback",
            "transferType": transfer_type
        })
    }

    #[async_std::test]
    async fn test_prepare_and_status() {
        let dataplane = Dataplane::builder()
            .id("consumer")
            .on_prepare(|mut flow: DataFlow| -> anyhow::Result<DataFlow> {
                flow.set_data_address(DataAddress::new("file", "/tmp/destination", vec![]));
                Ok(flow)
            })
            .build();
        let client = serve(dataplane).await;

        let (status, body) = post(
            &client,
            "dataflows/prepare",
            prepare_body("flow", "FileSystem-PUSH"),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["dataplaneId"], "consumer");
        assert_eq!(body["state"], "PREPARED");
        assert_eq!(body["dataAddress"]["endpoint"], "/tmp/destination");

        let (status, body) = get(&client, "dataflows/flow/status").await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body, json!({ "dataflowId": "flow", "state": "PREPARED" }));
    }

    #[async_std::test]
    async fn test_async_prepare_is_accepted() {
        let dataplane = Dataplane::builder()
            .on_prepare(|mut flow: DataFlow| -> anyhow::Result<DataFlow> {
                flow.transition_to_preparing();
                Ok(flow)
            })
            .build();
        let client = serve(dataplane).await;

        let (status, body) = post(
            &client,
            "dataflows/prepare",
            prepare_body("flow", "FileSystemAsync-PUSH"),
        )
        .await;
        assert_eq!(status, StatusCode::Accepted);
        assert_eq!(body["state"], "PREPARING");
        assert!(body.get("dataAddress").is_none());
    }

    #[async_std::test]
    async fn test_start_suspend_terminate() {
        let dataplane = Dataplane::builder()
            .on_start(accept)
            .on_suspend(accept)
            .on_terminate(accept)
            .build();
        let client = serve(dataplane.clone()).await;

        let (status, body) = post(
            &client,
            "dataflows/start",
            json!({
                "processId": "flow",
                "transferType": "FileSystem-PUSH",
                "dataAddress": { "endpointType": "file", "endpoint": "/tmp/destination" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["state"], "STARTED");
        assert!(body.get("dataAddress").is_none());

        let (status, _) = post(&client, "dataflows/flow/suspend", json!({ "reason": "pause" })).await;
        assert_eq!(status, StatusCode::Ok);
        let flow = dataplane.get_by_id("flow").await.unwrap();
        assert_eq!(flow.suspension_reason(), Some("pause"));

        let (status, _) = post(&client, "dataflows/flow/terminate", json!({})).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(get(&client, "dataflows/flow/status").await.1["state"], "TERMINATED");
    }

    #[async_std::test]
    async fn test_started_and_completed_notifications() {
        let dataplane = Dataplane::builder()
            .on_prepare(accept)
            .on_started(accept)
            .on_completed(accept)
            .build();
        let client = serve(dataplane.clone()).await;

        post(&client, "dataflows/prepare", prepare_body("flow", "Http-PULL")).await;
        let (status, _) = post(
            &client,
            "dataflows/flow/started",
            json!({ "dataAddress": { "endpointType": "https", "endpoint": "https://source" } }),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
        let flow = dataplane.get_by_id("flow").await.unwrap();
        assert_eq!(flow.data_address().unwrap().endpoint, "https://source");

        let mut res = client.post("dataflows/flow/completed").send().await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        res.body_string().await.unwrap();
        assert_eq!(get(&client, "dataflows/flow/status").await.1["state"], "COMPLETED");
    }

    #[async_std::test]
    async fn test_errors() {
        let dataplane = Dataplane::builder().build();
        let client = serve(dataplane).await;

        let (status, body) = get(&client, "dataflows/missing/status").await;
        assert_eq!(status, StatusCode::NotFound);
        assert_eq!(body["error"], "DataFlow missing not found");

        let (status, body) = post(&client, "dataflows/prepare", json!({ "messageId": "m" })).await;
        assert_eq!(status, StatusCode::BadRequest);
        assert!(body["error"].as_str().unwrap().starts_with("invalid body"));

        let (status, body) = post(
            &client,
            "dataflows/prepare",
            prepare_body("flow", "FileSystem-PUSH"),
        )
        .await;
        assert_eq!(status, StatusCode::NotImplemented);
        assert_eq!(body["error"], "on_prepare is not implemented");

        let (status, _) = post(&client, "dataflows/missing/terminate", json!({})).await;
        assert_eq!(status, StatusCode::NotFound);
    }
}
