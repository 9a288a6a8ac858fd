//! The data plane handle and its lifecycle operations.

use crate::{
    address::DataAddress,
    client::ControlPlaneClient,
    error::Error,
    flow::DataFlow,
    hook::Hook,
    message::{
        DataFlowPrepareMessage, DataFlowResponseMessage, DataFlowStartMessage,
        DataFlowStartedNotificationMessage, DataFlowStatusResponseMessage,
        DataFlowSuspendMessage, DataFlowTerminateMessage, DataPlaneRegistrationMessage,
    },
    store::{DataFlowStore, InMemoryDataFlowStore},
};
use async_std::sync::Arc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;
use strum::{AsRefStr, Display as StrumDisplay, IntoStaticStr};
use uuid::Uuid;

/// Callbacks sent to the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
enum Action {
    Prepared,
    Started,
    Completed,
    Errored,
}

/// The steps at which application hooks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
enum Step {
    OnPrepare,
    OnStart,
    OnStarted,
    OnCompleted,
    OnSuspend,
    OnTerminate,
}

impl Step {
    fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Clone, Default)]
struct Hooks {
    on_prepare: Option<Arc<dyn Hook>>,
    on_start: Option<Arc<dyn Hook>>,
    on_started: Option<Arc<dyn Hook>>,
    on_completed: Option<Arc<dyn Hook>>,
    on_suspend: Option<Arc<dyn Hook>>,
    on_terminate: Option<Arc<dyn Hook>>,
}

impl Hooks {
    fn get(&self, step: Step) -> Option<&Arc<dyn Hook>> {
        match step {
            Step::OnPrepare => self.on_prepare.as_ref(),
            Step::OnStart => self.on_start.as_ref(),
            Step::OnStarted => self.on_started.as_ref(),
            Step::OnCompleted => self.on_completed.as_ref(),
            Step::OnSuspend => self.on_suspend.as_ref(),
            Step::OnTerminate => self.on_terminate.as_ref(),
        }
    }
}

struct Inner {
    id: String,
    name: Option<String>,
    description: Option<String>,
    endpoint: Option<String>,
    transfer_types: BTreeSet<String>,
    labels: BTreeSet<String>,
    store: Arc<dyn DataFlowStore>,
    client: ControlPlaneClient,
    hooks: Hooks,
}

/// A data plane taking part in the signaling protocol.
///
/// This is a handle: clones refer to the same data plane, so a clone can be moved into a
/// background task that later reports the outcome of a transfer with
/// [`notify_completed`](Self::notify_completed) or [`notify_errored`](Self::notify_errored).
#[derive(Clone)]
pub struct Dataplane {
    inner: Arc<Inner>,
}

impl Debug for Dataplane {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Dataplane")
            .field("id", &self.inner.id)
            .field("transfer_types", &self.inner.transfer_types)
            .finish()
    }
}

impl Dataplane {
    /// Start configuring a new data plane.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The unique identifier of this data plane.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub async fn get_by_id(&self, id: &str) -> Result<DataFlow, Error> {
        self.inner.store.find_by_id(id).await
    }

    pub async fn save(&self, flow: &DataFlow) -> Result<(), Error> {
        self.inner.store.save(flow).await
    }

    pub async fn status(&self, id: &str) -> Result<DataFlowStatusResponseMessage, Error> {
        let flow = self.get_by_id(id).await?;
        Ok(DataFlowStatusResponseMessage {
            dataflow_id: flow.id().into(),
            state: flow.state().to_string(),
        })
    }

    /// Prepare the consumer side of a transfer.
    ///
    /// If the `on_prepare` hook leaves the flow initiating, preparation is considered complete and
    /// the flow becomes prepared. The hook may instead move the flow to
    /// [`Preparing`](crate::State::Preparing) and finish later with
    /// [`notify_prepared`](Self::notify_prepared). For prepared push flows, the response carries
    /// the destination address the provider should push to.
    pub async fn prepare(
        &self,
        msg: DataFlowPrepareMessage,
    ) -> Result<DataFlowResponseMessage, Error> {
        let flow = DataFlow::from(msg);
        tracing::info!(id = flow.id(), transfer_type = flow.transfer_type(), "prepare");

        let mut flow = self.run(Step::OnPrepare, flow).await?;
        if flow.is_initiating() {
            flow.transition_to_prepared();
        }

        let data_address = if flow.is_prepared() && flow.is_push() {
            flow.data_address().cloned()
        } else {
            None
        };
        let res = self.response(&flow, data_address, None);
        self.save(&flow).await?;
        Ok(res)
    }

    /// Start the provider side of a transfer.
    ///
    /// Mirrors [`prepare`](Self::prepare): an initiating flow becomes started once `on_start`
    /// returns. For started pull flows, the response carries the source address the consumer
    /// should pull from.
    pub async fn start(&self, msg: DataFlowStartMessage) -> Result<DataFlowResponseMessage, Error> {
        let flow = DataFlow::from(msg);
        tracing::info!(id = flow.id(), transfer_type = flow.transfer_type(), "start");

        let mut flow = self.run(Step::OnStart, flow).await?;
        if flow.is_initiating() {
            flow.transition_to_started();
        }

        let data_address = if flow.is_started() && flow.is_pull() {
            flow.data_address().cloned()
        } else {
            None
        };
        let res = self.response(&flow, data_address, None);
        self.save(&flow).await?;
        Ok(res)
    }

    pub async fn suspend(&self, id: &str, msg: DataFlowSuspendMessage) -> Result<(), Error> {
        tracing::info!(id, reason = ?msg.reason, "suspend");
        let mut flow = self.get_by_id(id).await?;
        flow.transition_to_suspended(msg.reason);
        let flow = self.run(Step::OnSuspend, flow).await?;
        self.save(&flow).await
    }

    pub async fn terminate(&self, id: &str, msg: DataFlowTerminateMessage) -> Result<(), Error> {
        tracing::info!(id, reason = ?msg.reason, "terminate");
        let mut flow = self.get_by_id(id).await?;
        flow.transition_to_terminated(msg.reason);
        let flow = self.run(Step::OnTerminate, flow).await?;
        self.save(&flow).await
    }

    /// Handle the notification that the provider has started a transfer for this flow.
    pub async fn started(
        &self,
        id: &str,
        msg: DataFlowStartedNotificationMessage,
    ) -> Result<(), Error> {
        tracing::info!(id, "started");
        let mut flow = self.get_by_id(id).await?;
        if let Some(address) = msg.data_address {
            flow.set_data_address(address);
        }
        let mut flow = self.run(Step::OnStarted, flow).await?;
        flow.transition_to_started();
        self.save(&flow).await
    }

    /// Handle the notification that the transfer of this flow has completed.
    pub async fn completed(&self, id: &str) -> Result<(), Error> {
        tracing::info!(id, "completed");
        let flow = self.get_by_id(id).await?;
        let mut flow = self.run(Step::OnCompleted, flow).await?;
        flow.transition_to_completed();
        self.save(&flow).await
    }

    /// Tell the control plane that a flow left preparing has now been prepared.
    ///
    /// `hook` finishes the preparation, typically by setting the destination address. The new
    /// state is only saved once the control plane has acknowledged it.
    pub async fn notify_prepared(&self, id: &str, hook: impl Hook) -> Result<(), Error> {
        let flow = self.get_by_id(id).await?;
        let mut flow = hook.call(flow).await.map_err(|source| Error::Hook {
            hook: Step::OnPrepare.name(),
            source,
        })?;
        flow.transition_to_prepared();
        let msg = self.response(&flow, flow.data_address().cloned(), None);
        self.notify_control_plane(Action::Prepared, flow, &msg).await
    }

    /// Tell the control plane that a flow left starting has now been started.
    pub async fn notify_started(&self, id: &str, hook: impl Hook) -> Result<(), Error> {
        let flow = self.get_by_id(id).await?;
        let mut flow = hook.call(flow).await.map_err(|source| Error::Hook {
            hook: Step::OnStart.name(),
            source,
        })?;
        flow.transition_to_started();
        let msg = self.response(&flow, flow.data_address().cloned(), None);
        self.notify_control_plane(Action::Started, flow, &msg).await
    }

    /// Tell the control plane that the transfer of a flow has completed.
    pub async fn notify_completed(&self, id: &str) -> Result<(), Error> {
        let mut flow = self.get_by_id(id).await?;
        flow.transition_to_completed();
        self.notify_control_plane(Action::Completed, flow, &json!({}))
            .await
    }

    /// Tell the control plane that the transfer of a flow failed.
    ///
    /// The flow is terminated with the error message as reason.
    pub async fn notify_errored(&self, id: &str, error: impl Display) -> Result<(), Error> {
        let mut flow = self.get_by_id(id).await?;
        let reason = error.to_string();
        flow.transition_to_terminated(Some(reason.clone()));
        let msg = self.response(&flow, None, Some(reason));
        self.notify_control_plane(Action::Errored, flow, &msg).await
    }

    /// Announce this data plane to the control plane at `control_plane`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotRegistered`] unless the control plane answers 200.
    pub async fn register_on(&self, control_plane: &str) -> Result<(), Error> {
        let url = format!("{}/dataplanes/register", control_plane.trim_end_matches('/'));
        tracing::info!(%url, id = self.id(), "registering dataplane");

        let reply = self
            .inner
            .client
            .post_json(&url, &self.registration())
            .await?;
        if reply.status == 200 {
            Ok(())
        } else {
            tracing::error!(status = reply.status, body = %reply.body, "registration refused");
            Err(Error::NotRegistered {
                status: reply.status,
                body: reply.body,
            })
        }
    }

    /// The message announcing this data plane to a control plane.
    pub fn registration(&self) -> DataPlaneRegistrationMessage {
        DataPlaneRegistrationMessage {
            dataplane_id: self.inner.id.clone(),
            name: self.inner.name.clone(),
            description: self.inner.description.clone(),
            endpoint: self.inner.endpoint.clone(),
            transfer_types: self.inner.transfer_types.clone(),
            labels: self.inner.labels.clone(),
        }
    }

    async fn run(&self, step: Step, flow: DataFlow) -> Result<DataFlow, Error> {
        let hook = self.inner.hooks.get(step).ok_or(Error::NotImplemented {
            hook: step.name(),
        })?;
        hook.call(flow).await.map_err(|source| {
            tracing::warn!("{step} hook failed: {source:#}");
            Error::Hook {
                hook: step.name(),
                source,
            }
        })
    }

    async fn notify_control_plane(
        &self,
        action: Action,
        flow: DataFlow,
        body: &impl Serialize,
    ) -> Result<(), Error> {
        let url = flow.callback_endpoint_for(action);
        tracing::info!(id = flow.id(), %action, %url, "notifying control plane");

        let reply = self.inner.client.post_json(&url, body).await?;
        if reply.is_success() {
            self.save(&flow).await
        } else {
            tracing::error!(id = flow.id(), %action, status = reply.status, "notification refused");
            Err(Error::ControlPlaneRejected {
                action: action.to_string(),
                status: reply.status,
            })
        }
    }

    fn response(
        &self,
        flow: &DataFlow,
        data_address: Option<DataAddress>,
        error: Option<String>,
    ) -> DataFlowResponseMessage {
        DataFlowResponseMessage {
            dataplane_id: self.inner.id.clone(),
            data_address,
            state: flow.state().to_string(),
            error,
        }
    }
}

/// Configuration of a [`Dataplane`].
#[derive(Default)]
pub struct Builder {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    endpoint: Option<String>,
    transfer_types: BTreeSet<String>,
    labels: BTreeSet<String>,
    store: Option<Arc<dyn DataFlowStore>>,
    timeout: Option<Duration>,
    hooks: Hooks,
}

impl Builder {
    /// Finish configuration.
    ///
    /// A data plane without an explicit ID gets a random one. Flows are kept in an
    /// [`InMemoryDataFlowStore`] unless another [`store`](Self::store) was given.
    pub fn build(self) -> Dataplane {
        let store: Arc<dyn DataFlowStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryDataFlowStore::new()),
        };
        Dataplane {
            inner: Arc::new(Inner {
                id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                name: self.name,
                description: self.description,
                endpoint: self.endpoint,
                transfer_types: self.transfer_types,
                labels: self.labels,
                store,
                client: ControlPlaneClient::new(self.timeout),
                hooks: self.hooks,
            }),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The public URL of this data plane's signaling API.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a supported transfer type, like `HttpData-PUSH`.
    pub fn transfer_type(mut self, transfer_type: impl Into<String>) -> Self {
        self.transfer_types.insert(transfer_type.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn store(mut self, store: impl DataFlowStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Give up on control-plane requests after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_prepare(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_prepare = Some(Arc::new(hook));
        self
    }

    pub fn on_start(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_started(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_started = Some(Arc::new(hook));
        self
    }

    pub fn on_completed(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_completed = Some(Arc::new(hook));
        self
    }

    pub fn on_suspend(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_suspend = Some(Arc::new(hook));
        self
    }

    pub fn on_terminate(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.on_terminate = Some(Arc::new(hook));
        self
    }
}
