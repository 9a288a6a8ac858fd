//! Data flows and their lifecycle.

use crate::address::DataAddress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString};

/// The lifecycle state of a [`DataFlow`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Initiating,
    Preparing,
    Prepared,
    Starting,
    Started,
    Suspended,
    Completed,
    Terminated,
}

/// A single transfer process, as seen by this data plane.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    id: String,
    #[serde(default)]
    state: State,
    #[serde(default)]
    transfer_type: String,
    #[serde(default)]
    dataset_id: String,
    #[serde(default)]
    agreement_id: String,
    #[serde(default)]
    participant_id: String,
    #[serde(default)]
    counter_party_id: String,
    #[serde(default)]
    dataspace_context: String,
    #[serde(default)]
    callback_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suspension_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    termination_reason: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_address: Option<DataAddress>,
}

impl DataFlow {
    /// A new flow in the [`Initiating`](State::Initiating) state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: State::Initiating,
            transfer_type: String::new(),
            dataset_id: String::new(),
            agreement_id: String::new(),
            participant_id: String::new(),
            counter_party_id: String::new(),
            dataspace_context: String::new(),
            callback_address: String::new(),
            suspension_reason: None,
            termination_reason: None,
            labels: vec![],
            metadata: Map::new(),
            data_address: None,
        }
    }

    pub fn with_transfer_type(mut self, transfer_type: impl Into<String>) -> Self {
        self.transfer_type = transfer_type.into();
        self
    }

    pub fn with_dataset_id(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = dataset_id.into();
        self
    }

    pub fn with_agreement_id(mut self, agreement_id: impl Into<String>) -> Self {
        self.agreement_id = agreement_id.into();
        self
    }

    pub fn with_participant_id(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = participant_id.into();
        self
    }

    pub fn with_counter_party_id(mut self, counter_party_id: impl Into<String>) -> Self {
        self.counter_party_id = counter_party_id.into();
        self
    }

    pub fn with_dataspace_context(mut self, dataspace_context: impl Into<String>) -> Self {
        self.dataspace_context = dataspace_context.into();
        self
    }

    pub fn with_callback_address(mut self, callback_address: impl Into<String>) -> Self {
        self.callback_address = callback_address.into();
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_data_address(mut self, data_address: Option<DataAddress>) -> Self {
        self.data_address = data_address;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transfer_type(&self) -> &str {
        &self.transfer_type
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn agreement_id(&self) -> &str {
        &self.agreement_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn counter_party_id(&self) -> &str {
        &self.counter_party_id
    }

    pub fn dataspace_context(&self) -> &str {
        &self.dataspace_context
    }

    pub fn callback_address(&self) -> &str {
        &self.callback_address
    }

    pub fn suspension_reason(&self) -> Option<&str> {
        self.suspension_reason.as_deref()
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn data_address(&self) -> Option<&DataAddress> {
        self.data_address.as_ref()
    }

    pub fn set_data_address(&mut self, data_address: DataAddress) {
        self.data_address = Some(data_address);
    }

    pub fn transition_to_preparing(&mut self) {
        self.state = State::Preparing;
    }

    pub fn transition_to_prepared(&mut self) {
        self.state = State::Prepared;
    }

    pub fn transition_to_starting(&mut self) {
        self.state = State::Starting;
    }

    pub fn transition_to_started(&mut self) {
        self.state = State::Started;
    }

    pub fn transition_to_suspended(&mut self, reason: Option<String>) {
        self.state = State::Suspended;
        self.suspension_reason = reason;
    }

    pub fn transition_to_completed(&mut self) {
        self.state = State::Completed;
    }

    pub fn transition_to_terminated(&mut self, reason: Option<String>) {
        self.state = State::Terminated;
        self.termination_reason = reason;
    }

    pub fn is_initiating(&self) -> bool {
        self.state == State::Initiating
    }

    pub fn is_prepared(&self) -> bool {
        self.state == State::Prepared
    }

    pub fn is_started(&self) -> bool {
        self.state == State::Started
    }

    /// Is this a push transfer (provider sends to a consumer-prepared address)?
    ///
    /// Transfer types have the form `<kind>-<PUSH|PULL>`.
    pub fn is_push(&self) -> bool {
        self.flow_type()
            .map_or(false, |ty| ty.eq_ignore_ascii_case("PUSH"))
    }

    /// Is this a pull transfer (consumer fetches from a provider-exposed address)?
    pub fn is_pull(&self) -> bool {
        self.flow_type()
            .map_or(false, |ty| ty.eq_ignore_ascii_case("PULL"))
    }

    /// The control-plane endpoint to notify about `action` on this flow.
    pub fn callback_endpoint_for(&self, action: impl AsRef<str>) -> String {
        format!(
            "{}/transfers/{}/dataflow/{}",
            self.callback_address.trim_end_matches('/'),
            self.id,
            action.as_ref()
        )
    }

    fn flow_type(&self) -> Option<&str> {
        self.transfer_type.rsplit_once('-').map(|(_, ty)| ty)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_push_pull() {
        let push = DataFlow::new("id").with_transfer_type("HttpData-PUSH");
        assert!(push.is_push());
        assert!(!push.is_pull());

        let pull = DataFlow::new("id").with_transfer_type("HttpData-pull");
        assert!(pull.is_pull());
        assert!(!pull.is_push());

        let neither = DataFlow::new("id").with_transfer_type("HttpData");
        assert!(!neither.is_push());
        assert!(!neither.is_pull());
    }

    #[test]
    fn test_transitions() {
        let mut flow = DataFlow::new("id");
        assert!(flow.is_initiating());

        flow.transition_to_prepared();
        assert!(flow.is_prepared());
        flow.transition_to_started();
        assert!(flow.is_started());

        flow.transition_to_suspended(Some("maintenance".into()));
        assert_eq!(flow.state(), State::Suspended);
        assert_eq!(flow.suspension_reason(), Some("maintenance"));

        flow.transition_to_terminated(Some("done".into()));
        assert_eq!(flow.state(), State::Terminated);
        assert_eq!(flow.termination_reason(), Some("done"));
    }

    #[test]
    fn test_callback_endpoint() {
        let flow = DataFlow::new("flow-1").with_callback_address("http://cp/callback/");
        assert_eq!(
            flow.callback_endpoint_for("completed"),
            "http://cp/callback/transfers/flow-1/dataflow/completed"
        );
    }

    #[test]
    fn test_state_names() {
        for state in State::iter() {
            let name = state.to_string();
            assert_eq!(name, name.to_uppercase());
            assert_eq!(State::from_str(&name).unwrap(), state);
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(name)
            );
        }
    }
}
