//! Messages exchanged with the control plane.
//!
//! All messages are JSON objects with camelCase field names. Unknown fields are ignored when
//! parsing, and everything except the process ID and transfer type of prepare and start requests
//! may be omitted.

use crate::{address::DataAddress, flow::DataFlow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Request from the control plane to prepare the consumer side of a transfer.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowPrepareMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub counter_party_id: String,
    #[serde(default)]
    pub dataspace_context: String,
    pub process_id: String,
    #[serde(default)]
    pub agreement_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub callback_address: String,
    pub transfer_type: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl From<DataFlowPrepareMessage> for DataFlow {
    fn from(msg: DataFlowPrepareMessage) -> Self {
        DataFlow::new(msg.process_id)
            .with_labels(msg.labels)
            .with_metadata(msg.metadata)
            .with_callback_address(msg.callback_address)
            .with_transfer_type(msg.transfer_type)
            .with_dataset_id(msg.dataset_id)
            .with_agreement_id(msg.agreement_id)
            .with_participant_id(msg.participant_id)
            .with_counter_party_id(msg.counter_party_id)
            .with_dataspace_context(msg.dataspace_context)
    }
}

/// Request from the control plane to start the provider side of a transfer.
///
/// For push transfers, `data_address` is the destination prepared by the consumer.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowStartMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub counter_party_id: String,
    #[serde(default)]
    pub dataspace_context: String,
    pub process_id: String,
    #[serde(default)]
    pub agreement_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub callback_address: String,
    pub transfer_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl From<DataFlowStartMessage> for DataFlow {
    fn from(msg: DataFlowStartMessage) -> Self {
        DataFlow::new(msg.process_id)
            .with_data_address(msg.data_address)
            .with_labels(msg.labels)
            .with_metadata(msg.metadata)
            .with_callback_address(msg.callback_address)
            .with_transfer_type(msg.transfer_type)
            .with_dataset_id(msg.dataset_id)
            .with_agreement_id(msg.agreement_id)
            .with_participant_id(msg.participant_id)
            .with_counter_party_id(msg.counter_party_id)
            .with_dataspace_context(msg.dataspace_context)
    }
}

/// Answer to prepare and start requests, also used for prepared/started/errored notifications.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowResponseMessage {
    pub dataplane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowStatusResponseMessage {
    pub dataflow_id: String,
    pub state: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowSuspendMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowTerminateMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Notification, relayed by the control plane, that the provider started a pull transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowStartedNotificationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
}

/// Announcement of a data plane and its capabilities to a control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneRegistrationMessage {
    pub dataplane_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub endpoint: Option<String>,
    pub transfer_types: BTreeSet<String>,
    pub labels: BTreeSet<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flow::State;
    use serde_json::json;

    #[test]
    fn test_prepare_message_to_flow() {
        let msg: DataFlowPrepareMessage = serde_json::from_value(json!({
            "messageId": "message",
            "participantId": "participant",
            "counterPartyId": "counterparty",
            "dataspaceContext": "context",
            "processId": "process",
            "agreementId": "agreement",
            "datasetId": "dataset",
            "callbackAddress": "http://cp",
            "transferType": "HttpData-PUSH",
            "labels": ["a", "b"],
            "metadata": { "key": 1 },
            "unknown": true
        }))
        .unwrap();

        let flow = DataFlow::from(msg);
        assert_eq!(flow.id(), "process");
        assert_eq!(flow.state(), State::Initiating);
        assert_eq!(flow.participant_id(), "participant");
        assert_eq!(flow.counter_party_id(), "counterparty");
        assert_eq!(flow.dataspace_context(), "context");
        assert_eq!(flow.agreement_id(), "agreement");
        assert_eq!(flow.dataset_id(), "dataset");
        assert_eq!(flow.callback_address(), "http://cp");
        assert_eq!(flow.labels(), ["a", "b"]);
        assert_eq!(flow.metadata()["key"], json!(1));
        assert!(flow.is_push());
        assert_eq!(flow.data_address(), None);
    }

    #[test]
    fn test_start_message_requires_process_id() {
        let res = serde_json::from_value::<DataFlowStartMessage>(json!({
            "transferType": "HttpData-PULL"
        }));
        assert!(res.is_err());

        let msg: DataFlowStartMessage = serde_json::from_value(json!({
            "processId": "process",
            "transferType": "HttpData-PULL",
            "dataAddress": { "endpointType": "https", "endpoint": "https://source" }
        }))
        .unwrap();
        let flow = DataFlow::from(msg);
        assert_eq!(flow.data_address().unwrap().endpoint, "https://source");
    }

    #[test]
    fn test_response_omits_missing_address() {
        let res = DataFlowResponseMessage {
            dataplane_id: "dataplane".into(),
            data_address: None,
            state: State::Started.to_string(),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({ "dataplaneId": "dataplane", "state": "STARTED" })
        );
    }
}
