//! Addresses at which the data of a flow can be sent or fetched.

use serde::{Deserialize, Serialize};

/// Where and how to reach the data of a flow.
///
/// For push transfers the consumer prepares a destination address; for pull transfers the
/// provider exposes a source address.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAddress {
    #[serde(rename = "@type", default = "DataAddress::default_type")]
    pub type_: String,
    #[serde(default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub endpoint_properties: Vec<EndpointProperty>,
}

impl DataAddress {
    pub fn new(
        endpoint_type: impl Into<String>,
        endpoint: impl Into<String>,
        endpoint_properties: Vec<EndpointProperty>,
    ) -> Self {
        Self {
            type_: Self::default_type(),
            endpoint_type: endpoint_type.into(),
            endpoint: endpoint.into(),
            endpoint_properties,
        }
    }

    /// Look up the value of the endpoint property called `name`.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.endpoint_properties
            .iter()
            .find(|prop| prop.name == name)
            .map(|prop| prop.value.as_str())
    }

    fn default_type() -> String {
        "DataAddress".into()
    }
}

/// An extra named parameter needed to use an endpoint, like an authorization token.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointProperty {
    #[serde(rename = "type", default)]
    pub type_: String,
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        let address = DataAddress::new(
            "https",
            "https://example.com/data",
            vec![EndpointProperty {
                type_: "header".into(),
                name: "authorization".into(),
                value: "token".into(),
            }],
        );
        assert_eq!(
            serde_json::to_value(&address).unwrap(),
            json!({
                "@type": "DataAddress",
                "endpointType": "https",
                "endpoint": "https://example.com/data",
                "endpointProperties": [
                    { "type": "header", "name": "authorization", "value": "token" }
                ]
            })
        );
        assert_eq!(address.property("authorization"), Some("token"));
        assert_eq!(address.property("missing"), None);
    }

    #[test]
    fn test_lenient_parse() {
        let address: DataAddress = serde_json::from_value(json!({
            "endpointType": "file",
            "endpoint": "/tmp/content",
            "somethingElse": 42
        }))
        .unwrap();
        assert_eq!(address, DataAddress::new("file", "/tmp/content", vec![]));
    }
}
