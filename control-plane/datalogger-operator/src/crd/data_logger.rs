use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
    PartialEq, Eq,
)]
#[kube(
    group = "app.datalogger.io",
    version = "v1",
    kind = "DataLogger",
    plural = "dataloggers",
    namespaced,
    status = "DataLoggerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataLoggerSpec {
    /// Name of the managed Deployment and Service
    pub custom_name: String,
    #[serde(default)]
    pub replicas: i32,
    /// Service port
    #[serde(default)]
    pub port: i32,
    /// Node port; 0 lets the cluster allocate one
    #[serde(default)]
    pub node_port: i32,
    /// Container port targeted by the Service; 0 means "same as port"
    #[serde(default)]
    pub target_port: i32,
}

/// Intentionally empty: the operator reports through logs only.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct DataLoggerStatus {}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("customName {0:?} is not a valid DNS-1123 label")]
    InvalidName(String),
    #[error("replicas must not be negative, got {0}")]
    NegativeReplicas(i32),
    #[error("{field} {value} is outside 1..=65535")]
    PortOutOfRange { field: &'static str, value: i32 },
}

impl DataLoggerSpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if !is_dns1123_label(&self.custom_name) {
            return Err(SpecError::InvalidName(self.custom_name.clone()));
        }
        if self.replicas < 0 {
            return Err(SpecError::NegativeReplicas(self.replicas));
        }
        check_port("port", self.port, false)?;
        check_port("targetPort", self.target_port, true)?;
        check_port("nodePort", self.node_port, true)?;
        Ok(())
    }
}

fn check_port(
    field: &'static str,
    value: i32,
    optional: bool,
) -> Result<(), SpecError> {
    if optional && value == 0 {
        return Ok(());
    }
    if (1..=65535).contains(&value) {
        Ok(())
    } else {
        Err(SpecError::PortOutOfRange { field, value })
    }
}

pub(crate) fn is_dns1123_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    let valid_char = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.first().is_some_and(valid_char)
        && bytes.last().is_some_and(valid_char)
        && bytes.iter().all(|b| valid_char(b) || *b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DataLoggerSpec {
        DataLoggerSpec {
            custom_name: "app1".into(),
            replicas: 2,
            port: 8080,
            node_port: 30080,
            target_port: 80,
        }
    }

    #[test]
    fn spec_uses_camel_case_on_the_wire() {
        let v = serde_json::to_value(spec()).unwrap();
        assert_eq!(v["customName"], "app1");
        assert_eq!(v["nodePort"], 30080);
        assert_eq!(v["targetPort"], 80);
    }

    #[test]
    fn omitted_numbers_default_to_zero() {
        let s: DataLoggerSpec =
            serde_json::from_value(serde_json::json!({"customName": "x"}))
                .unwrap();
        assert_eq!(s.replicas, 0);
        assert_eq!(s.node_port, 0);
        assert_eq!(s.validate(), Err(SpecError::PortOutOfRange {
            field: "port",
            value: 0
        }));
    }

    #[test]
    fn validate_accepts_valid_spec_and_unset_optional_ports() {
        assert_eq!(spec().validate(), Ok(()));
        let s = DataLoggerSpec {
            node_port: 0,
            target_port: 0,
            ..spec()
        };
        assert_eq!(s.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_bad_names_and_counts() {
        for bad in ["", "App", "-a", "a-", "a_b", &"a".repeat(64)] {
            let s = DataLoggerSpec {
                custom_name: bad.to_string(),
                ..spec()
            };
            assert!(
                matches!(s.validate(), Err(SpecError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
        let s = DataLoggerSpec {
            replicas: -1,
            ..spec()
        };
        assert_eq!(s.validate(), Err(SpecError::NegativeReplicas(-1)));
        let s = DataLoggerSpec {
            node_port: 70000,
            ..spec()
        };
        assert!(matches!(
            s.validate(),
            Err(SpecError::PortOutOfRange { field: "nodePort", .. })
        ));
    }
}
