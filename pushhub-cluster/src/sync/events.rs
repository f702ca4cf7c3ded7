use pushhub_core::models::{Module, Operation, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::addressing::Target;
use crate::error::{Error, Result};

/// Identity of one running hub instance, stamped on every replication record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh random id. Called once per process.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Announces a new connection on the origin instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "CONNECTED")]
pub struct ConnectedRecord {
    pub instance: InstanceId,
    pub module: Module,
    pub operation: Operation,
}

/// A local delivery, re-published so sibling instances reach their own connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub instance: InstanceId,
    pub module: Module,
    pub operation: Operation,
    #[serde(rename = "payload-type")]
    pub payload_type: String,
    pub message: String,
    #[serde(flatten)]
    pub target: Target,
}

/// Record carried on a module destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRecord {
    Connected(ConnectedRecord),
    Delivery(DeliveryRecord),
}

/// Fields read before the full record, to drop echoes and pick the decoder
#[derive(Debug, Deserialize)]
struct RecordHeader {
    instance: InstanceId,
    kind: String,
}

impl ReplicationRecord {
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        match self {
            Self::Connected(record) => record.instance,
            Self::Delivery(record) => record.instance,
        }
    }

    #[must_use]
    pub const fn module(&self) -> Module {
        match self {
            Self::Connected(record) => record.module,
            Self::Delivery(record) => record.module,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "CONNECTED",
            Self::Delivery(record) => record.target.kind(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = match self {
            Self::Connected(record) => serde_json::to_string(record)?,
            Self::Delivery(record) => serde_json::to_string(record)?,
        };
        Ok(json)
    }

    /// Decode a record received from the broker.
    ///
    /// Returns `Ok(None)` for records stamped with `local`; those are never decoded further.
    pub fn decode(raw: &str, local: InstanceId) -> Result<Option<Self>> {
        let header: RecordHeader = serde_json::from_str(raw)?;
        if header.instance == local {
            return Ok(None);
        }

        if header.kind == "CONNECTED" {
            return Ok(Some(Self::Connected(serde_json::from_str(raw)?)));
        }
        if !Target::is_delivery_kind(&header.kind) {
            return Err(Error::UnknownRecord(header.kind));
        }
        Ok(Some(Self::Delivery(serde_json::from_str(raw)?)))
    }
}

/// Carried on the session destination when a client session ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub connected: bool,
}

impl SessionRecord {
    #[must_use]
    pub const fn closed(session_id: SessionId) -> Self {
        Self {
            session_id,
            connected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushhub_core::models::{TeamId, UnitId, UserId};
    use serde_json::json;

    fn delivery(instance: InstanceId, target: Target) -> ReplicationRecord {
        ReplicationRecord::Delivery(DeliveryRecord {
            instance,
            module: Module::Team,
            operation: Operation::update(),
            payload_type: "Ping".to_string(),
            message: r#"{"n":1}"#.to_string(),
            target,
        })
    }

    #[test]
    fn test_instance_ids_compare_by_value() {
        let id = InstanceId::generate();
        let copy: InstanceId = serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();

        assert_eq!(id, copy);
        assert_ne!(id, InstanceId::generate());
    }

    #[test]
    fn test_delivery_wire_shape() {
        let instance = InstanceId::generate();
        let record = delivery(
            instance,
            Target::TeamUsers {
                team_id: TeamId(7),
                user_ids: vec![UserId(3), UserId(4)],
            },
        );

        let value: serde_json::Value = serde_json::from_str(&record.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "TEAM_USERS",
                "instance": instance.to_string(),
                "module": "TEAM",
                "operation": "UPDATE",
                "payload-type": "Ping",
                "message": "{\"n\":1}",
                "teamId": 7,
                "usersId": [3, 4],
            })
        );
    }

    #[test]
    fn test_connected_wire_shape() {
        let instance = InstanceId::generate();
        let record = ReplicationRecord::Connected(ConnectedRecord {
            instance,
            module: Module::Chat,
            operation: Operation::connected(),
        });

        let value: serde_json::Value = serde_json::from_str(&record.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "CONNECTED",
                "instance": instance.to_string(),
                "module": "CHAT",
                "operation": "CONNECTED",
            })
        );
    }

    #[test]
    fn test_decode_from_other_instance() {
        let remote = InstanceId::generate();
        let record = delivery(remote, Target::Units {
            unit_ids: vec![UnitId(1), UnitId(2)],
        });

        let decoded = ReplicationRecord::decode(&record.encode().unwrap(), InstanceId::generate())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_drops_own_records() {
        let local = InstanceId::generate();
        let record = delivery(local, Target::Team { team_id: TeamId(7) });

        let decoded = ReplicationRecord::decode(&record.encode().unwrap(), local).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let raw = json!({
            "kind": "BROADCAST",
            "instance": InstanceId::generate().to_string(),
            "module": "TEAM",
            "operation": "UPDATE",
        })
        .to_string();

        let err = ReplicationRecord::decode(&raw, InstanceId::generate()).unwrap_err();
        assert!(matches!(err, Error::UnknownRecord(kind) if kind == "BROADCAST"));
    }

    #[test]
    fn test_decode_rejects_malformed_record() {
        let local = InstanceId::generate();
        assert!(ReplicationRecord::decode("not json", local).is_err());

        // Valid header, missing shape fields
        let raw = json!({
            "kind": "TEAM",
            "instance": InstanceId::generate().to_string(),
            "module": "TEAM",
            "operation": "UPDATE",
            "payload-type": "Ping",
            "message": "{}",
        })
        .to_string();
        assert!(ReplicationRecord::decode(&raw, local).is_err());
    }

    #[test]
    fn test_session_record_wire_shape() {
        let record = SessionRecord::closed(SessionId(99));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"sessionId": 99, "connected": false})
        );
    }
}
