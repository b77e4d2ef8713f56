use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::BearerCredential;

const FALLBACK_ACCOUNT_ID: &str = "azure-devops-user";

/// A validated (credential, organization, principal) triple. Values are
/// immutable; switching organization produces a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    credential: BearerCredential,
    organization_id: String,
    principal_id: Option<String>,
}

impl Session {
    pub(crate) fn validated(
        credential: BearerCredential,
        organization_id: impl Into<String>,
        principal_id: impl Into<String>,
    ) -> Self {
        Self {
            credential,
            organization_id: organization_id.into(),
            principal_id: Some(principal_id.into()),
        }
    }

    /// Rebuilds a session from a stored record. Returns `None` when the record
    /// lacks a credential or organization.
    pub fn from_record(record: PersistedSessionRecord) -> Option<Self> {
        let credential = BearerCredential::new(record.access_token)?;
        let organization_id = record.organization.trim();
        if organization_id.is_empty() {
            return None;
        }
        Some(Self {
            credential,
            organization_id: organization_id.to_string(),
            principal_id: record
                .user_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        })
    }

    /// Decodes a raw secret value. Malformed input is logged and treated as
    /// "no session".
    pub fn from_persisted(raw: &str) -> Option<Self> {
        let record = match PersistedSessionRecord::decode(raw) {
            Ok(record) => record,
            Err(error) => {
                warn!(%error, "ignoring malformed persisted session record");
                return None;
            }
        };
        let session = Self::from_record(record);
        if session.is_none() {
            warn!("ignoring persisted session record without credential or organization");
        }
        session
    }

    pub fn credential(&self) -> &BearerCredential {
        &self.credential
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.principal_id.as_deref()
    }

    pub fn account_id(&self) -> &str {
        self.principal_id().unwrap_or(FALLBACK_ACCOUNT_ID)
    }

    pub fn account_label(&self) -> String {
        format!("Azure DevOps ({})", self.organization_id)
    }

    pub fn to_record(&self) -> PersistedSessionRecord {
        PersistedSessionRecord {
            access_token: self.credential.expose().to_string(),
            organization: self.organization_id.clone(),
            user_id: self.principal_id.clone(),
        }
    }
}

/// On-disk shape of a session, stored as a JSON string under one secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionRecord {
    pub access_token: String,
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PersistedSessionRecord {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::{PersistedSessionRecord, Session};
    use crate::BearerCredential;

    fn sample_session() -> Session {
        Session::validated(
            BearerCredential::new("token-a").expect("credential"),
            "contoso",
            "principal-1",
        )
    }

    #[test]
    fn unit_record_uses_camel_case_wire_names() {
        let encoded = sample_session().to_record().encode().expect("encode");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(value["accessToken"], "token-a");
        assert_eq!(value["organization"], "contoso");
        assert_eq!(value["userId"], "principal-1");
    }

    #[test]
    fn functional_persisted_session_round_trips_through_secret_value() {
        let session = sample_session();
        let encoded = session.to_record().encode().expect("encode");
        assert_eq!(Session::from_persisted(&encoded), Some(session));
    }

    #[test]
    fn unit_record_without_user_id_decodes_with_fallback_account() {
        let session =
            Session::from_persisted(r#"{"accessToken":"token-b","organization":"fabrikam"}"#)
                .expect("session");
        assert_eq!(session.principal_id(), None);
        assert_eq!(session.account_id(), "azure-devops-user");
        assert_eq!(session.account_label(), "Azure DevOps (fabrikam)");
    }

    #[test]
    fn regression_malformed_or_incomplete_records_are_treated_as_absent() {
        assert_eq!(Session::from_persisted("{not json"), None);
        assert_eq!(Session::from_persisted("[]"), None);
        assert_eq!(
            Session::from_persisted(r#"{"accessToken":"","organization":"contoso"}"#),
            None
        );
        assert_eq!(
            Session::from_persisted(r#"{"accessToken":"t","organization":"  "}"#),
            None
        );
    }

    #[test]
    fn unit_record_debug_output_never_contains_the_token_via_session() {
        let rendered = format!("{:?}", sample_session());
        assert!(!rendered.contains("token-a"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn unit_decode_accepts_unknown_fields() {
        let record = PersistedSessionRecord::decode(
            r#"{"accessToken":"t","organization":"o","userId":"u","scopes":["x"]}"#,
        )
        .expect("decode");
        assert_eq!(record.user_id.as_deref(), Some("u"));
    }
}
