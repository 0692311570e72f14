//! The trigger platform the engine fires against.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::trigger::TriggerDoc;

/// Address and credential of one platform trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTarget {
    pub apikey: String,
    pub namespace: String,
    pub name: String,
}

impl TriggerTarget {
    pub fn new(apikey: &str, namespace: &str, name: &str) -> Self {
        Self {
            apikey: apikey.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn from_doc(doc: &TriggerDoc) -> Self {
        Self::new(&doc.apikey, &doc.namespace, &doc.name)
    }

    /// Split `uuid:key` into basic-auth user and password.
    pub fn credentials(&self) -> (&str, &str) {
        split_credential(&self.apikey)
    }

    /// Namespace and name are each encoded as one path segment.
    pub fn path(&self) -> String {
        format!(
            "/api/v1/namespaces/{}/triggers/{}",
            urlencoding::encode(&self.namespace),
            urlencoding::encode(&self.name)
        )
    }
}

pub fn split_credential(apikey: &str) -> (&str, &str) {
    apikey.split_once(':').unwrap_or((apikey, ""))
}

/// What the platform reports about a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformTrigger {
    /// Fully qualified names (`namespace/name`) of rules bound to the trigger.
    pub rules: Vec<String>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// POST the payload to the trigger. Any 2xx is success; failures come
    /// back as `AlarmError::Http` with the status when one was received.
    async fn fire_trigger(&self, target: &TriggerTarget, payload: &Value) -> Result<()>;

    async fn get_trigger(&self, target: &TriggerTarget) -> Result<PlatformTrigger>;

    async fn create_trigger(&self, target: &TriggerTarget) -> Result<()>;

    async fn delete_trigger(&self, target: &TriggerTarget) -> Result<()>;

    /// Delete rule `namespace/name` using the given credential.
    async fn delete_rule(&self, apikey: &str, rule: &str) -> Result<()>;
}
