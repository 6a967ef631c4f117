//! Shared context for the controllers.
//!
//! The Context struct holds shared state passed to every reconciler: the
//! Kubernetes client, event recorder identity and optional health state.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};

use crate::client::redis_client::TlsCertData;
use crate::controller::error::Error;
use crate::crd::SecretKeyRef;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "redis-operator";

/// Annotation suspending reconciliation of a resource while set to "true".
pub const SKIP_RECONCILE_ANNOTATION: &str = "redisoperator.smoketurner.com/skip-reconcile";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish<K>(
        &self,
        resource: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Resolve the AUTH password referenced by a spec, if any.
    pub async fn resolve_password(
        &self,
        namespace: &str,
        auth: Option<&SecretKeyRef>,
    ) -> Result<Option<String>, Error> {
        let Some(auth) = auth else {
            return Ok(None);
        };
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(&auth.name).await?;
        let value = secret_string(&secret, &auth.key).map_err(|reason| Error::Secret {
            name: auth.name.clone(),
            reason,
        })?;
        Ok(Some(value))
    }

    /// Load the certificate bundle from a kubernetes.io/tls style Secret.
    pub async fn resolve_tls_certs(
        &self,
        namespace: &str,
        secret_name: Option<&str>,
    ) -> Result<Option<TlsCertData>, Error> {
        let Some(secret_name) = secret_name else {
            return Ok(None);
        };
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(secret_name).await?;
        let ca_cert_pem = secret_bytes(&secret, "ca.crt").ok_or_else(|| Error::Secret {
            name: secret_name.to_string(),
            reason: "missing key ca.crt".to_string(),
        })?;
        Ok(Some(TlsCertData {
            ca_cert_pem,
            // Client material is optional; without it the operator skips mTLS.
            client_cert_pem: secret_bytes(&secret, "tls.crt"),
            client_key_pem: secret_bytes(&secret, "tls.key"),
        }))
    }
}

fn secret_string(secret: &Secret, key: &str) -> Result<String, String> {
    let bytes = secret_bytes(secret, key).ok_or_else(|| format!("missing key {}", key))?;
    String::from_utf8(bytes).map_err(|_| format!("key {} is not UTF-8", key))
}

fn secret_bytes(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret.data.as_ref()?.get(key).map(|b| b.0.clone())
}
