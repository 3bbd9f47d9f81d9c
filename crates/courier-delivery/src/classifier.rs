//! Classifier intent sync capability.
//!
//! Providers implement [`IntentProvider`] and make every outbound call
//! through [`LoggedHttp`], which records each call as an HTTP log under the
//! classifier. The engine knows nothing about any particular provider.

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use courier_core::{
    models::{Association, ClassifierId, DeliveryResult, OrgId},
    time::Clock,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::{DeliveryError, Result},
    recorder::ResultRecorder,
    sender::Sender,
    storage::DeliveryStore,
    transport::{TransportRequest, TransportResult},
};

/// One intent known to a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Display name.
    pub name: String,
    /// Identifier on the provider side.
    pub external_id: String,
}

impl Intent {
    /// Creates an intent.
    pub fn new(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self { name: name.into(), external_id: external_id.into() }
    }
}

/// Pre-authorized credentials supplied by the surrounding system.
#[derive(Debug, Clone)]
pub struct ClassifierCredentials {
    /// Classifier being synced.
    pub classifier_id: ClassifierId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Provider-specific settings such as tokens and app ids.
    pub config: BTreeMap<String, String>,
}

impl ClassifierCredentials {
    /// Setting by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}

/// Sender that audits every call under a classifier.
pub struct LoggedHttp {
    sender: Arc<dyn Sender>,
    recorder: ResultRecorder,
    classifier_id: ClassifierId,
    org_id: OrgId,
}

impl LoggedHttp {
    /// Sends a request and records the result.
    pub async fn send(&self, request: TransportRequest) -> TransportResult {
        let result = self.sender.send(request).await;
        self.recorder
            .record(&result, Association::Classifier(self.classifier_id), self.org_id)
            .await;
        result
    }

    /// Sends a request and parses a 2xx JSON response.
    ///
    /// # Errors
    ///
    /// Returns `Sync` for a non-2xx status, no response, or a body that is
    /// not JSON.
    pub async fn get_json(&self, provider: &str, request: TransportRequest) -> Result<Value> {
        let result = self.send(request).await;

        if !result.is_success() {
            return Err(DeliveryError::sync(
                provider,
                format!("HTTP {}: {}", result.status_code, result.body),
            ));
        }

        serde_json::from_str(&result.body)
            .map_err(|e| DeliveryError::sync(provider, format!("invalid JSON response: {e}")))
    }
}

/// A classifier provider able to list its intents.
pub trait IntentProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &'static str;

    /// Fetches the current intents.
    fn sync_intents<'a>(
        &'a self,
        credentials: &'a ClassifierCredentials,
        http: &'a LoggedHttp,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Intent>>> + Send + 'a>>;
}

/// Runs providers with audited HTTP.
pub struct ClassifierSync {
    sender: Arc<dyn Sender>,
    store: Arc<dyn DeliveryStore>,
    recorder: ResultRecorder,
}

impl ClassifierSync {
    /// Creates a sync runner.
    pub fn new(sender: Arc<dyn Sender>, store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>) -> Self {
        let recorder = ResultRecorder::new(store.clone(), clock);
        Self { sender, store, recorder }
    }

    /// Runs `provider` for one classifier.
    ///
    /// # Errors
    ///
    /// Returns whatever the provider returns; the failure is also logged.
    pub async fn sync(
        &self,
        provider: &dyn IntentProvider,
        credentials: &ClassifierCredentials,
    ) -> Result<Vec<Intent>> {
        let http = LoggedHttp {
            sender: self.sender.clone(),
            recorder: self.recorder.clone(),
            classifier_id: credentials.classifier_id,
            org_id: credentials.org_id,
        };

        match provider.sync_intents(credentials, &http).await {
            Ok(intents) => {
                info!(
                    provider = provider.name(),
                    classifier_id = %credentials.classifier_id,
                    intents = intents.len(),
                    "classifier intents synced"
                );
                Ok(intents)
            },
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    classifier_id = %credentials.classifier_id,
                    error = %e,
                    "classifier sync failed"
                );
                Err(e)
            },
        }
    }

    /// HTTP logs of a classifier, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn logs(&self, classifier_id: ClassifierId) -> Result<Vec<DeliveryResult>> {
        Ok(self.store.find_classifier_results(classifier_id).await?)
    }
}
