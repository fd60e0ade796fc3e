//! Learning option values from live devices

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::action::{Action, Options};
use crate::error::{ActionError, LearnError};
use crate::registry::{ActionDefinition, InstanceRegistry};

/// Starts bounded-time learn requests.
#[derive(Clone, Debug)]
pub struct LearnCoordinator {
    timeout: Duration,
}

impl LearnCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build a request for `action`. Fails with [`LearnError::Unsupported`]
    /// when the definition cannot learn.
    ///
    /// The request holds its own copy of the action, so the caller may keep
    /// mutating its lists while the request is in flight.
    pub fn prepare(
        &self,
        registry: &dyn InstanceRegistry,
        action: &Action,
    ) -> Result<LearnRequest, LearnError> {
        let definition = registry
            .definition(&action.instance_id, &action.kind)
            .filter(|definition| definition.has_learn())
            .ok_or(LearnError::Unsupported)?;
        let label = registry
            .instance(&action.instance_id)
            .map(|instance| instance.label().to_string())
            .unwrap_or_else(|| action.instance_id.clone());

        Ok(LearnRequest {
            definition,
            action: action.clone(),
            label,
            timeout: self.timeout,
        })
    }
}

/// A learn call in flight.
pub struct LearnRequest {
    definition: Arc<dyn ActionDefinition>,
    action: Action,
    label: String,
    timeout: Duration,
}

impl LearnRequest {
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Race the definition's learn call against the timeout.
    ///
    /// The call runs on its own task and is not cancelled when the timeout
    /// wins; it finishes in the background and its answer is discarded.
    pub async fn run(self) -> Result<Options, LearnError> {
        let learn = tokio::spawn(self.definition.learn(self.action));
        match tokio::time::timeout(self.timeout, learn).await {
            Err(_) => Err(LearnError::TimedOut(self.timeout)),
            Ok(Err(join)) => Err(LearnError::Rejected(ActionError::new(join.to_string()))),
            Ok(Ok(Err(err))) => Err(LearnError::Rejected(err)),
            Ok(Ok(Ok(None))) => Err(LearnError::NoOptions),
            Ok(Ok(Ok(Some(options)))) => Ok(options),
        }
    }

    /// Like [`run`](Self::run), logging failures against the instance.
    pub async fn resolve(self) -> Option<Options> {
        let label = self.label.clone();
        let id = self.action.id.clone();
        match self.run().await {
            Ok(options) => {
                debug!(instance = %label, action = %id, "Learned action options");
                Some(options)
            }
            Err(err) => {
                warn!(instance = %label, action = %id, error = %err, "Error learning action options");
                None
            }
        }
    }
}

impl std::fmt::Debug for LearnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnRequest")
            .field("action", &self.action.id)
            .field("instance", &self.label)
            .field("timeout", &self.timeout)
            .finish()
    }
}
