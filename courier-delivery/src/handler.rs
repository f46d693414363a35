//! Protocol handler port
//!
//! A handler is the pure transport layer for one destination kind: it takes
//! a prepared payload plus the destination's opaque configuration and
//! performs the wire protocol. Handlers never make retry decisions; they
//! report an outcome and the scheduler decides.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{DeliveryPayload, DestinationKind, EntryId};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// The payload a handler receives: the queue payload plus dispatch context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerPayload {
    #[serde(flatten)]
    pub payload: DeliveryPayload,
    pub entry_id: EntryId,
    /// 1-indexed attempt number
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub processing_at: DateTime<Utc>,
}

/// Successful handler outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSuccess {
    pub delivered_at: DateTime<Utc>,
    pub response_time_ms: u64,
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Opaque downstream identifier (message id, object key, ...)
    #[serde(default)]
    pub cross_system_reference: Option<String>,
}

/// Outcome of a configuration check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ConfigValidation {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Outcome of a connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Transport implementation for one destination kind
#[async_trait]
pub trait DeliveryHandler: Send + Sync + std::fmt::Debug {
    /// Perform the delivery
    ///
    /// # Errors
    /// Returns a classified [`DeliveryError`]; the scheduler maps it to a
    /// retry or a terminal failure.
    async fn deliver(
        &self,
        payload: &HandlerPayload,
        config: &serde_json::Value,
    ) -> Result<HandlerSuccess, DeliveryError>;

    /// Check a destination configuration without touching the network
    async fn validate_config(&self, config: &serde_json::Value) -> ConfigValidation;

    /// Probe connectivity using a destination configuration
    async fn test_connection(&self, config: &serde_json::Value) -> ConnectionTest;

    /// Per-kind dispatch timeout; elapsed calls count as retryable failures
    fn timeout(&self) -> Duration {
        DEFAULT_HANDLER_TIMEOUT
    }
}

/// Maps destination kinds to their transport handlers
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<DestinationKind, Arc<dyn DeliveryHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a destination kind, replacing any previous one
    pub fn register(&mut self, kind: DestinationKind, handler: Arc<dyn DeliveryHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Look up the handler for a destination kind
    #[must_use]
    pub fn get(&self, kind: DestinationKind) -> Option<Arc<dyn DeliveryHandler>> {
        self.handlers.get(&kind).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub mod testing {
    //! Scripted handlers for test suites
    //!
    //! `ScriptedHandler` replays a fixed sequence of outcomes and records
    //! every payload it sees, so tests can assert on attempt counts and
    //! dispatch context without a network.

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{
        ConfigValidation, ConnectionTest, DeliveryError, DeliveryHandler, HandlerPayload,
        HandlerSuccess, Utc,
    };

    /// One scripted outcome
    #[derive(Debug, Clone)]
    pub enum Outcome {
        /// Succeed with the given cross-system reference and latency
        Succeed {
            reference: Option<String>,
            response_time_ms: u64,
        },
        /// Fail with an error built by kind tag
        Fail(ScriptedError),
    }

    /// Serializable stand-ins for [`DeliveryError`] variants
    #[derive(Debug, Clone)]
    pub enum ScriptedError {
        ConnectionReset,
        Timeout,
        Http(u16),
        AuthenticationFailed,
        InvalidPayload,
    }

    impl ScriptedError {
        fn build(&self) -> DeliveryError {
            match self {
                Self::ConnectionReset => {
                    DeliveryError::ConnectionFailed("connection reset by peer".to_string())
                }
                Self::Timeout => DeliveryError::Timeout("deadline elapsed".to_string()),
                Self::Http(status) => DeliveryError::Http {
                    status: *status,
                    message: format!("status {status}"),
                },
                Self::AuthenticationFailed => {
                    DeliveryError::AuthenticationFailed("credentials rejected".to_string())
                }
                Self::InvalidPayload => {
                    DeliveryError::InvalidPayload("unrenderable payload".to_string())
                }
            }
        }
    }

    /// Handler that replays a fixed outcome sequence
    ///
    /// Once the script is exhausted the final outcome repeats.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedHandler {
        script: Arc<Mutex<Vec<Outcome>>>,
        seen: Arc<Mutex<Vec<HandlerPayload>>>,
    }

    impl ScriptedHandler {
        /// Handler that always succeeds with the given reference
        #[must_use]
        pub fn always_succeeding(reference: &str) -> Self {
            Self::with_script(vec![Outcome::Succeed {
                reference: Some(reference.to_string()),
                response_time_ms: 42,
            }])
        }

        /// Handler that always fails with the given error
        #[must_use]
        pub fn always_failing(error: ScriptedError) -> Self {
            Self::with_script(vec![Outcome::Fail(error)])
        }

        /// Handler replaying `script` in order, repeating the last outcome
        #[must_use]
        pub fn with_script(script: Vec<Outcome>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script)),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every payload this handler has been invoked with
        #[must_use]
        pub fn payloads(&self) -> Vec<HandlerPayload> {
            self.seen.lock().clone()
        }

        /// How many times this handler has been invoked
        #[must_use]
        pub fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait::async_trait]
    impl DeliveryHandler for ScriptedHandler {
        async fn deliver(
            &self,
            payload: &HandlerPayload,
            _config: &serde_json::Value,
        ) -> Result<HandlerSuccess, DeliveryError> {
            self.seen.lock().push(payload.clone());

            let outcome = {
                let mut script = self.script.lock();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script
                        .first()
                        .cloned()
                        .unwrap_or(Outcome::Fail(ScriptedError::ConnectionReset))
                }
            };

            match outcome {
                Outcome::Succeed {
                    reference,
                    response_time_ms,
                } => Ok(HandlerSuccess {
                    delivered_at: Utc::now(),
                    response_time_ms,
                    status_code: Some(200),
                    cross_system_reference: reference,
                }),
                Outcome::Fail(error) => Err(error.build()),
            }
        }

        async fn validate_config(&self, _config: &serde_json::Value) -> ConfigValidation {
            ConfigValidation::ok()
        }

        async fn test_connection(&self, _config: &serde_json::Value) -> ConnectionTest {
            ConnectionTest {
                success: true,
                response_time_ms: Some(1),
                error: None,
            }
        }
    }
}
