//! # Model Server
//!
//! Serves a [`Classifier`] behind per-session query budgets.
//!
//! Each probe is checked in this order, and only a probe that reaches the
//! classifier and returns successfully is charged:
//!
//! 1. the session exists and has not expired (`SessionNotFound`)
//! 2. the tensor has exactly the classifier's input shape (`ShapeMismatch`)
//! 3. the requested output kind is available (`Unsupported`)
//! 4. a probe with the same `probe_id` was not already answered (replayed reply)
//! 5. the budget has a query left (`BudgetExceeded`)
//!
//! Steps 4 and 5, inference and the charge happen under the session's lock, so
//! concurrent probes on one session can never consume more than its budget.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use adversarial_protocol::config::ServerConfig;
//! use adversarial_protocol::protocol::{Probe, Want};
//! use adversarial_protocol::server::{LinearClassifier, ModelServer};
//! use adversarial_protocol::Tensor;
//!
//! let classifier = LinearClassifier::new(
//!     vec![2],
//!     vec![vec![1.0, 0.0], vec![0.0, 1.0]],
//!     vec![0.0, 0.0],
//! ).unwrap();
//! let server = ModelServer::new(Arc::new(classifier), ServerConfig::default());
//!
//! let session = server.open_session(1).unwrap();
//! let probe = Probe::new(Tensor::from_vec(vec![0.1, 0.9]), Want::Label);
//! assert_eq!(server.predict(&session, &probe).unwrap().label, 1);
//! assert!(server.predict(&session, &probe).is_err());
//! ```

pub mod classifier;
pub mod session;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ProtocolConfig, ServerConfig};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::{Message, Probe, Response, SessionId, Want};
use crate::utils::metrics::{global_metrics, Timer};

pub use classifier::{Classifier, Inference, LinearClassifier};
pub use session::{SessionInfo, SessionState};

use session::{lock_session, SessionRegistry};

/// Registry-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub open_sessions: usize,
    pub max_sessions: usize,
}

/// A classifier plus the sessions that query it.
pub struct ModelServer {
    classifier: Arc<dyn Classifier>,
    sessions: SessionRegistry,
    config: ServerConfig,
}

impl ModelServer {
    pub fn new(classifier: Arc<dyn Classifier>, config: ServerConfig) -> Self {
        info!(
            input_shape = ?classifier.input_shape(),
            num_classes = classifier.num_classes(),
            gradients = classifier.supports_gradient(),
            max_sessions = config.max_sessions,
            "Model server created"
        );
        Self {
            sessions: SessionRegistry::new(
                config.max_sessions,
                config.session_ttl,
                config.probe_cache_size,
            ),
            classifier,
            config,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open a session allowing `budget` queries.
    ///
    /// # Errors
    /// `InvalidBudget` if `budget` is zero or above the configured maximum,
    /// `TooManySessions` if the registry is full after evicting expired sessions.
    pub fn open_session(&self, budget: u64) -> Result<SessionId> {
        if budget == 0 || budget > self.config.max_budget {
            warn!(budget, max_budget = self.config.max_budget, "Rejected session budget");
            return Err(ProtocolError::InvalidBudget(budget));
        }
        self.sessions.open(budget)
    }

    /// Answer one probe, charging one query on success.
    pub fn predict(&self, session_id: &SessionId, probe: &Probe) -> Result<Response> {
        let _timer = Timer::start("predict");
        let metrics = global_metrics();

        let handle = self.sessions.get(session_id)?;

        if let Err(e) = probe.tensor.check_shape(self.classifier.input_shape()) {
            metrics.shape_rejection();
            debug!(session = %session_id, error = %e, "Probe rejected");
            return Err(e);
        }

        let with_gradient = probe.want == Want::Gradient;
        if with_gradient && !self.classifier.supports_gradient() {
            return Err(ProtocolError::Unsupported(
                "classifier does not provide gradients".to_string(),
            ));
        }

        let mut record = lock_session(&handle)?;

        if let Some(probe_id) = probe.probe_id.as_deref() {
            if let Some(reply) = record.cached_reply(probe_id) {
                metrics.duplicate_probe();
                debug!(session = %session_id, probe_id, "Answered duplicate probe from cache");
                return Ok(reply);
            }
        }

        if let Err(e) = record.ensure_available() {
            if e.is_budget_exhausted() {
                metrics.budget_rejection();
                warn!(session = %session_id, budget = record.budget(), "Query budget exhausted");
            }
            return Err(e);
        }

        let inference = self.classifier.infer(&probe.tensor, with_gradient)?;
        if with_gradient && inference.gradient.is_none() {
            return Err(ProtocolError::Unsupported(
                "classifier returned no gradient".to_string(),
            ));
        }

        record.charge();
        let response = Response {
            label: inference.label,
            probs: (probe.want != Want::Label).then_some(inference.probabilities),
            gradient: if with_gradient { inference.gradient } else { None },
            queries_remaining: record.remaining(),
        };

        if let Some(probe_id) = probe.probe_id.as_deref() {
            record.remember_reply(probe_id, &response);
        }
        metrics.query_served();
        Ok(response)
    }

    /// Close a session. Unknown or already closed sessions are not an error.
    pub fn close_session(&self, session_id: &SessionId) -> Result<()> {
        if !self.sessions.close(session_id)? {
            debug!(session = %session_id, "Close for unknown session ignored");
        }
        Ok(())
    }

    pub fn session_info(&self, session_id: &SessionId) -> Result<SessionInfo> {
        self.sessions.info(session_id)
    }

    /// Drop expired sessions without waiting for the next `open_session`.
    pub fn purge_expired(&self) -> Result<usize> {
        self.sessions.purge_expired()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            open_sessions: self.sessions.len(),
            max_sessions: self.config.max_sessions,
        }
    }

    /// Dispatcher answering the session requests of the wire protocol.
    pub fn dispatcher(self: &Arc<Self>) -> Result<Dispatcher> {
        let dispatcher = Dispatcher::new();

        let server = Arc::clone(self);
        dispatcher.register("open_session", move |msg| match msg {
            Message::OpenSession { budget } => Ok(Message::SessionOpened {
                session_id: server.open_session(*budget)?,
                budget: *budget,
            }),
            _ => Err(ProtocolError::UnexpectedMessage),
        })?;

        let server = Arc::clone(self);
        dispatcher.register("probe", move |msg| match msg {
            Message::Probe { session_id, probe } => {
                server.predict(session_id, probe).map(Message::Response)
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        })?;

        let server = Arc::clone(self);
        dispatcher.register("close_session", move |msg| match msg {
            Message::CloseSession { session_id } => {
                server.close_session(session_id)?;
                Ok(Message::SessionClosed {
                    session_id: session_id.clone(),
                })
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        })?;

        Ok(dispatcher)
    }
}

/// Serve `classifier` over TCP until Ctrl+C.
///
/// Binds `config.server.address` and runs with graceful shutdown.
pub async fn model_server(classifier: Arc<dyn Classifier>, config: ProtocolConfig) -> Result<()> {
    config.validate_strict()?;
    let server = Arc::new(ModelServer::new(classifier, config.server));
    crate::transport::tcp::start_server(server).await
}
