//! # Attack Client
//!
//! Everything an attacker needs: a [`Model`] to query, a [`Strategy`] that
//! proposes perturbations, and the [`BsonAttack`] loop tying them together.
//!
//! Two models are provided:
//! - [`LocalModel`] calls a [`ModelServer`] in the same process
//! - [`BsonModel`] talks to a remote server over the wire protocol
//!
//! [`ModelServer`]: crate::server::ModelServer

pub mod attack;
pub mod distance;
pub mod remote;
pub mod strategy;

use std::future::Future;
use std::sync::Arc;

use crate::core::tensor::Tensor;
use crate::error::Result;
use crate::protocol::message::{Probe, Response, SessionId, Want};
use crate::server::ModelServer;

pub use attack::{AttackResult, AttackRun, BsonAttack, Observation, Perturbation, Step, StopReason};
pub use distance::Distance;
pub use remote::BsonModel;
pub use strategy::{Feedback, GradientSign, RandomSearch, StepContext, Strategy};

/// A budgeted classifier as seen by an attacker.
pub trait Model {
    /// Classify `input`. Each successful call consumes one query.
    ///
    /// Fails with `BudgetExceeded` once the session's budget is spent.
    fn predict(
        &mut self,
        input: &Tensor,
        want: Want,
    ) -> impl Future<Output = Result<Response>> + Send;
}

/// A session on an in-process [`ModelServer`].
pub struct LocalModel {
    server: Arc<ModelServer>,
    session_id: SessionId,
}

impl LocalModel {
    /// Open a session with `budget` queries.
    pub fn open(server: Arc<ModelServer>, budget: u64) -> Result<Self> {
        let session_id = server.open_session(budget)?;
        Ok(Self { server, session_id })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn server(&self) -> &Arc<ModelServer> {
        &self.server
    }

    pub fn close(self) -> Result<()> {
        self.server.close_session(&self.session_id)
    }
}

impl Model for LocalModel {
    async fn predict(&mut self, input: &Tensor, want: Want) -> Result<Response> {
        let probe = Probe::new(input.clone(), want);
        self.server.predict(&self.session_id, &probe)
    }
}
