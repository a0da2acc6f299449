//! # Adversarial Protocol
//!
//! A query-budgeted black-box robustness protocol. A model server exposes a
//! classifier behind strict per-session query accounting; an attack client
//! probes it to build small adversarial perturbations within the budget.
//!
//! ## Layout
//! - [`core`](crate::core): tensors, the BSON-compatible document codec and packet framing
//! - [`protocol`]: typed messages and request dispatch
//! - [`server`]: the [`ModelServer`] and the [`Classifier`](server::Classifier) it wraps
//! - [`client`]: the [`Model`](client::Model) trait, [`BsonModel`] and [`BsonAttack`]
//! - [`transport`]: TCP and Unix socket listeners
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use adversarial_protocol::client::{LocalModel, RandomSearch};
//! use adversarial_protocol::config::{AttackConfig, ServerConfig};
//! use adversarial_protocol::server::LinearClassifier;
//! use adversarial_protocol::{BsonAttack, ModelServer, Tensor};
//!
//! # async fn demo() -> adversarial_protocol::Result<()> {
//! let classifier = LinearClassifier::new(
//!     vec![2],
//!     vec![vec![1.0, 0.0], vec![0.0, 1.0]],
//!     vec![0.0, 0.0],
//! )?;
//! let server = Arc::new(ModelServer::new(Arc::new(classifier), ServerConfig::default()));
//! let mut model = LocalModel::open(server, 100)?;
//!
//! let config = AttackConfig::default();
//! let mut attack = BsonAttack::new(RandomSearch::from_config(&config), config);
//! let original = Tensor::from_vec(vec![0.6, 0.4]);
//! let result = attack.run(&mut model, &original, 0.1, true).await?;
//! println!("success={} queries={}", result.success(), result.queries_used());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod utils;

use once_cell::sync::Lazy;

pub use client::{BsonAttack, BsonModel};
pub use crate::core::packet::Packet;
pub use crate::core::tensor::Tensor;
pub use error::{ProtocolError, Result};
pub use server::{model_server, ModelServer};

static VERSION: Lazy<&'static str> = Lazy::new(|| include_str!("../VERSION").trim());

/// Package version, read from the `VERSION` file at build time.
pub fn version() -> &'static str {
    *VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_semver_like() {
        let v = version();
        assert!(!v.is_empty());
        assert_eq!(v, v.trim());
        assert_eq!(v.split('.').count(), 3);
        assert!(std::ptr::eq(v, version()));
    }
}
