//! Example: Black-box attack against an in-process model server
//!
//! Builds a small linear classifier, opens a budgeted session on a
//! `ModelServer`, and runs a random-search attack through `LocalModel`.
//!
//! Run with: `cargo run --example local_attack`

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use adversarial_protocol::client::{Distance, LocalModel, RandomSearch};
use adversarial_protocol::config::{AttackConfig, LoggingConfig, ServerConfig};
use adversarial_protocol::server::LinearClassifier;
use adversarial_protocol::utils::logging::init_logging;
use adversarial_protocol::{version, BsonAttack, ModelServer, Tensor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LoggingConfig::default())?;
    println!("=== adversarial-protocol {} ===\n", version());

    // Three classes over four features: the largest of the first three wins,
    // the fourth feature nudges towards class 2.
    let classifier = LinearClassifier::new(
        vec![4],
        vec![
            vec![1.0, 0.0, 0.0, -0.2],
            vec![0.0, 1.0, 0.0, -0.2],
            vec![0.0, 0.0, 1.0, 0.4],
        ],
        vec![0.0, 0.0, 0.0],
    )?;
    let server = Arc::new(ModelServer::new(Arc::new(classifier), ServerConfig::default()));

    let budget = 200;
    let mut model = LocalModel::open(server.clone(), budget)?;
    println!("Opened session {} with budget {}", model.session_id(), budget);

    let config = AttackConfig {
        distance: Distance::MeanSquaredError,
        seed: 7,
        initial_epsilon: 0.1,
        ..AttackConfig::default()
    };
    let mut attack = BsonAttack::new(RandomSearch::from_config(&config), config);

    let original = Tensor::from_vec(vec![0.6, 0.5, 0.3, 0.5]);
    let result = attack.run(&mut model, &original, 0.05, false).await?;

    println!("Original label:  {:?}", result.original_label());
    println!("Stop reason:     {:?}", result.stop_reason());
    println!("Iterations:      {}", result.iterations());
    println!("Queries used:    {}", result.queries_used());

    match result.best() {
        Some(best) => {
            println!("Adversarial label: {}", best.label());
            println!("Distance ({}): {:.6}", Distance::MeanSquaredError.name(), best.distance());
            println!("Found at iteration {}", best.iteration());
            println!("Candidate: {:?}", best.candidate().data());
        }
        None => println!("No adversarial example within the distance limit"),
    }

    let info = server.session_info(model.session_id())?;
    println!("\nServer view: {} of {} queries consumed", info.consumed, info.budget);
    model.close()?;
    Ok(())
}
