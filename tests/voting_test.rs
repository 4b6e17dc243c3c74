//! Voting engine scenarios through the public API, including the
//! meta-voter tie-break.

use conclave::breaker::BreakerRegistry;
use conclave::calibration::{ConfidenceLevel, ConfidenceScore};
use conclave::classify::PromptClass;
use conclave::config::{BreakerOptions, MetaVoterOptions, VotingOptions};
use conclave::dispatch::{RoleResponse, RoleStatus};
use conclave::provider::{ProviderClient, ProviderRegistry, TokenUsage};
use conclave::quality::QualityScore;
use conclave::reliability::ReliabilityTracker;
use conclave::voting::VotingEngine;
use std::sync::Arc;

mod common;
use common::mock_support::{MockClient, model};

fn role(model_id: &str, content: &str, confidence: f64, quality: f64) -> RoleResponse {
    RoleResponse {
        model_id: model_id.to_string(),
        status: RoleStatus::Fulfilled,
        content: content.to_string(),
        usage: TokenUsage::default(),
        response_time_ms: 300,
        error: None,
        quality: QualityScore {
            composite: quality,
            ..QualityScore::default()
        },
        confidence: ConfidenceScore {
            raw: confidence,
            calibrated: confidence,
            level: ConfidenceLevel::from_score(confidence),
            ..ConfidenceScore::default()
        },
    }
}

fn engine(meta_client: Arc<MockClient>) -> (VotingEngine, Arc<MockClient>) {
    let mut registry = ProviderRegistry::default();
    registry
        .insert(model("meta-judge", "openai"), meta_client.clone() as Arc<dyn ProviderClient>)
        .unwrap();
    let engine = VotingEngine::new(
        Arc::new(registry),
        Arc::new(BreakerRegistry::new(BreakerOptions::default())),
        Arc::new(ReliabilityTracker::new()),
    );
    (engine, meta_client)
}

/// Two strong, nearly tied answers plus four weak ones: the weight gap
/// between the top two stays under the trigger while the top-minus-mean
/// consensus gap lands in the `moderate` band.
fn near_tie_roles() -> Vec<RoleResponse> {
    vec![
        role(
            "m-a",
            "Service boundaries reduce coupling across teams and clarify ownership of \
             deployment pipelines in larger organizations.",
            0.90,
            0.85,
        ),
        role(
            "m-b",
            "Independent deployability shortens release cycles and isolates failures \
             to a single bounded context at runtime.",
            0.89,
            0.84,
        ),
        role("m-c", "maybe", 0.05, 0.02),
        role("m-d", "unsure", 0.05, 0.02),
        role("m-e", "possibly", 0.05, 0.02),
        role("m-f", "perhaps", 0.05, 0.02),
    ]
}

#[tokio::test]
async fn tie_break_invokes_meta_voter_exactly_once() {
    let (engine, meta_client) = engine(MockClient::new("openai", "B"));

    let mut meta = MetaVoterOptions::default();
    meta.model = "meta-judge".to_string();
    meta.trigger.max_weight_difference = 0.05;
    meta.trigger.min_consensus_strength = "moderate".to_string();

    let result = engine
        .vote(
            "Which matters more for microservices?",
            PromptClass::Analytical,
            &near_tie_roles(),
            &VotingOptions::default(),
            &meta,
        )
        .await;

    assert!(result.tie_breaking);
    assert_eq!(meta_client.call_count(), 1);
    // The verdict replaced the algorithmic winner.
    assert_eq!(result.winner.as_deref(), Some("m-b"));
    // But the weights table is still the algorithmic one.
    let sum: f64 = result.weights.values().sum();
    assert!((sum - 1.0).abs() < 1e-3);
    assert!(result.weights["m-a"] > result.weights["m-b"] - 0.05);
}

#[tokio::test]
async fn clear_winner_skips_meta_voter() {
    let (engine, meta_client) = engine(MockClient::new("openai", "B"));

    let mut meta = MetaVoterOptions::default();
    meta.model = "meta-judge".to_string();
    meta.trigger.max_weight_difference = 0.05;
    meta.trigger.min_consensus_strength = "very-weak".to_string();

    let roles = vec![
        role(
            "m-strong",
            "A thorough, well-grounded answer covering deployment, scaling, and cost.",
            0.95,
            0.9,
        ),
        role("m-weak", "not sure", 0.1, 0.05),
    ];
    let result = engine
        .vote(
            "q",
            PromptClass::Analytical,
            &roles,
            &VotingOptions::default(),
            &meta,
        )
        .await;

    assert!(!result.tie_breaking);
    assert_eq!(meta_client.call_count(), 0);
    assert_eq!(result.winner.as_deref(), Some("m-strong"));
}

#[tokio::test]
async fn disabled_meta_voter_never_fires() {
    let (engine, meta_client) = engine(MockClient::new("openai", "B"));

    let options = VotingOptions {
        enable_meta_voter: false,
        ..VotingOptions::default()
    };
    let mut meta = MetaVoterOptions::default();
    meta.model = "meta-judge".to_string();
    meta.trigger.max_weight_difference = 1.0;
    meta.trigger.min_consensus_strength = "very-weak".to_string();

    let result = engine
        .vote(
            "q",
            PromptClass::Analytical,
            &near_tie_roles(),
            &options,
            &meta,
        )
        .await;

    assert!(!result.tie_breaking);
    assert_eq!(meta_client.call_count(), 0);
    assert!(result.winner.is_some());
}

#[tokio::test]
async fn exactly_one_winner_with_any_fulfilled_response() {
    let (engine, _) = engine(MockClient::new("openai", "A"));
    let mut meta = MetaVoterOptions::default();
    meta.trigger.max_weight_difference = 0.0;

    for count in 1..=4usize {
        let roles: Vec<RoleResponse> = (0..count)
            .map(|i| {
                role(
                    &format!("m-{}", i),
                    &format!("Answer number {} about service design trade-offs.", i),
                    0.4 + 0.1 * i as f64,
                    0.5,
                )
            })
            .collect();
        let result = engine
            .vote("q", PromptClass::Factual, &roles, &VotingOptions::default(), &meta)
            .await;
        assert!(result.winner.is_some(), "winner missing for {} roles", count);
        let sum: f64 = result.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }
}
