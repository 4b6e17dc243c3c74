use async_trait::async_trait;
use conclave::config::{EnsembleConfig, ModelConfig};
use conclave::error::Result;
use conclave::orchestrator::{EnsembleRequest, Orchestrator};
use conclave::provider::{CallParams, ChatMessage, ProviderClient, ProviderReply, TokenUsage};
use conclave::quality;
use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

// --- Bench Components ---

struct BenchClient {
    provider: &'static str,
    reply: String,
}

#[async_trait]
impl ProviderClient for BenchClient {
    fn provider_id(&self) -> &'static str {
        self.provider
    }

    async fn call(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _params: &CallParams,
    ) -> Result<ProviderReply> {
        // pure overhead measurement
        Ok(ProviderReply {
            content: self.reply.clone(),
            usage: TokenUsage {
                input_tokens: 20,
                output_tokens: 120,
            },
            latency_ms: 1,
        })
    }
}

fn bench_model(model_id: &str, provider: &str) -> ModelConfig {
    ModelConfig {
        model_id: model_id.to_string(),
        provider: provider.to_string(),
        model: model_id.to_string(),
        max_tokens: 400,
        temperature: 0.7,
        timeout_ms: 5_000,
        input_cost_per_1k: 0.00015,
        output_cost_per_1k: 0.0006,
    }
}

fn bench_answer(angle: &str) -> String {
    format!(
        "Microservices decompose an application into independently deployable \
         services, because each service owns its own lifecycle. For example, \
         the {} concern scales separately. Monolithic architectures bundle \
         everything into one artifact. Therefore the right choice depends on \
         team size, domain complexity, and scaling pressure.",
        angle
    )
}

async fn bench_orchestrator() -> Orchestrator {
    let mut config = EnsembleConfig::default();
    config.models = vec![
        bench_model("bench-a", "openai"),
        bench_model("bench-b", "anthropic"),
        bench_model("bench-c", "gemini"),
    ];
    config.synthesis.model = "bench-a".to_string();
    config.fallback.stable_model = "bench-a".to_string();
    config.meta_voter.model = "bench-a".to_string();
    config.meta_voter.trigger.max_weight_difference = 0.0;

    Orchestrator::builder()
        .config(config)
        .register_client(Arc::new(BenchClient {
            provider: "openai",
            reply: bench_answer("deployment"),
        }))
        .register_client(Arc::new(BenchClient {
            provider: "anthropic",
            reply: bench_answer("team"),
        }))
        .register_client(Arc::new(BenchClient {
            provider: "gemini",
            reply: bench_answer("scaling"),
        }))
        .build()
        .await
        .unwrap()
}

// --- Benchmarks ---

fn bench_quality_scoring(c: &mut Criterion) {
    let prompt = "Explain microservices vs monolithic architectures";
    let content = bench_answer("deployment");
    c.bench_function("quality_score", |b| {
        b.iter(|| quality::score(std::hint::black_box(prompt), std::hint::black_box(&content)))
    });
}

fn bench_full_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let orchestrator = rt.block_on(bench_orchestrator());

    c.bench_function("pipeline_three_mock_models", |b| {
        b.to_async(&rt).iter(|| async {
            let outcome = orchestrator
                .handle(EnsembleRequest {
                    prompt: "Explain microservices vs monolithic architectures.".into(),
                    user_id: "bench".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            std::hint::black_box(outcome);
        })
    });

    orchestrator.shutdown();
}

criterion_group!(benches, bench_quality_scoring, bench_full_pipeline);
criterion_main!(benches);
