//! Cached inference service for combine and split
//!
//! Each operation is memoized on its exact input. A cache miss builds the
//! prompt, runs the engine with the operation's adapter and parses the
//! reply. Only parsed successes are stored; failures come back as typed
//! errors for the caller to map onto the fallback shape.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::adapter::AdapterSet;
use crate::cache::{CacheStats, CoalescingCache};
use crate::engine::{GenerationRequest, GenerationSettings, InferenceEngine};
use crate::error::Result;
use crate::prompt::PromptBuilder;
use crate::reply::ReplyParser;
use crate::symbol::{Operation, Symbol, SymbolPair, SymbolResult};

/// Cache activity per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub combine: CacheStats,
    pub split: CacheStats,
}

/// Prompt, generate and parse for one operation. Shared with the spawned
/// cache computations, which outlive the request that started them.
struct Pipeline {
    engine: Arc<dyn InferenceEngine>,
    prompts: PromptBuilder,
    parser: ReplyParser,
    adapters: AdapterSet,
    settings: GenerationSettings,
}

impl Pipeline {
    async fn combine(&self, first: &Symbol, second: &Symbol) -> Result<SymbolResult> {
        let prompt = self.prompts.combine(first, second)?;
        let raw = self.generate(Operation::Combine, prompt).await?;
        Ok(self.parser.parse_combine(&raw)?)
    }

    async fn split(&self, symbol: &Symbol) -> Result<SymbolPair> {
        let prompt = self.prompts.split(symbol)?;
        let raw = self.generate(Operation::Split, prompt).await?;
        Ok(self.parser.parse_split(&raw)?)
    }

    async fn generate(&self, operation: Operation, prompt: String) -> Result<String> {
        let request = GenerationRequest {
            prompt,
            adapter: self.adapters.for_operation(operation),
            settings: self.settings.clone(),
        };
        self.engine.generate(request).await
    }
}

/// Memoized combine/split over an inference engine
pub struct CraftService {
    pipeline: Arc<Pipeline>,
    combine_cache: CoalescingCache<(Symbol, Symbol), SymbolResult>,
    split_cache: CoalescingCache<Symbol, SymbolPair>,
}

impl CraftService {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        prompts: PromptBuilder,
        parser: ReplyParser,
        adapters: AdapterSet,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                engine,
                prompts,
                parser,
                adapters,
                settings,
            }),
            combine_cache: CoalescingCache::new(),
            split_cache: CoalescingCache::new(),
        }
    }

    /// Combine two symbols, in order, into one
    #[instrument(skip_all, fields(first = %first, second = %second))]
    pub async fn combine(&self, first: &Symbol, second: &Symbol) -> Result<SymbolResult> {
        info!("got add request: [{}, {}]", first, second);
        let key = (first.clone(), second.clone());
        let pipeline = Arc::clone(&self.pipeline);
        let (first, second) = key.clone();

        self.combine_cache
            .get_or_try_insert_with(key, move || async move {
                let parsed = pipeline.combine(&first, &second).await?;
                info!("got response: {:?}", parsed);
                Ok(parsed)
            })
            .await
    }

    /// Split one symbol into an ordered pair
    #[instrument(skip_all, fields(symbol = %symbol))]
    pub async fn split(&self, symbol: &Symbol) -> Result<SymbolPair> {
        info!("got split request: {}", symbol);
        let pipeline = Arc::clone(&self.pipeline);
        let owned = symbol.clone();

        self.split_cache
            .get_or_try_insert_with(symbol.clone(), move || async move {
                let parsed = pipeline.split(&owned).await?;
                info!("got response: {:?}", parsed);
                Ok(parsed)
            })
            .await
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            combine: self.combine_cache.stats(),
            split: self.split_cache.stats(),
        }
    }
}

impl std::fmt::Debug for CraftService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CraftService")
            .field("settings", &self.pipeline.settings)
            .field("adapters", &self.pipeline.adapters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterHandle;
    use crate::error::Error;
    use crate::prompt::JinjaTemplate;
    use crate::reply::ReplyError;
    use async_trait::async_trait;
    use mockall::{mock, predicate::*};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    mock! {
        pub Engine {}

        #[async_trait]
        impl InferenceEngine for Engine {
            async fn generate(&self, request: GenerationRequest) -> Result<String>;
        }
    }

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn handle(name: &str) -> AdapterHandle {
        AdapterHandle {
            name: name.to_string(),
            path: PathBuf::from(format!("/loras/{}", name)),
            rank: 64,
            alpha: 16.0,
            target_modules: vec!["q_proj".to_string()],
            tensor_count: Some(2),
        }
    }

    fn service(engine: impl InferenceEngine + 'static) -> CraftService {
        CraftService::new(
            Arc::new(engine),
            PromptBuilder::new(Arc::new(JinjaTemplate::llama2().unwrap())),
            ReplyParser::default(),
            AdapterSet::new(Some(handle("add")), Some(handle("split"))),
            GenerationSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_combine_invokes_engine_once() {
        let mut engine = MockEngine::new();
        engine
            .expect_generate()
            .withf(|req| {
                req.prompt == "<s>[INST] Water+Fire [/INST]"
                    && req.adapter.as_ref().map(|a| a.name.as_str()) == Some("add")
                    && req.settings.max_new_tokens == 30
                    && req.settings.temperature == 0.0
                    && req.settings.encode_special_tokens
                    && !req.settings.decode_special_tokens
            })
            .times(1)
            .returning(|req| Ok(format!("{} Steam 💨</s>", req.prompt)));

        let service = service(engine);
        for _ in 0..3 {
            let result = service.combine(&symbol("Water"), &symbol("Fire")).await.unwrap();
            assert_eq!(result.symbol, "Steam");
            assert_eq!(result.emoji, "💨");
        }
        assert_eq!(service.stats().combine.hits, 2);
    }

    #[tokio::test]
    async fn test_combine_is_order_sensitive() {
        let mut engine = MockEngine::new();
        engine
            .expect_generate()
            .withf(|req| req.prompt.contains("Mouse+Cat"))
            .times(1)
            .returning(|req| Ok(format!("{} Chase 🐈</s>", req.prompt)));
        engine
            .expect_generate()
            .withf(|req| req.prompt.contains("Cat+Mouse"))
            .times(1)
            .returning(|req| Ok(format!("{} Tom and Jerry 📺</s>", req.prompt)));

        let service = service(engine);
        let mouse = symbol("Mouse");
        let cat = symbol("Cat");

        let forward = service.combine(&mouse, &cat).await.unwrap();
        let backward = service.combine(&cat, &mouse).await.unwrap();
        assert_eq!(forward.symbol, "Chase");
        assert_eq!(backward.symbol, "Tom and Jerry");

        // Both orders are cached independently.
        service.combine(&mouse, &cat).await.unwrap();
        service.combine(&cat, &mouse).await.unwrap();
        assert_eq!(service.stats().combine.entries, 2);
    }

    #[tokio::test]
    async fn test_split_uses_split_adapter() {
        let mut engine = MockEngine::new();
        engine
            .expect_generate()
            .withf(|req| {
                req.prompt == "<s>[INST] Steam [/INST]"
                    && req.adapter.as_ref().map(|a| a.name.as_str()) == Some("split")
            })
            .times(1)
            .returning(|req| Ok(format!("{} Water 💧+Fire 🔥</s>", req.prompt)));

        let service = service(engine);
        let pair = service.split(&symbol("Steam")).await.unwrap();
        assert_eq!(pair.0.symbol, "Water");
        assert_eq!(pair.0.emoji, "💧");
        assert_eq!(pair.1.symbol, "Fire");
        assert_eq!(pair.1.emoji, "🔥");

        let again = service.split(&symbol("Steam")).await.unwrap();
        assert_eq!(again, pair);
    }

    #[tokio::test]
    async fn test_malformed_output_is_not_cached() {
        let mut engine = MockEngine::new();
        let mut seq = mockall::Sequence::new();
        engine
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| Ok(format!("{} Water 💧</s>", req.prompt)));
        engine
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| Ok(format!("{} Water 💧+Fire 🔥</s>", req.prompt)));

        let service = service(engine);
        let err = service.split(&symbol("Steam")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Reply(ReplyError::MissingPairSeparator(_))
        ));
        assert_eq!(service.stats().split.entries, 0);

        let pair = service.split(&symbol("Steam")).await.unwrap();
        assert_eq!(pair.1.symbol, "Fire");
    }

    #[tokio::test]
    async fn test_missing_marker_is_a_reply_error() {
        let mut engine = MockEngine::new();
        engine
            .expect_generate()
            .times(2)
            .returning(|_| Ok("Steam 💨</s>".to_string()));

        let service = service(engine);
        for _ in 0..2 {
            let err = service.combine(&symbol("Water"), &symbol("Fire")).await.unwrap_err();
            assert!(matches!(err, Error::Reply(ReplyError::MissingReplyMarker(_))));
        }
    }

    #[tokio::test]
    async fn test_engine_error_is_returned_and_retried() {
        let mut engine = MockEngine::new();
        let mut seq = mockall::Sequence::new();
        engine
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::inference("CUDA out of memory")));
        engine
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| Ok(format!("{} Steam 💨</s>", req.prompt)));

        let service = service(engine);
        let err = service.combine(&symbol("Water"), &symbol("Fire")).await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));

        let result = service.combine(&symbol("Water"), &symbol("Fire")).await.unwrap();
        assert_eq!(result.symbol, "Steam");
    }

    #[tokio::test]
    async fn test_operations_do_not_share_cache_entries() {
        let mut engine = MockEngine::new();
        engine
            .expect_generate()
            .with(function(|req: &GenerationRequest| req.prompt.contains("Fire+Fire")))
            .times(1)
            .returning(|req| Ok(format!("{} Inferno 🔥</s>", req.prompt)));
        engine
            .expect_generate()
            .with(function(|req: &GenerationRequest| !req.prompt.contains('+')))
            .times(1)
            .returning(|req| Ok(format!("{} Heat 🌡️+Light 💡</s>", req.prompt)));

        let service = service(engine);
        let fire = symbol("Fire");
        service.combine(&fire, &fire).await.unwrap();
        service.split(&fire).await.unwrap();

        let stats = service.stats();
        assert_eq!(stats.combine.entries, 1);
        assert_eq!(stats.split.entries, 1);
    }

    struct SlowEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceEngine for SlowEngine {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(format!("{} Steam 💨</s>", request.prompt))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_requests_coalesce() {
        let engine = Arc::new(SlowEngine {
            calls: AtomicUsize::new(0),
        });
        let service = Arc::new(CraftService::new(
            engine.clone(),
            PromptBuilder::new(Arc::new(JinjaTemplate::llama2().unwrap())),
            ReplyParser::default(),
            AdapterSet::new(Some(handle("add")), Some(handle("split"))),
            GenerationSettings::default(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.combine(&symbol("Water"), &symbol("Fire")).await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap().symbol, "Steam");
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    struct CountingEngine {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl InferenceEngine for CountingEngine {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} Steam 💨</s>", request.prompt))
        }
    }

    #[tokio::test]
    async fn test_abandoned_request_still_completes_inference() {
        let engine = Arc::new(CountingEngine {
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let service = CraftService::new(
            engine.clone(),
            PromptBuilder::new(Arc::new(JinjaTemplate::llama2().unwrap())),
            ReplyParser::default(),
            AdapterSet::new(Some(handle("add")), Some(handle("split"))),
            GenerationSettings::default(),
        );

        // The client disconnects long before the engine answers.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            service.combine(&symbol("Water"), &symbol("Fire")),
        )
        .await;
        assert!(abandoned.is_err());

        let result = service.combine(&symbol("Water"), &symbol("Fire")).await.unwrap();
        assert_eq!(result.symbol, "Steam");
        assert_eq!(engine.started.load(Ordering::SeqCst), 1);
        assert_eq!(engine.finished.load(Ordering::SeqCst), 1);

        let stats = service.stats().combine;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }
}
