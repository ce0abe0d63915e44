//! Memoizing registry of tokenizers, keyed by model name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{DefaultTokenizerFactory, SharedTokenizer, TokenizerError, TokenizerFactory};

/// Lazily constructs and memoizes one tokenizer per model name.
///
/// For any model name at most one tokenizer is ever constructed, even when many
/// callers miss concurrently. Construction errors are returned to the caller
/// and never cached, so a later call retries.
///
/// The cache is an ordinary value: construct one per application (or per test)
/// and share it by reference or `Arc`.
pub struct TokenizerCache {
    factory: Arc<dyn TokenizerFactory>,
    entries: RwLock<HashMap<String, SharedTokenizer>>,
}

impl fmt::Debug for TokenizerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        let mut models: Vec<&str> = entries.keys().map(String::as_str).collect();
        models.sort_unstable();
        f.debug_struct("TokenizerCache")
            .field("models", &models)
            .finish_non_exhaustive()
    }
}

impl Default for TokenizerCache {
    fn default() -> Self {
        Self::new(DefaultTokenizerFactory)
    }
}

impl TokenizerCache {
    #[must_use]
    pub fn new(factory: impl TokenizerFactory + 'static) -> Self {
        Self::with_factory(Arc::new(factory))
    }

    #[must_use]
    pub fn with_factory(factory: Arc<dyn TokenizerFactory>) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached tokenizer for `model_name`, constructing it on first use.
    pub fn get_or_create(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
        if model_name.is_empty() {
            return Err(TokenizerError::EmptyModelName);
        }

        if let Some(tokenizer) = self.entries.read().get(model_name) {
            return Ok(Arc::clone(tokenizer));
        }

        let mut entries = self.entries.write();
        // Another caller may have filled the slot between the two locks.
        if let Some(tokenizer) = entries.get(model_name) {
            return Ok(Arc::clone(tokenizer));
        }

        let tokenizer = self.factory.create_tokenizer(model_name).map_err(|e| {
            tracing::warn!(model = model_name, "Tokenizer construction failed: {e}");
            e
        })?;
        entries.insert(model_name.to_string(), Arc::clone(&tokenizer));
        Ok(tokenizer)
    }

    /// Drop every cached tokenizer.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn has(&self, model_name: &str) -> bool {
        self.entries.read().contains_key(model_name)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::TokenizerCache;
    use crate::{SharedTokenizer, Tokenizer, TokenizerError, TokenizerFactory};

    #[derive(Debug)]
    struct WordCounter {
        model: String,
    }

    impl Tokenizer for WordCounter {
        fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

    /// Counts constructions and sleeps a little so concurrent misses overlap.
    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl TokenizerFactory for CountingFactory {
        fn create_tokenizer(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            Ok(Arc::new(WordCounter {
                model: model_name.to_string(),
            }))
        }
    }

    impl TokenizerFactory for Arc<CountingFactory> {
        fn create_tokenizer(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
            self.as_ref().create_tokenizer(model_name)
        }
    }

    /// Fails until `ready` is set.
    struct FlakyFactory {
        ready: Arc<AtomicBool>,
    }

    impl TokenizerFactory for FlakyFactory {
        fn create_tokenizer(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
            if !self.ready.load(Ordering::SeqCst) {
                return Err(TokenizerError::UnsupportedProvider {
                    provider: model_name.to_string(),
                });
            }
            Ok(Arc::new(WordCounter {
                model: model_name.to_string(),
            }))
        }
    }

    #[test]
    fn caches_and_returns_same_instance() {
        let cache = TokenizerCache::new(CountingFactory::default());

        let first = cache.get_or_create("model1").unwrap();
        let second = cache.get_or_create("model1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.model_name(), "model1");

        let third = cache.get_or_create("model2").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        assert_eq!(cache.size(), 2);
        assert!(cache.has("model1"));
        assert!(!cache.has("model3"));

        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(!cache.has("model1"));
    }

    #[test]
    fn empty_model_name_is_rejected() {
        let cache = TokenizerCache::new(CountingFactory::default());
        assert_eq!(
            cache.get_or_create("").unwrap_err(),
            TokenizerError::EmptyModelName
        );
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn concurrent_first_access_constructs_once() {
        let factory = Arc::new(CountingFactory::default());
        let cache = TokenizerCache::new(Arc::clone(&factory));

        let tokenizers: Vec<SharedTokenizer> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..100)
                .map(|_| scope.spawn(|| cache.get_or_create("openai").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(tokenizers.iter().all(|t| Arc::ptr_eq(t, &tokenizers[0])));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn concurrent_burst_across_models_sizes_to_distinct_names() {
        let factory = Arc::new(CountingFactory::default());
        let cache = TokenizerCache::new(Arc::clone(&factory));
        let models = ["model1", "model2", "model3"];

        std::thread::scope(|scope| {
            for i in 0..100 {
                let cache = &cache;
                let model = models[i % models.len()];
                scope.spawn(move || cache.get_or_create(model).unwrap());
            }
        });

        assert_eq!(cache.size(), 3);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn construction_failures_are_not_cached() {
        let ready = Arc::new(AtomicBool::new(false));
        let cache = TokenizerCache::new(FlakyFactory {
            ready: Arc::clone(&ready),
        });

        assert!(cache.get_or_create("anthropic").is_err());
        assert!(!cache.has("anthropic"));
        assert_eq!(cache.size(), 0);

        ready.store(true, Ordering::SeqCst);
        let tokenizer = cache.get_or_create("anthropic").unwrap();
        assert_eq!(tokenizer.count_tokens("one two three").unwrap(), 3);
        assert!(cache.has("anthropic"));
    }

    #[test]
    fn default_cache_uses_provider_factory() {
        let cache = TokenizerCache::default();
        let tokenizer = cache.get_or_create("OpenAI").unwrap();
        assert!(tokenizer.count_tokens("Hello, world!").unwrap() > 0);
        assert!(cache.get_or_create("not-a-provider").is_err());
        assert_eq!(cache.size(), 1);
    }
}
