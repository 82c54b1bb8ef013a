//! Compiled module caching and the shared engine.
//!
//! Compiled modules are keyed by content id, so two extension versions with
//! identical source share one compilation. Isolates are never cached.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use sha2::{Digest, Sha256};
use wasmtime::{Engine, Module};

use crate::error::{EngineError, Result};

/// Content id of guest source: lowercase hex SHA-256.
pub fn code_id_for(source: &[u8]) -> String {
    hex::encode(Sha256::digest(source))
}

#[derive(Debug, Default)]
struct CacheEntries {
    modules: HashMap<String, Arc<Module>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// A thread-safe, bounded cache for compiled modules.
///
/// When full, the oldest compilation is evicted.
#[derive(Debug)]
pub struct ModuleCache {
    entries: RwLock<CacheEntries>,
    capacity: usize,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(CacheEntries::default()),
            capacity,
        }
    }

    /// Get a cached module or compile `source` if not present.
    ///
    /// `source` may be a binary module or the text format. Compilation
    /// errors are returned as-is; they describe the guest, not the host.
    pub fn get_or_compile(
        &self,
        engine: &Engine,
        code_id: &str,
        source: &[u8],
    ) -> anyhow::Result<Arc<Module>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(module) = entries.modules.get(code_id) {
                return Ok(Arc::clone(module));
            }
        }

        // Compile outside any lock
        let module = Arc::new(Module::new(engine, source)?);
        if self.capacity == 0 {
            return Ok(module);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread might have compiled while we were
        if let Some(existing) = entries.modules.get(code_id) {
            return Ok(Arc::clone(existing));
        }
        while entries.modules.len() >= self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.modules.remove(&oldest);
        }
        entries.order.push_back(code_id.to_string());
        entries.modules.insert(code_id.to_string(), Arc::clone(&module));
        Ok(module)
    }

    pub fn contains(&self, code_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.modules.contains_key(code_id)
    }

    /// Remove a module from the cache.
    ///
    /// Returns `true` if the module was present and removed.
    pub fn remove(&self, code_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.order.retain(|id| id != code_id);
        entries.modules.remove(code_id).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.modules.clear();
        entries.order.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background thread advancing the engine epoch at a fixed interval.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, interval: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("sandbox-epoch-ticker".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// An engine shared by every isolate of a runner, with its epoch ticker.
///
/// The ticker stops when the last clone is dropped.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Engine,
    _ticker: Arc<EpochTicker>,
    tick_interval: Duration,
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("engine", &"<wasmtime::Engine>")
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

impl SharedEngine {
    /// Create an engine with epoch interruption ticking every `tick_interval`.
    pub fn new(tick_interval: Duration) -> Result<Self> {
        if tick_interval.is_zero() {
            return Err(EngineError::Config(
                "epoch_tick_interval must be non-zero".to_string(),
            ));
        }
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(EngineError::IsolateFatal)?;
        let ticker = EpochTicker::start(engine.clone(), tick_interval)?;
        Ok(Self {
            engine,
            _ticker: Arc::new(ticker),
            tick_interval,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

impl std::ops::Deref for SharedEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOOP: &str = r#"(module (func (export "run")))"#;

    fn engine() -> SharedEngine {
        SharedEngine::new(Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn test_code_id_is_sha256_hex() {
        assert_eq!(
            code_id_for(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(code_id_for(NOOP.as_bytes()).len(), 64);
    }

    #[test]
    fn test_module_cache_reuses_compilation() {
        let engine = engine();
        let cache = ModuleCache::new(4);
        assert!(cache.is_empty());

        let id = code_id_for(NOOP.as_bytes());
        let first = cache.get_or_compile(&engine, &id, NOOP.as_bytes()).unwrap();
        let second = cache.get_or_compile(&engine, &id, NOOP.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.contains(&id));
        assert!(cache.remove(&id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_module_cache_evicts_oldest() {
        let engine = engine();
        let cache = ModuleCache::new(2);
        for id in ["a", "b", "c"] {
            cache.get_or_compile(&engine, id, NOOP.as_bytes()).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_invalid_source_is_not_cached() {
        let engine = engine();
        let cache = ModuleCache::new(2);
        assert!(cache.get_or_compile(&engine, "bad", b"not wasm").is_err());
        assert!(!cache.contains("bad"));
    }

    #[test]
    fn test_shared_engine_ticks() {
        let engine = engine();
        let clone = engine.clone();
        assert!(Arc::ptr_eq(&engine._ticker, &clone._ticker));
        assert_eq!(clone.tick_interval(), Duration::from_millis(10));
        assert!(SharedEngine::new(Duration::ZERO).is_err());
    }
}
