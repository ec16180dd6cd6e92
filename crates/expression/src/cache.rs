//! Compiled-artifact cache.
//!
//! Two layers, both `moka` caches:
//!
//! - the **shape** cache maps a canonical procedure shape to its compiled
//!   body, so procedures that differ only in constants compile once;
//! - the **exact** cache maps a full procedure (constants included) to a
//!   ready [`Callable`], skipping canonicalization on repeated requests.
//!
//! Both layers are unbounded unless a capacity is configured.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::ast::Procedure;
use crate::canonical::canonical_procedure;
use crate::compile::{Callable, CompileBackend, CompiledBody, Interpreter};
use crate::equivalence::Equivalence;
use crate::error::{ExpressionError, ExpressionResult};

/// Cache key comparing procedures by equivalence.
#[derive(Debug, Clone)]
struct ProcedureKey {
    procedure: Arc<Procedure>,
    options: Equivalence,
    hash: u64,
}

impl ProcedureKey {
    fn new(procedure: Arc<Procedure>, options: Equivalence) -> Self {
        let hash = options.hash_procedure(&procedure);
        Self {
            procedure,
            options,
            hash,
        }
    }
}

impl PartialEq for ProcedureKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self
                .options
                .procedures(&self.procedure, &other.procedure)
    }
}

impl Eq for ProcedureKey {}

impl Hash for ProcedureKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of compiled shapes; `None` for unbounded.
    pub shape_capacity: Option<u64>,
    /// Maximum number of exact entries; `None` for unbounded.
    pub exact_capacity: Option<u64>,
    /// Move literals and host functions into closures before compiling.
    pub extract_closures: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shape_capacity: None,
            exact_capacity: None,
            extract_closures: true,
        }
    }
}

/// Statistics about the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Compiled shapes currently stored.
    pub shapes: u64,
    /// Exact entries currently stored.
    pub exact: u64,
    /// Requests answered from the exact layer.
    pub exact_hits: u64,
    /// Requests answered from the shape layer (no compilation).
    pub shape_hits: u64,
    /// Compilations performed.
    pub compilations: u64,
}

impl CacheStats {
    /// Share of requests that did not compile, from 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.exact_hits + self.shape_hits;
        let total = hits + self.compilations;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Shape-keyed cache of compiled procedure bodies.
#[derive(Debug)]
pub struct ArtifactCache {
    backend: Arc<dyn CompileBackend>,
    config: CacheConfig,
    shapes: Cache<ProcedureKey, Arc<dyn CompiledBody>>,
    exact: Cache<ProcedureKey, Callable>,
    exact_hits: AtomicU64,
    shape_hits: AtomicU64,
    compilations: AtomicU64,
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(Arc::new(Interpreter), CacheConfig::default())
    }
}

impl ArtifactCache {
    /// Cache compiling with `backend`.
    pub fn new(backend: Arc<dyn CompileBackend>, config: CacheConfig) -> Self {
        fn build<V: Clone + Send + Sync + 'static>(
            capacity: Option<u64>,
        ) -> Cache<ProcedureKey, V> {
            let builder = Cache::builder();
            match capacity {
                Some(capacity) => builder.max_capacity(capacity).build(),
                None => builder.build(),
            }
        }
        Self {
            backend,
            config,
            shapes: build(config.shape_capacity),
            exact: build(config.exact_capacity),
            exact_hits: AtomicU64::new(0),
            shape_hits: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
        }
    }

    /// The compile backend.
    pub fn backend(&self) -> &Arc<dyn CompileBackend> {
        &self.backend
    }

    /// A callable for `procedure`, compiling its shape at most once.
    pub fn get(&self, procedure: Procedure) -> ExpressionResult<Callable> {
        let exact_key = ProcedureKey::new(Arc::new(procedure), Equivalence::default());
        if let Some(callable) = self.exact.get(&exact_key) {
            self.exact_hits.fetch_add(1, Ordering::Relaxed);
            trace!(root = %exact_key.procedure.root, "exact artifact hit");
            return Ok(callable);
        }

        let form = canonical_procedure(&exact_key.procedure, self.config.extract_closures);
        let root = form.shape.root.id();
        let shape_key = ProcedureKey::new(Arc::new(form.shape), Equivalence::default().strict());
        let mut compiled = false;
        let body = self
            .shapes
            .try_get_with(shape_key.clone(), || {
                compiled = true;
                self.backend.compile(&shape_key.procedure)
            })
            .map_err(|err: Arc<ExpressionError>| (*err).clone())?;
        if compiled {
            self.compilations.fetch_add(1, Ordering::Relaxed);
            debug!(
                backend = self.backend.name(),
                root = %shape_key.procedure.root,
                slots = form.closure.len(),
                "compiled new procedure shape"
            );
        } else {
            self.shape_hits.fetch_add(1, Ordering::Relaxed);
        }

        let callable = Callable::new(root, body, Arc::new(form.closure))?;
        self.exact.insert(exact_key, callable.clone());
        Ok(callable)
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.shapes.run_pending_tasks();
        self.exact.run_pending_tasks();
        CacheStats {
            shapes: self.shapes.entry_count(),
            exact: self.exact.entry_count(),
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            shape_hits: self.shape_hits.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached artifact.
    pub fn clear(&self) {
        self.shapes.invalidate_all();
        self.exact.invalidate_all();
        debug!("artifact cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt};
    use crate::path::parse_path;
    use arbor_schema::{ScalarKind, Schema, TypeId};
    use std::sync::Arc;

    fn setter(schema: &Schema, root: TypeId, value: i64) -> Procedure {
        Procedure::new(
            schema.type_ref(root).unwrap(),
            vec![Stmt::Assign {
                target: parse_path(schema, root, "N").unwrap(),
                value: Expr::literal(value) + Expr::literal(1),
            }],
        )
    }

    fn schema() -> (Arc<Schema>, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let root = b.object("Root").unwrap();
        b.field(root, "N", int).unwrap();
        b.field(root, "M", int).unwrap();
        (b.build(), root)
    }

    #[test]
    fn test_same_shape_compiles_once() {
        let (schema, root) = schema();
        let cache = ArtifactCache::default();
        let a = cache.get(setter(&schema, root, 3)).unwrap();
        let b = cache.get(setter(&schema, root, 10)).unwrap();
        assert!(Arc::ptr_eq(a.body(), b.body()));
        assert_ne!(a.closure(), b.closure());

        let stats = cache.stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.shape_hits, 1);
    }

    #[test]
    fn test_exact_layer_hits() {
        let (schema, root) = schema();
        let cache = ArtifactCache::default();
        cache.get(setter(&schema, root, 3)).unwrap();
        cache.get(setter(&schema, root, 3)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.exact_hits, 1);
        assert_eq!(stats.compilations, 1);
        assert!(stats.hit_rate() > 0.0);
    }

    #[test]
    fn test_different_shapes_compile_separately() {
        let (schema, root) = schema();
        let cache = ArtifactCache::default();
        let a = cache.get(setter(&schema, root, 3)).unwrap();
        let other = Procedure::new(
            schema.type_ref(root).unwrap(),
            vec![Stmt::Assign {
                target: parse_path(&schema, root, "M").unwrap(),
                value: Expr::literal(3) + Expr::literal(1),
            }],
        );
        let b = cache.get(other).unwrap();
        assert!(!Arc::ptr_eq(a.body(), b.body()));
        assert_eq!(cache.stats().compilations, 2);
    }

    #[test]
    fn test_without_extraction_constants_split_shapes() {
        let (schema, root) = schema();
        let cache = ArtifactCache::new(
            Arc::new(Interpreter),
            CacheConfig {
                extract_closures: false,
                ..CacheConfig::default()
            },
        );
        let a = cache.get(setter(&schema, root, 3)).unwrap();
        let b = cache.get(setter(&schema, root, 10)).unwrap();
        assert!(!Arc::ptr_eq(a.body(), b.body()));
    }
}
