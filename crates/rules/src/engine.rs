//! The rule engine: owner of rule trees, correspondences and every cache
//! built from them.

use std::fmt;
use std::sync::Arc;

use arbor_expression::{
    ArtifactCache, CacheStats, CompileBackend, DefaultPathFormatter, EquivalenceKey, Expr,
    Interpreter, PathFormatter, parse_path,
};
use arbor_schema::{Schema, TypeId};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::assemble::{Mode, assemble};
use crate::config::EngineConfig;
use crate::error::RuleResult;
use crate::handles::{Converter, StaticValidator, TreeMutator, TreeValidator};
use crate::migrate::{self, Correspondence};
use crate::registry::OnceMap;
use crate::tree::{RuleTree, TreeId};

/// Handles are cached per tree state and equivalent target path.
type HandleKey = (TreeId, usize, EquivalenceKey);

/// Migrations are cached per tree state, correspondence tree state and kind.
type MigrationKey = (TreeId, usize, TreeId, usize, bool);

/// Entry point for declaring rules and obtaining compiled handles.
///
/// One engine owns one schema, one rule tree per root type, the
/// correspondences between types and the artifact cache every handle is
/// compiled through. All methods take `&self`; the engine can be shared
/// across threads.
///
/// ```
/// use arbor_rules::{Rule, RuleEngine};
/// use arbor_expression::Expr;
/// use arbor_schema::{ScalarKind, Schema};
/// use serde_json::json;
///
/// let mut b = Schema::builder();
/// let int = b.scalar(ScalarKind::Int);
/// let root = b.object("Root").unwrap();
/// b.field(root, "A", int).unwrap();
/// b.field(root, "B", int).unwrap();
/// let engine = RuleEngine::new(b.build());
///
/// let a = engine.path(root, "A").unwrap();
/// let b = engine.path(root, "B").unwrap();
/// let tree = engine
///     .configure(root, |tree| {
///         tree.attach(&b, Rule::set(a + Expr::literal(4)))?;
///         Ok(())
///     })
///     .unwrap();
///
/// let mutator = engine.tree_mutator(&tree, &engine.root_path(root).unwrap()).unwrap();
/// let mut value = json!({ "A": 3, "B": 0 });
/// mutator.mutate(&mut value).unwrap();
/// assert_eq!(value, json!({ "A": 3, "B": 7 }));
/// ```
pub struct RuleEngine {
    schema: Arc<Schema>,
    config: EngineConfig,
    artifacts: ArtifactCache,
    formatter: Arc<dyn PathFormatter>,
    trees: DashMap<TypeId, Arc<RuleTree>>,
    correspondences: OnceMap<(TypeId, TypeId, String), Arc<Correspondence>>,
    migrations: OnceMap<MigrationKey, Arc<RuleTree>>,
    mutators: OnceMap<HandleKey, TreeMutator>,
    validators: OnceMap<HandleKey, TreeValidator>,
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("trees", &self.trees.len())
            .field("correspondences", &self.correspondences.len())
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Engine over `schema` with the default configuration, the interpreter
    /// backend and dotted result paths.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::from_parts(
            schema,
            EngineConfig::default(),
            Arc::new(Interpreter),
            Arc::new(DefaultPathFormatter),
        )
    }

    /// Builder for an engine with injected collaborators.
    pub fn builder(schema: Arc<Schema>) -> RuleEngineBuilder {
        RuleEngineBuilder {
            schema,
            config: EngineConfig::default(),
            backend: Arc::new(Interpreter),
            formatter: Arc::new(DefaultPathFormatter),
        }
    }

    fn from_parts(
        schema: Arc<Schema>,
        config: EngineConfig,
        backend: Arc<dyn CompileBackend>,
        formatter: Arc<dyn PathFormatter>,
    ) -> Self {
        info!(
            backend = backend.name(),
            max_validation_results = config.max_validation_results,
            "rule engine created"
        );
        Self {
            artifacts: ArtifactCache::new(backend, config.cache_config()),
            schema,
            config,
            formatter,
            trees: DashMap::new(),
            correspondences: OnceMap::default(),
            migrations: OnceMap::default(),
            mutators: OnceMap::default(),
            validators: OnceMap::default(),
        }
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `text` as a path from `root`.
    pub fn path(&self, root: TypeId, text: &str) -> RuleResult<Expr> {
        Ok(parse_path(&self.schema, root, text)?)
    }

    /// The root path of `root`.
    pub fn root_path(&self, root: TypeId) -> RuleResult<Expr> {
        Ok(Expr::root(self.schema.type_ref(root)?))
    }

    /// The rule tree rooted at `root`, created empty on first use.
    pub fn tree(&self, root: TypeId) -> RuleResult<Arc<RuleTree>> {
        if let Some(tree) = self.trees.get(&root) {
            return Ok(tree.value().clone());
        }
        let entry = self
            .trees
            .entry(root)
            .or_try_insert_with(|| RuleTree::new(self.schema.clone(), root).map(Arc::new))?;
        Ok(entry.value().clone())
    }

    /// Declare rules on the tree rooted at `root`.
    pub fn configure(
        &self,
        root: TypeId,
        declare: impl FnOnce(&RuleTree) -> RuleResult<()>,
    ) -> RuleResult<Arc<RuleTree>> {
        let tree = self.tree(root)?;
        declare(&tree).inspect_err(|err| {
            warn!(root = %tree.root(), error = %err, "rule configuration failed");
        })?;
        debug!(root = %tree.root(), rules = tree.revision(), "rule tree configured");
        Ok(tree)
    }

    /// Mutator applying the rules of `tree` below `path`.
    pub fn tree_mutator(&self, tree: &RuleTree, path: &Expr) -> RuleResult<TreeMutator> {
        let key = (tree.id(), tree.revision(), EquivalenceKey::new(path.clone()));
        self.mutators
            .get_or_try_build(key, || {
                let assembled = assemble(tree, path, Mode::Mutate)?;
                let callable = self.artifacts.get(assembled.procedure)?;
                Ok(TreeMutator::new(callable, assembled.rules))
            })
            .inspect_err(|err| warn!(path = %path, error = %err, "mutator build failed"))
    }

    /// Validator evaluating the validators of `tree` below `path`.
    pub fn validator(&self, tree: &RuleTree, path: &Expr) -> RuleResult<TreeValidator> {
        let key = (tree.id(), tree.revision(), EquivalenceKey::new(path.clone()));
        self.validators
            .get_or_try_build(key, || {
                let assembled = assemble(tree, path, Mode::Validate)?;
                let callable = self.artifacts.get(assembled.procedure)?;
                Ok(TreeValidator::new(
                    callable,
                    assembled.rules,
                    self.config.max_validation_results,
                    self.formatter.clone(),
                ))
            })
            .inspect_err(|err| warn!(path = %path, error = %err, "validator build failed"))
    }

    /// Pass/fail validator over the same procedure as
    /// [`RuleEngine::validator`].
    pub fn static_validator(&self, tree: &RuleTree, path: &Expr) -> RuleResult<StaticValidator> {
        let validator = self.validator(tree, path)?;
        Ok(StaticValidator::new(validator.callable().clone()))
    }

    /// `tree` re-expressed over the source type of `corr`.
    pub fn migrate(&self, tree: &RuleTree, corr: &Correspondence) -> RuleResult<Arc<RuleTree>> {
        let key = migration_key(tree, corr, false);
        self.migrations
            .get_or_try_build(key, || migrate::migrate(tree, corr).map(Arc::new))
    }

    /// Copy of `tree` whose validators report paths of the source type of
    /// `corr`.
    pub fn migrate_paths(
        &self,
        tree: &RuleTree,
        corr: &Correspondence,
    ) -> RuleResult<Arc<RuleTree>> {
        let key = migration_key(tree, corr, true);
        self.migrations
            .get_or_try_build(key, || migrate::migrate_paths(tree, corr).map(Arc::new))
    }

    /// The correspondence producing `destination` values from `source`
    /// values under `context`. `build` declares its rules the first time the
    /// combination is requested; later requests return the cached one.
    pub fn correspondence(
        &self,
        destination: TypeId,
        source: TypeId,
        context: &str,
        build: impl FnOnce(&RuleTree) -> RuleResult<()>,
    ) -> RuleResult<Arc<Correspondence>> {
        let key = (destination, source, context.to_owned());
        self.correspondences.get_or_try_build(key, || {
            let tree = RuleTree::new(self.schema.clone(), destination)?;
            build(&tree).inspect_err(|err| {
                warn!(context, error = %err, "correspondence configuration failed");
            })?;
            let corr = Correspondence::new(Arc::new(tree), source, context)?;
            debug!(
                destination = %corr.destination(),
                source = %corr.source(),
                context,
                rules = corr.tree().revision(),
                "correspondence built"
            );
            Ok(Arc::new(corr))
        })
    }

    /// Converter filling destination instances of `corr` from source
    /// instances.
    pub fn converter(&self, corr: &Correspondence) -> RuleResult<Converter> {
        let root = Expr::root(corr.destination().clone());
        let mutator = self.tree_mutator(corr.tree(), &root)?;
        Ok(Converter::new(mutator, corr.source().id()))
    }

    /// Artifact cache statistics.
    pub fn artifact_stats(&self) -> CacheStats {
        self.artifacts.stats()
    }

    /// Drop every rule tree, correspondence and cached artifact.
    pub fn clear(&self) {
        self.trees.clear();
        self.correspondences.clear();
        self.migrations.clear();
        self.mutators.clear();
        self.validators.clear();
        self.artifacts.clear();
        info!("rule engine cleared");
    }
}

fn migration_key(tree: &RuleTree, corr: &Correspondence, paths_only: bool) -> MigrationKey {
    (
        tree.id(),
        tree.revision(),
        corr.tree().id(),
        corr.tree().revision(),
        paths_only,
    )
}

/// Builder for [`RuleEngine`].
pub struct RuleEngineBuilder {
    schema: Arc<Schema>,
    config: EngineConfig,
    backend: Arc<dyn CompileBackend>,
    formatter: Arc<dyn PathFormatter>,
}

impl fmt::Debug for RuleEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngineBuilder")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl RuleEngineBuilder {
    /// Use `config`.
    #[must_use = "builder methods must be chained or built"]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Compile with `backend`.
    #[must_use = "builder methods must be chained or built"]
    pub fn backend(mut self, backend: Arc<dyn CompileBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Format validation result paths with `formatter`.
    #[must_use = "builder methods must be chained or built"]
    pub fn formatter(mut self, formatter: Arc<dyn PathFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> RuleResult<RuleEngine> {
        self.config
            .validate()
            .inspect_err(|err| warn!(error = %err, "invalid engine configuration"))?;
        Ok(RuleEngine::from_parts(
            self.schema,
            self.config,
            self.backend,
            self.formatter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;
    use arbor_schema::ScalarKind;
    use pretty_assertions::{assert_eq, assert_ne};

    fn engine() -> (RuleEngine, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let root = b.object("Root").unwrap();
        b.field(root, "A", int).unwrap();
        b.field(root, "B", int).unwrap();
        (RuleEngine::new(b.build()), root)
    }

    #[test]
    fn test_tree_is_shared() {
        let (engine, root) = engine();
        let first = engine.tree(root).unwrap();
        let second = engine.tree(root).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_handles_are_cached_per_revision() {
        let (engine, root) = engine();
        let b = engine.path(root, "B").unwrap();
        let tree = engine
            .configure(root, |tree| tree.attach(&b, Rule::set(Expr::literal(1))).map(drop))
            .unwrap();
        let target = engine.root_path(root).unwrap();

        let first = engine.tree_mutator(&tree, &target).unwrap();
        let again = engine.tree_mutator(&tree, &target).unwrap();
        assert_eq!(first.rules(), again.rules());
        assert_eq!(engine.mutators.len(), 1);

        tree.attach(&b, Rule::set(Expr::literal(2))).unwrap();
        let updated = engine.tree_mutator(&tree, &target).unwrap();
        assert_ne!(updated.rules(), first.rules());
        assert_eq!(engine.mutators.len(), 2);
    }

    #[test]
    fn test_configuration_fault_is_returned() {
        let (engine, root) = engine();
        let err = engine
            .configure(root, |_| Err(crate::RuleError::invalid_config("boom")))
            .unwrap_err();
        assert_eq!(err.code(), "RULES:INVALID_CONFIG");
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let (engine, _) = engine();
        let err = RuleEngine::builder(engine.schema().clone())
            .config(EngineConfig::new().with_max_validation_results(0))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "RULES:INVALID_CONFIG");
    }

    #[test]
    fn test_clear_drops_trees() {
        let (engine, root) = engine();
        let before = engine.tree(root).unwrap();
        engine.clear();
        let after = engine.tree(root).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(engine.artifact_stats().shapes, 0);
    }
}
