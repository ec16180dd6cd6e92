//! Cross-schema migration.
//!
//! A [`Correspondence`] is a rule tree rooted at a destination type whose
//! setters state how each destination value is produced from a source type.
//! It resolves destination paths into source expressions, which is enough to
//! re-express whole rule trees over the source type ([`migrate`]) or only
//! their reported paths ([`migrate_paths`]).

use std::sync::Arc;

use arbor_expression::{Builtin, Chain, Expr, Lambda, Shard, chain_type};
use arbor_schema::{TypeId, TypeRef};
use tracing::{debug, warn};

use crate::canonical::NodeRules;
use crate::edge::Edge;
use crate::error::{RuleError, RuleResult};
use crate::rule::{Rule, ValidatorKind};
use crate::tree::{Arena, NodeId, RuleTree};

/// How values of a destination type are produced from a source type.
#[derive(Debug, Clone)]
pub struct Correspondence {
    tree: Arc<RuleTree>,
    source: TypeRef,
    context: String,
}

/// Filters and the element step of one collection level of a path.
struct Level {
    filters: Vec<Lambda>,
    /// Destination array, filters stripped.
    array: Expr,
    shard: Shard,
}

struct Anchor {
    consumed: usize,
    value: Expr,
    levels: Vec<Level>,
    /// Destination prefix through the consumed shards, filters stripped.
    plain: Expr,
}

impl Correspondence {
    /// Correspondence from `source` to the root type of `tree`.
    pub fn new(tree: Arc<RuleTree>, source: TypeId, context: impl Into<String>) -> RuleResult<Self> {
        let source = tree.schema().type_ref(source)?;
        Ok(Self {
            tree,
            source,
            context: context.into(),
        })
    }

    /// The rule tree holding the setters.
    pub fn tree(&self) -> &Arc<RuleTree> {
        &self.tree
    }

    /// Destination type.
    pub fn destination(&self) -> &TypeRef {
        self.tree.root()
    }

    /// Source type.
    pub fn source(&self) -> &TypeRef {
        &self.source
    }

    /// Context the correspondence was built for.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Source expression producing the destination value at `path`; `None`
    /// when no setter chain covers it.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use arbor_expression::parse_path;
    /// use arbor_rules::{Correspondence, Rule, RuleTree};
    /// use arbor_schema::{ScalarKind, Schema};
    ///
    /// let mut b = Schema::builder();
    /// let int = b.scalar(ScalarKind::Int);
    /// let src = b.object("Src").unwrap();
    /// b.field(src, "Amount", int).unwrap();
    /// let dest = b.object("Dest").unwrap();
    /// b.field(dest, "Total", int).unwrap();
    /// let schema = b.build();
    ///
    /// let tree = RuleTree::new(schema.clone(), dest).unwrap();
    /// let total = parse_path(&schema, dest, "Total").unwrap();
    /// tree.attach(&total, Rule::set(parse_path(&schema, src, "Amount").unwrap()))
    ///     .unwrap();
    ///
    /// let corr = Correspondence::new(Arc::new(tree), src, "default").unwrap();
    /// let resolved = corr.resolve(&total).unwrap().unwrap();
    /// assert_eq!(resolved.to_string(), "Src.Amount");
    /// ```
    pub fn resolve(&self, path: &Expr) -> RuleResult<Option<Expr>> {
        match self.resolve_path(path) {
            Ok(expr) => Ok(Some(expr)),
            Err(RuleError::UnableToMigrate { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Rewrite every destination-rooted chain of `expr` into the source type.
    pub fn migrate_expr(&self, expr: &Expr) -> RuleResult<Expr> {
        let destination = self.tree.root_type();
        let mut failure = None;
        let migrated = expr.clone().rewrite(&mut |node| {
            if failure.is_some() {
                return Some(node.clone());
            }
            let outcome = match node {
                Expr::Map { source, projection } if source.root_type() == Some(destination) => {
                    self.resolve_path(source).and_then(|resolved| {
                        let projection = self.migrate_lambda(projection, source, &resolved)?;
                        Ok(Expr::Map {
                            source: Box::new(resolved),
                            projection,
                        })
                    })
                }
                _ if node.is_chain() && node.root_type() == Some(destination) => {
                    self.resolve_path(node)
                }
                _ => return None,
            };
            match outcome {
                Ok(resolved) => Some(resolved),
                Err(err) => {
                    failure = Some(err);
                    Some(node.clone())
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(migrated),
        }
    }

    fn resolve_path(&self, path: &Expr) -> RuleResult<Expr> {
        let unable = || RuleError::unable_to_migrate(path);
        let chain = Chain::decompose(path).ok_or_else(unable)?;
        match &chain.head {
            Expr::Root(ty) if ty.id() == self.tree.root_type() => {}
            _ => return Err(unable()),
        }
        let shards = self.tree.shards(path)?;
        let anchor = self.anchor(&shards)?.ok_or_else(unable)?;
        let bound = self.bind_levels(anchor.value, &anchor.levels)?;
        self.apply_suffix(bound, anchor.plain, &shards[anchor.consumed..], path)
    }

    /// Longest prefix of `shards` whose node has a setter or a source array.
    fn anchor(&self, shards: &[Shard]) -> RuleResult<Option<Anchor>> {
        let arena = self.tree.read();
        for consumed in (0..=shards.len()).rev() {
            if consumed > 0 && matches!(shards[consumed - 1], Shard::Where(_)) {
                continue;
            }
            let prefix = &shards[..consumed];
            let Some(node) = arena.find(prefix) else {
                continue;
            };
            let rules = NodeRules::canonicalize(self.tree.schema(), arena.node(node))?;
            let value = match (rules.setter, &rules.source_array) {
                (Some(setter), _) => match setter.rule {
                    Rule::Set { value } => value,
                    _ => continue,
                },
                (None, Some(source)) => self.projected(&arena, node, source)?,
                (None, None) => continue,
            };
            let (levels, plain) = self.levels(&arena, node, prefix);
            return Ok(Some(Anchor {
                consumed,
                value,
                levels,
                plain,
            }));
        }
        Ok(None)
    }

    /// A source array, projected through the whole-element setter if the
    /// element node has one.
    fn projected(&self, arena: &Arena, array: NodeId, source: &Expr) -> RuleResult<Expr> {
        let Some(element) = arena.node(array).child(Edge::Each) else {
            return Ok(source.clone());
        };
        let rules = NodeRules::canonicalize(self.tree.schema(), arena.node(element))?;
        let Some(Rule::Set { value }) = rules.setter.map(|s| s.rule) else {
            return Ok(source.clone());
        };
        let schema = self.tree.schema();
        let element_type = schema.element_type(chain_type(schema, source)?)?;
        let current = source.clone().current();
        Ok(Expr::Map {
            source: Box::new(source.clone()),
            projection: Lambda::new(element_type, |q| value.substitute(&[(current, q)])),
        })
    }

    /// Collection levels of `prefix` that the node reaches through `Each`
    /// edges, plus the filter-free destination prefix.
    fn levels(&self, arena: &Arena, node: NodeId, prefix: &[Shard]) -> (Vec<Level>, Expr) {
        let mut edges = Vec::new();
        let mut at = Some(node);
        while let Some(id) = at {
            let node = arena.node(id);
            if let Some(edge) = node.edge().filter(|e| e.is_element()) {
                edges.push(edge);
            }
            at = node.parent();
        }
        edges.reverse();
        let mut edges = edges.into_iter();

        let mut levels = Vec::new();
        let mut filters = Vec::new();
        let mut plain = Expr::root(self.tree.root().clone());
        for shard in prefix {
            match shard {
                Shard::Where(predicate) => filters.push(predicate.clone()),
                Shard::Member(_) => plain = shard.clone().apply(plain),
                element => {
                    if edges.next() == Some(Edge::Each) {
                        levels.push(Level {
                            filters: std::mem::take(&mut filters),
                            array: plain.clone(),
                            shard: element.clone(),
                        });
                    } else {
                        filters.clear();
                    }
                    plain = element.clone().apply(plain);
                }
            }
        }
        (levels, plain)
    }

    /// Bind the n-th `Current()` of every chain in `value` to the n-th
    /// collection level of the destination path.
    fn bind_levels(&self, value: Expr, levels: &[Level]) -> RuleResult<Expr> {
        if levels.is_empty() {
            return Ok(value);
        }
        let mut failure = None;
        let bound = value.rewrite(&mut |node| {
            if !node.is_chain() || failure.is_some() {
                return None;
            }
            let chain = Chain::decompose(node)?;
            let mut out = chain.head;
            let mut depth = 0;
            for shard in chain.shards {
                let Shard::Current = shard else {
                    out = shard.apply(out);
                    continue;
                };
                let Some(level) = levels.get(depth) else {
                    out = out.current();
                    continue;
                };
                depth += 1;
                for filter in &level.filters {
                    match self.migrate_lambda(filter, &level.array, &out) {
                        Ok(predicate) => {
                            out = Expr::Where {
                                parent: Box::new(out),
                                predicate,
                            }
                        }
                        Err(err) => {
                            failure = Some(err);
                            return Some(node.clone());
                        }
                    }
                }
                out = level.shard.clone().apply(out);
            }
            Some(out)
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(bound),
        }
    }

    fn apply_suffix(
        &self,
        mut value: Expr,
        mut plain: Expr,
        suffix: &[Shard],
        path: &Expr,
    ) -> RuleResult<Expr> {
        let schema = self.tree.schema();
        for shard in suffix {
            if !value.is_chain() {
                return Err(RuleError::unable_to_migrate(path));
            }
            value = match shard {
                Shard::Member(field) => {
                    let owner = chain_type(schema, &value)?;
                    let mapped = schema
                        .field(owner, field.name())
                        .map_err(|_| RuleError::unable_to_migrate(path))?;
                    plain = shard.clone().apply(plain);
                    value.member(mapped)
                }
                Shard::Where(predicate) => {
                    let predicate = self.migrate_lambda(predicate, &plain, &value)?;
                    Expr::Where {
                        parent: Box::new(value),
                        predicate,
                    }
                }
                element => {
                    plain = element.clone().apply(plain);
                    element.clone().apply(value)
                }
            };
        }
        Ok(value)
    }

    /// Re-express a predicate over elements of the destination `array` as a
    /// predicate over elements of the source array `resolved`.
    fn migrate_lambda(&self, lambda: &Lambda, array: &Expr, resolved: &Expr) -> RuleResult<Lambda> {
        let schema = self.tree.schema();
        let element_type = schema.element_type(chain_type(schema, resolved)?)?;
        let body = lambda
            .body
            .as_ref()
            .clone()
            .replace_param(lambda.param, &array.clone().current());
        let body = self.migrate_expr(&body)?;
        let current = resolved.clone().current();
        Ok(Lambda::new(element_type, |q| body.substitute(&[(current, q)])))
    }
}

fn first_chain(expr: &Expr, root: TypeId, path: &Expr) -> RuleResult<Expr> {
    expr.chains()
        .into_iter()
        .find(|c| c.root_type() == Some(root))
        .cloned()
        .ok_or_else(|| RuleError::unable_to_migrate(path))
}

fn each_to_current(expr: Expr) -> Expr {
    match expr.map_children(&mut each_to_current) {
        Expr::Each(parent) => Expr::Current(parent),
        other => other,
    }
}

fn check_root(tree: &RuleTree, corr: &Correspondence) -> RuleResult<()> {
    if tree.root_type() == corr.tree.root_type() {
        return Ok(());
    }
    Err(RuleError::RootTypeMismatch {
        expected: corr.destination().name().to_owned(),
        actual: tree.root().name().to_owned(),
    })
}

/// Re-express every rule of `tree` over the source type of `corr`.
///
/// Targets that resolve to computed values keep validators, hide and
/// disable rules at the first source chain they read; setters need a chain.
pub fn migrate(tree: &RuleTree, corr: &Correspondence) -> RuleResult<RuleTree> {
    check_root(tree, corr)?;
    let source = corr.source().id();
    let out = RuleTree::new(tree.schema().clone(), source)?;
    for attached in tree.rules() {
        let migrated = corr.migrate_expr(&attached.path).and_then(|target| {
            let rule = attached.rule.clone().try_map_exprs(&mut |e| corr.migrate_expr(&e))?;
            if target.is_chain() {
                return Ok((target, rule));
            }
            let rule = match rule {
                Rule::Validator(mut validator) => {
                    if let ValidatorKind::RequiredIf(condition) = validator.kind {
                        let empty = Expr::call(Builtin::IsEmpty, vec![target.clone()]);
                        validator.kind = ValidatorKind::InvalidIf(match condition {
                            Some(condition) => condition.and(empty),
                            None => empty,
                        });
                    }
                    Rule::Validator(validator)
                }
                rule @ (Rule::HideIf { .. } | Rule::DisableIf { .. }) => rule,
                _ => return Err(RuleError::unable_to_migrate(&attached.path)),
            };
            Ok((first_chain(&target, source, &attached.path)?, rule))
        });
        let (path, rule) = migrated.inspect_err(|err| {
            warn!(rule = %attached.id, path = %attached.path, error = %err, "migration failed");
        })?;
        out.attach_as(&path, rule, attached.id)?;
    }
    debug!(
        from = %tree.root(),
        to = %corr.source(),
        rules = out.revision(),
        "migrated rule tree"
    );
    Ok(out)
}

/// Copy of `tree` whose validators report source-type paths.
///
/// Rule logic stays over the destination type. A validator without
/// explicit reported paths reports its own target.
pub fn migrate_paths(tree: &RuleTree, corr: &Correspondence) -> RuleResult<RuleTree> {
    check_root(tree, corr)?;
    let source = corr.source().id();
    let out = RuleTree::new(tree.schema().clone(), tree.root_type())?;
    for attached in tree.rules() {
        let rule = match attached.rule {
            Rule::Validator(mut validator) => {
                let reported = corr
                    .migrate_expr(&attached.path)
                    .and_then(|_| {
                        if validator.reported.is_empty() {
                            let current = corr.migrate_expr(&each_to_current(attached.path.clone()))?;
                            return Ok(vec![first_chain(&current, source, &attached.path)?]);
                        }
                        validator
                            .reported
                            .iter()
                            .map(|r| first_chain(&corr.migrate_expr(r)?, source, r))
                            .collect()
                    })
                    .inspect_err(|err| {
                        warn!(rule = %attached.id, path = %attached.path, error = %err, "path migration failed");
                    })?;
                validator.reported = reported;
                Rule::Validator(validator)
            }
            other => other,
        };
        out.attach_as(&attached.path, rule, attached.id)?;
    }
    debug!(root = %tree.root(), to = %corr.source(), "migrated reported paths");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ValidatorRule;
    use arbor_expression::parse_path;
    use arbor_schema::{ScalarKind, Schema};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    struct Fixture {
        schema: Arc<Schema>,
        src: TypeId,
        dest: TypeId,
        corr: Correspondence,
    }

    impl Fixture {
        fn new() -> Self {
            let mut b = Schema::builder();
            let int = b.scalar(ScalarKind::Int);
            let item = b.object("Item").unwrap();
            b.field(item, "Quantity", int).unwrap();
            let items = b.array_of(item).unwrap();
            let src = b.object("Src").unwrap();
            b.field(src, "Items", items).unwrap();
            b.field(src, "Sum", int).unwrap();
            let line = b.object("Line").unwrap();
            b.field(line, "Qty", int).unwrap();
            let lines = b.array_of(line).unwrap();
            let dest = b.object("Dest").unwrap();
            b.field(dest, "Lines", lines).unwrap();
            b.field(dest, "Total", int).unwrap();
            b.field(dest, "Unmapped", int).unwrap();
            let schema = b.build();

            let tree = RuleTree::new(schema.clone(), dest).unwrap();
            let d = |text| parse_path(&schema, dest, text).unwrap();
            let s = |text| parse_path(&schema, src, text).unwrap();
            tree.attach(&d("Total"), Rule::set(s("Sum"))).unwrap();
            tree.attach(&d("Lines"), Rule::source_array(s("Items")))
                .unwrap();
            tree.attach(&d("Lines.Each().Qty"), Rule::set(s("Items.Current().Quantity")))
                .unwrap();
            let corr = Correspondence::new(Arc::new(tree), src, "default").unwrap();
            Self {
                schema,
                src,
                dest,
                corr,
            }
        }

        fn dest(&self, text: &str) -> Expr {
            parse_path(&self.schema, self.dest, text).unwrap()
        }
    }

    #[rstest]
    #[case("Total", "Src.Sum")]
    #[case("Lines", "Src.Items")]
    #[case("Lines[2]", "Src.Items[2]")]
    #[case("Lines[2].Qty", "Src.Items[2].Quantity")]
    #[case("Lines.Each().Qty", "Src.Items.Each().Quantity")]
    #[case("Lines.Current().Qty", "Src.Items.Current().Quantity")]
    fn test_resolve(#[case] path: &str, #[case] expected: &str) {
        let f = Fixture::new();
        let resolved = f.corr.resolve(&f.dest(path)).unwrap().unwrap();
        assert_eq!(resolved.to_string(), expected);
    }

    #[test]
    fn test_unresolvable_path() {
        let f = Fixture::new();
        assert!(f.corr.resolve(&f.dest("Unmapped")).unwrap().is_none());
    }

    #[test]
    fn test_migrate_moves_validators() {
        let f = Fixture::new();
        let tree = RuleTree::new(f.schema.clone(), f.dest).unwrap();
        let qty = f.dest("Lines.Each().Qty");
        tree.attach(
            &qty,
            Rule::Validator(ValidatorRule::invalid_if(
                f.dest("Lines.Current().Qty").less_than(Expr::literal(0)),
                "negative",
                "Quantity must not be negative",
            )),
        )
        .unwrap();

        let migrated = migrate(&tree, &f.corr).unwrap();
        assert_eq!(migrated.root_type(), f.src);
        let rules = migrated.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].path.to_string(), "Src.Items.Each().Quantity");
        let Rule::Validator(validator) = &rules[0].rule else {
            panic!("expected a validator");
        };
        let ValidatorKind::InvalidIf(condition) = &validator.kind else {
            panic!("expected invalid-if");
        };
        assert_eq!(condition.to_string(), "(Src.Items.Current().Quantity < 0)");
    }

    #[test]
    fn test_migrate_fails_on_unmapped_reads() {
        let f = Fixture::new();
        let tree = RuleTree::new(f.schema.clone(), f.dest).unwrap();
        tree.attach(
            &f.dest("Total"),
            Rule::Validator(ValidatorRule::invalid_if(
                f.dest("Unmapped").greater_than(Expr::literal(0)),
                "code",
                "message",
            )),
        )
        .unwrap();
        let err = migrate(&tree, &f.corr).unwrap_err();
        assert_eq!(err, RuleError::unable_to_migrate("Dest.Unmapped"));
    }

    #[test]
    fn test_migrate_paths_reports_source_paths() {
        let f = Fixture::new();
        let tree = RuleTree::new(f.schema.clone(), f.dest).unwrap();
        tree.attach(
            &f.dest("Lines.Each().Qty"),
            Rule::Validator(ValidatorRule::required("required", "Required")),
        )
        .unwrap();

        let migrated = migrate_paths(&tree, &f.corr).unwrap();
        assert_eq!(migrated.root_type(), f.dest);
        let rules = migrated.rules();
        let Rule::Validator(validator) = &rules[0].rule else {
            panic!("expected a validator");
        };
        let reported: Vec<String> = validator.reported.iter().map(|r| r.to_string()).collect();
        assert_eq!(reported, vec!["Src.Items.Current().Quantity"]);
    }

    #[test]
    fn test_migrate_paths_rejects_unmapped_targets() {
        let f = Fixture::new();
        let tree = RuleTree::new(f.schema.clone(), f.dest).unwrap();
        tree.attach(
            &f.dest("Unmapped"),
            Rule::Validator(ValidatorRule::required("required", "Required")),
        )
        .unwrap();
        assert_eq!(
            migrate_paths(&tree, &f.corr).unwrap_err().code(),
            "RULES:UNABLE_TO_MIGRATE"
        );
    }
}
