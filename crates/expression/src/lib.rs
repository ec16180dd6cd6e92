#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # arbor-expression
//!
//! The expression layer under arbor rule trees:
//!
//! - [`ast`]: path and value expressions, plus the statements and procedures
//!   the rule assembler emits
//! - [`path`]: accessor-chain decomposition, the schema-checked
//!   [`PathBuilder`] and the textual [`parse_path`]
//! - [`equivalence`]: structural equivalence and consistent hashing
//! - [`rewrite`]: top-down rewriting, alias and parameter substitution
//! - [`canonical`]: closure extraction and renumbering
//! - [`eval`]: the procedure interpreter
//! - [`compile`] and [`cache`]: compile backends and the shape-keyed
//!   artifact cache
//!
//! ## Quick Start
//!
//! ```
//! use arbor_expression::{ArtifactCache, Expr, Inputs, Procedure, Stmt, parse_path};
//! use arbor_schema::{ScalarKind, Schema};
//! use serde_json::json;
//!
//! let mut b = Schema::builder();
//! let int = b.scalar(ScalarKind::Int);
//! let root = b.object("Root").unwrap();
//! b.field(root, "A", int).unwrap();
//! b.field(root, "B", int).unwrap();
//! let schema = b.build();
//!
//! let procedure = Procedure::new(
//!     schema.type_ref(root).unwrap(),
//!     vec![Stmt::Assign {
//!         target: parse_path(&schema, root, "B").unwrap(),
//!         value: parse_path(&schema, root, "A").unwrap() + Expr::literal(4),
//!     }],
//! );
//!
//! let cache = ArtifactCache::default();
//! let callable = cache.get(procedure).unwrap();
//!
//! let mut value = json!({ "A": 3, "B": 0 });
//! let mut frame = callable.frame(Inputs::new()).with_target(root, &mut value);
//! callable.run(&mut frame).unwrap();
//! drop(frame);
//! assert_eq!(value, json!({ "A": 3, "B": 7 }));
//! ```

pub mod ast;
pub mod cache;
pub mod canonical;
pub mod compile;
pub mod equivalence;
pub mod error;
pub mod eval;
pub mod format;
pub mod path;
pub mod rewrite;
pub mod value;

pub use ast::{
    BinaryOp, Builtin, Check, Expr, ExternFn, Function, Lambda, LoopId, ParamId, Procedure,
    Severity, Stmt, UnaryOp,
};
pub use cache::{ArtifactCache, CacheConfig, CacheStats};
pub use canonical::{CanonicalForm, Closure, ClosureValue, canonical_expr, canonical_procedure};
pub use compile::{Callable, CompileBackend, CompiledBody, Interpreter};
pub use equivalence::{Equivalence, EquivalenceKey};
pub use error::{ExpressionError, ExpressionResult};
pub use eval::{CheckReport, CheckSink, FirstFailure, Frame, Inputs, MarkRecorder};
pub use format::{ConcretePath, DefaultPathFormatter, PathFormatter, Segment};
pub use path::{Chain, PathBuilder, Shard, chain_type, parse_path};
