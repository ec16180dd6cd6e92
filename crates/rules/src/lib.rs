#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # arbor-rules
//!
//! Path-indexed rule trees over nested object graphs.
//!
//! Rules are declared against accessor paths such as
//! `Order.Lines.Each().Amount` and stored in a [`RuleTree`] keyed by the
//! structure of those paths. On first request the rules below a target path
//! are assembled into one procedure that walks an instance and applies them
//! in dependency order:
//!
//! - [`TreeMutator`]: setters, aggregates, nullify and hide rules, with
//!   arrays resized to their source arrays
//! - [`TreeValidator`]: validators, collected into a capped
//!   [`ValidationResultTree`](arbor_validator::ValidationResultTree)
//! - [`StaticValidator`]: pass or fail
//! - [`Converter`]: the mutator of a [`Correspondence`] between two types
//!
//! Rule trees written against one type can be re-expressed over another
//! through a correspondence ([`migrate()`], [`migrate_paths`]). Procedures are
//! compiled through a shape-keyed artifact cache, so procedures differing
//! only in constants share one compiled body.
//!
//! ## Quick Start
//!
//! ```
//! use arbor_expression::Expr;
//! use arbor_rules::{Rule, RuleEngine, ValidatorRule};
//! use arbor_schema::{ScalarKind, Schema};
//! use serde_json::json;
//!
//! let mut b = Schema::builder();
//! let int = b.scalar(ScalarKind::Int);
//! let order = b.object("Order").unwrap();
//! b.field(order, "Qty", int).unwrap();
//! b.field(order, "Price", int).unwrap();
//! b.field(order, "Total", int).unwrap();
//! let engine = RuleEngine::new(b.build());
//!
//! let qty = engine.path(order, "Qty").unwrap();
//! let price = engine.path(order, "Price").unwrap();
//! let total = engine.path(order, "Total").unwrap();
//! let tree = engine
//!     .configure(order, |tree| {
//!         tree.attach(&total, Rule::set(qty.clone() * price))?;
//!         tree.attach(
//!             &qty,
//!             Rule::Validator(ValidatorRule::invalid_if(
//!                 qty.clone().less_than(Expr::literal(1)),
//!                 "min",
//!                 "Quantity must be positive",
//!             )),
//!         )?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let root = engine.root_path(order).unwrap();
//! let mut value = json!({ "Qty": 3, "Price": 4, "Total": 0 });
//! engine.tree_mutator(&tree, &root).unwrap().mutate(&mut value).unwrap();
//! assert_eq!(value["Total"], json!(12));
//!
//! let results = engine.validator(&tree, &root).unwrap().validate(&json!({ "Qty": 0 })).unwrap();
//! assert_eq!(results.len(), 1);
//! ```

pub mod alias;
pub mod assemble;
pub mod canonical;
pub mod config;
pub mod edge;
pub mod engine;
pub mod error;
pub mod handles;
pub mod migrate;
pub mod recording;
mod registry;
pub mod rule;
pub mod tree;

pub use alias::Aliases;
pub use assemble::{Assembled, Mode, assemble};
pub use canonical::NodeRules;
pub use config::EngineConfig;
pub use edge::Edge;
pub use engine::{RuleEngine, RuleEngineBuilder};
pub use error::{RuleError, RuleResult};
pub use handles::{Converter, StaticValidator, TreeMutator, TreeValidator};
pub use migrate::{Correspondence, migrate, migrate_paths};
pub use recording::RecordingContext;
pub use rule::{AttachedRule, Rule, RuleId, ValidatorKind, ValidatorRule};
pub use tree::{Arena, Node, NodeId, RuleTree, TreeId};
