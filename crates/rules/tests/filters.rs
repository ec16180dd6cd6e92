//! Integration tests for rules attached through filtered nested arrays.

use std::sync::Arc;

use arbor_expression::Expr;
use arbor_rules::{Rule, RuleEngine, ValidatorRule};
use arbor_schema::{FieldRef, ScalarKind, Schema, TypeId};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

struct Shop {
    engine: RuleEngine,
    shop: TypeId,
    line: TypeId,
    qty: FieldRef,
}

/// `Shop{Orders: [Order{Lines: [Line{Qty, Flag}]}]}`.
fn shop() -> Shop {
    let mut b = Schema::builder();
    let int = b.scalar(ScalarKind::Int);
    let line = b.object("Line").unwrap();
    b.field(line, "Qty", int).unwrap();
    b.field(line, "Flag", int).unwrap();
    let lines = b.array_of(line).unwrap();
    let order = b.object("Order").unwrap();
    b.field(order, "Lines", lines).unwrap();
    let orders = b.array_of(order).unwrap();
    let shop = b.object("Shop").unwrap();
    b.field(shop, "Orders", orders).unwrap();
    let schema: Arc<Schema> = b.build();
    let qty = schema.field(line, "Qty").unwrap();

    Shop {
        engine: RuleEngine::new(schema),
        shop,
        line,
        qty,
    }
}

impl Shop {
    /// `Orders.Each().Lines.Where(l => l.Qty > 10).Each().<field>`
    fn large_lines(&self, field: &str) -> Expr {
        let field = self.engine.schema().field(self.line, field).unwrap();
        let qty = self.qty.clone();
        self.engine
            .path(self.shop, "Orders.Each().Lines")
            .unwrap()
            .filter(self.line, |l| l.member(qty).greater_than(Expr::literal(10)))
            .each()
            .member(field)
    }
}

fn instance() -> Value {
    json!({
        "Orders": [
            { "Lines": [{ "Qty": 1, "Flag": 0 }, { "Qty": 20, "Flag": 0 }] },
            { "Lines": [{ "Qty": 30, "Flag": 0 }] },
        ]
    })
}

#[test]
fn nested_filtered_validator_checks_matching_elements() {
    let s = shop();
    let e = &s.engine;
    let tree = e
        .configure(s.shop, |tree| {
            tree.attach(
                &s.large_lines("Qty"),
                Rule::Validator(ValidatorRule::invalid_if(
                    Expr::literal(true),
                    "large",
                    "Quantity is large",
                )),
            )?;
            Ok(())
        })
        .unwrap();
    let root = e.root_path(s.shop).unwrap();

    let results = e.validator(&tree, &root).unwrap().validate(&instance()).unwrap();
    let mut paths: Vec<String> = results
        .sorted()
        .into_iter()
        .flat_map(|r| r.paths.clone())
        .collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "Orders[0].Lines[1].Qty".to_owned(),
            "Orders[1].Lines[0].Qty".to_owned(),
        ]
    );
    assert!(!e.static_validator(&tree, &root).unwrap().is_valid(&instance()).unwrap());
}

#[test]
fn nested_filtered_setter_writes_matching_elements() {
    let s = shop();
    let e = &s.engine;
    let qty = e.path(s.shop, "Orders.Current().Lines.Current().Qty").unwrap();
    let tree = e
        .configure(s.shop, |tree| {
            tree.attach(&s.large_lines("Flag"), Rule::set(qty * Expr::literal(2)))?;
            Ok(())
        })
        .unwrap();

    let mut value = instance();
    e.tree_mutator(&tree, &e.root_path(s.shop).unwrap())
        .unwrap()
        .mutate(&mut value)
        .unwrap();
    assert_eq!(
        value,
        json!({
            "Orders": [
                { "Lines": [{ "Qty": 1, "Flag": 0 }, { "Qty": 20, "Flag": 40 }] },
                { "Lines": [{ "Qty": 30, "Flag": 60 }] },
            ]
        })
    );
}
