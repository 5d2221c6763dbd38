//! Tests for the schema diff engine

use pretty_assertions::assert_eq;
use rstest::*;

use pgcmp::schema::diff::{compare, summarize, Change, DiffEntry, FieldDelta};
use pgcmp::schema::types::{
    Column, Constraint, ConstraintKind, Function, Index, Namespace, ObjectKind, QualifiedName,
    RoutineKind, SchemaModel, Sequence, Table, Trigger, View, Volatility,
};

fn function(name: &str, signature: &str, body: &str) -> Function {
    Function {
        name: QualifiedName::with_signature("public", name, signature),
        arguments: signature.to_string(),
        return_type: "integer".to_string(),
        body: body.to_string(),
        language: "sql".to_string(),
        volatility: Volatility::Immutable,
        strict: false,
        security_definer: false,
        kind: RoutineKind::Function,
    }
}

#[fixture]
fn shop() -> SchemaModel {
    let mut model = SchemaModel::new(16);
    model.add_namespace(Namespace::new("public"));

    let mut users = Table::new("public", "users");
    users.add_column(Column::new("id", "integer").nullable(false).position(1));
    users.add_column(Column::new("name", "text").position(2));
    users.add_column(Column::new("email", "character varying(255)").position(3));
    model.add_table(users);

    let orders = Table::new("public", "orders")
        .with_column("id", "integer")
        .with_column("user_id", "integer")
        .with_column("total", "numeric(10,2)");
    model.add_table(orders);

    model.add_view(View {
        name: QualifiedName::new("public", "active_users"),
        definition: "SELECT id, name FROM users WHERE name IS NOT NULL".to_string(),
    });

    model.add_index(Index {
        name: QualifiedName::new("public", "users_email_idx"),
        table: "users".to_string(),
        keys: vec!["lower(email)".to_string()],
        include: Vec::new(),
        unique: true,
        primary: false,
        method: "btree".to_string(),
        predicate: None,
    });

    model.add_constraint(Constraint {
        name: QualifiedName::in_table("public", "orders", "orders_user_id_fkey"),
        kind: ConstraintKind::ForeignKey,
        definition: "FOREIGN KEY (user_id) REFERENCES users(id)".to_string(),
        referenced_table: Some("public.users".to_string()),
    });

    model.add_trigger(Trigger::from_tgtype(
        QualifiedName::in_table("public", "orders", "orders_touch"),
        1 | 2 | 16,
        "public.touch".to_string(),
    ));

    model.add_function(function("add", "integer, integer", "SELECT $1 + $2"));

    model.add_sequence(Sequence {
        name: QualifiedName::new("public", "order_number_seq"),
        data_type: "bigint".to_string(),
        start: 1,
        min: 1,
        max: i64::MAX,
        increment: 1,
        cycle: false,
    });

    model.sort();
    model
}

fn table_mut<'a>(model: &'a mut SchemaModel, name: &str) -> &'a mut Table {
    model
        .tables
        .iter_mut()
        .find(|t| t.name.name == name)
        .expect("table in fixture")
}

#[rstest]
fn test_identical_models_have_no_differences(shop: SchemaModel) {
    let result = compare(&shop, &shop.clone());
    assert!(result.is_empty());
    assert_eq!(result.counts().len(), 0);
}

#[rstest]
fn test_missing_column_on_right(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    table_mut(&mut right, "users").columns.retain(|c| c.name != "name");

    let result = compare(&left, &right);

    assert_eq!(
        result.entries(),
        &[DiffEntry::new(
            ObjectKind::Table,
            QualifiedName::new("public", "users"),
            Change::Changed {
                deltas: vec![FieldDelta::new("column name", Some("text".into()), None)],
            },
        )]
    );
}

#[rstest]
fn test_missing_table_on_right_is_removed(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.tables.retain(|t| t.name.name != "orders");

    let result = compare(&left, &right);

    assert_eq!(result.len(), 1);
    let entry = &result.entries()[0];
    assert_eq!(entry.kind, ObjectKind::Table);
    assert_eq!(entry.identity.to_string(), "public.orders");
    assert_eq!(entry.change, Change::Removed);
}

#[rstest]
fn test_extra_view_on_right_is_added(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.add_view(View {
        name: QualifiedName::new("public", "big_orders"),
        definition: "SELECT * FROM orders WHERE total > 100".to_string(),
    });

    let result = compare(&left, &right);

    assert_eq!(result.len(), 1);
    assert_eq!(result.entries()[0].change, Change::Added);
    assert_eq!(result.entries()[0].kind, ObjectKind::View);
}

#[rstest]
fn test_column_reorder_is_a_table_change(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    {
        let users = table_mut(&mut right, "users");
        users.columns[1].position = 3;
        users.columns[2].position = 2;
        users.columns.sort_by_key(|c| c.position);
    }

    let result = compare(&left, &right);

    assert_eq!(result.len(), 1);
    let entry = &result.entries()[0];
    assert_eq!(entry.kind, ObjectKind::Table);
    assert_eq!(
        entry.deltas(),
        &[
            FieldDelta::new("column email.position", Some("3".into()), Some("2".into())),
            FieldDelta::new("column name.position", Some("2".into()), Some("3".into())),
        ]
    );
}

#[rstest]
fn test_dropped_middle_column_does_not_report_positions(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    {
        let users = table_mut(&mut right, "users");
        users.columns.remove(1);
        users.columns[1].position = 2;
    }

    let result = compare(&left, &right);

    assert_eq!(result.len(), 1);
    let fields: Vec<&str> = result.entries()[0]
        .deltas()
        .iter()
        .map(|d| d.field.as_str())
        .collect();
    assert_eq!(fields, vec!["column name"]);
}

#[rstest]
fn test_column_attribute_changes(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    {
        let users = table_mut(&mut right, "users");
        users.columns[0].data_type = "bigint".to_string();
        users.columns[2].nullable = false;
        users.columns[2].default = Some("''".to_string());
    }

    let result = compare(&left, &right);
    let deltas = result.entries()[0].deltas();

    assert_eq!(
        deltas,
        &[
            FieldDelta::new("column email.nullable", Some("true".into()), Some("false".into())),
            FieldDelta::new("column email.default", None, Some("''".into())),
            FieldDelta::new("column id.type", Some("integer".into()), Some("bigint".into())),
        ]
    );
}

#[rstest]
fn test_overloads_are_distinct_identities(shop: SchemaModel) {
    let mut left = shop.clone();
    left.add_function(function("add", "numeric, numeric", "SELECT $1 + $2"));
    let mut right = shop;
    right.add_function(function("add", "bigint, bigint", "SELECT $1 + $2"));

    let result = compare(&left, &right);

    let changes: Vec<(String, &Change)> = result
        .entries()
        .iter()
        .map(|e| (e.identity.to_string(), &e.change))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("public.add(bigint, bigint)".to_string(), &Change::Added),
            ("public.add(numeric, numeric)".to_string(), &Change::Removed),
        ]
    );
}

#[rstest]
fn test_index_keys_compare_by_position(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.indexes[0].keys.push("id".to_string());
    right.indexes[0].predicate = Some("email IS NOT NULL".to_string());

    let result = compare(&left, &right);

    assert_eq!(
        result.entries()[0].deltas(),
        &[
            FieldDelta::new("key[1]", None, Some("id".into())),
            FieldDelta::new("predicate", None, Some("email IS NOT NULL".into())),
        ]
    );
}

#[rstest]
fn test_trigger_event_change(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.triggers[0] = Trigger::from_tgtype(
        QualifiedName::in_table("public", "orders", "orders_touch"),
        1 | 2 | 4 | 16,
        "public.touch".to_string(),
    );

    let result = compare(&left, &right);

    assert_eq!(
        result.entries()[0].deltas(),
        &[FieldDelta::new("events", Some("UPDATE".into()), Some("INSERT OR UPDATE".into()))]
    );
}

#[rstest]
fn test_entries_are_ordered_by_kind_then_identity(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.functions.clear();
    right.views.clear();
    right.tables.retain(|t| t.name.name != "users");
    right.add_namespace(Namespace::new("billing"));
    right.sequences[0].increment = 10;

    let result = compare(&left, &right);

    let order: Vec<(ObjectKind, String)> = result
        .entries()
        .iter()
        .map(|e| (e.kind, e.identity.to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            (ObjectKind::Schema, "billing".to_string()),
            (ObjectKind::Table, "public.users".to_string()),
            (ObjectKind::View, "public.active_users".to_string()),
            (ObjectKind::Function, "public.add(integer, integer)".to_string()),
            (ObjectKind::Sequence, "public.order_number_seq".to_string()),
        ]
    );
}

#[rstest]
fn test_comparison_is_symmetric(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    {
        let users = table_mut(&mut right, "users");
        users.columns.swap(1, 2);
        users.columns[1].position = 2;
        users.columns[2].position = 3;
        users.columns[0].nullable = true;
        users.add_column(Column::new("created_at", "timestamp with time zone").position(4));
    }
    right.views[0].definition = "SELECT id FROM users".to_string();
    right.constraints.clear();
    right.add_function(function("mul", "integer, integer", "SELECT $1 * $2"));

    let forward = compare(&left, &right);
    let backward = compare(&right, &left);

    assert!(!forward.is_empty());
    assert_eq!(forward.len(), backward.len());
    for (f, b) in forward.entries().iter().zip(backward.entries()) {
        assert_eq!(f.kind, b.kind);
        assert_eq!(f.identity, b.identity);
        assert_eq!(f.change.mirrored(), b.change);
    }
}

#[rstest]
fn test_comparison_is_deterministic(shop: SchemaModel) {
    let left = shop.clone();
    let mut right = shop;
    right.tables.reverse();
    right.indexes.clear();
    table_mut(&mut right, "orders").columns.pop();

    let first = serde_json::to_string(&compare(&left, &right)).unwrap();
    let second = serde_json::to_string(&compare(&left, &right)).unwrap();
    assert_eq!(first, second);
}

#[rstest]
fn test_summary_counts_objects_per_kind(shop: SchemaModel) {
    let mut right = shop.clone();
    right.tables.pop();

    let summary = summarize(&shop, &right);

    let tables = summary.iter().find(|r| r.kind == ObjectKind::Table).unwrap();
    assert_eq!((tables.left_count, tables.right_count), (2, 1));
    assert!(tables.is_different());

    let columns = summary.iter().find(|r| r.kind == ObjectKind::Column).unwrap();
    assert_eq!(columns.left_count, 6);

    let views = summary.iter().find(|r| r.kind == ObjectKind::View).unwrap();
    assert!(!views.is_different());
}
