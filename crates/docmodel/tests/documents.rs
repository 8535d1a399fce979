use docmodel::prelude::*;
use docmodel::{EnumDef, to_json_string};
use proptest::prelude::*;
use serde_json::json;

fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn registry() -> Registry {
    let registry = Registry::new();
    registry
        .register(
            ModelSchema::new("Invoice")
                .attr("id", FieldKind::Int)
                .attr("number", FieldKind::Str)
                .attr("amount", FieldKind::Decimal)
                .attr("issued_at", TypeHint::nullable(FieldKind::DateTime))
                .attr("due", TypeHint::nullable(FieldKind::Date))
                .attr("paid", FieldKind::Bool)
                .attr(
                    "status",
                    EnumDef::new("Status")
                        .member("Open", "open")
                        .member("Closed", "closed")
                        .into_kind(),
                )
                .attr("lines", FieldKind::list(FieldKind::Int))
                .field(
                    Field::new("city")
                        .kind(TypeHint::nullable(FieldKind::Str))
                        .json_path("billing/address/city")
                        .json_path_separator("/"),
                )
                .field(
                    Field::new("created_by")
                        .kind(FieldKind::Str)
                        .read_only(true),
                ),
        )
        .unwrap();
    registry
}

#[test]
fn round_trip_reproduces_field_values() {
    let registry = registry();
    let mut original = registry.new_instance("Invoice").unwrap();
    original.set("id", 7).unwrap();
    original.set("number", "INV-7").unwrap();
    original.set("amount", "12.50").unwrap();
    original.set("issued_at", "2024-03-01T10:00:00+02:00").unwrap();
    original.set("due", "2024-04-01").unwrap();
    original.set("paid", "yes").unwrap();
    original.set("status", "closed").unwrap();
    original.set("lines", Value::List(vec![Value::from("1"), Value::from(2)])).unwrap();
    original.set("city", "Oslo").unwrap();
    original.set("created_by", "system").unwrap();

    let exported = original.to_document(false).unwrap().unwrap();
    assert!(!exported.contains_key("created_by"));
    assert_eq!(exported.get("amount"), Some(&json!("12.50")));
    assert_eq!(exported.get("issued_at"), Some(&json!("2024-03-01T08:00:00+00:00")));
    assert_eq!(exported.get("status"), Some(&json!("closed")));
    assert_eq!(exported.get("billing"), Some(&json!({"address": {"city": "Oslo"}})));

    let mut copy = registry.new_instance_from_document("Invoice", &exported).unwrap();
    for name in ["id", "number", "amount", "issued_at", "due", "paid", "status", "lines", "city"] {
        assert_eq!(
            copy.get(name).unwrap(),
            original.get(name).unwrap(),
            "field {name}"
        );
    }
    assert_eq!(copy.get("created_by").unwrap(), None);
}

#[test]
fn unchanged_import_has_no_changes() {
    let registry = registry();
    let mut invoice = registry
        .new_instance_from_document(
            "Invoice",
            &doc(json!({
                "id": "7",
                "number": "INV-7",
                "amount": "1.03",
                "issued_at": "2024-03-01T08:00:00+00:00",
                "status": "open",
                "billing": {"address": {"city": null}},
            })),
        )
        .unwrap();
    assert_eq!(invoice.to_document(true).unwrap(), None);
    assert_eq!(to_json_string(&mut invoice, true).unwrap(), None);

    let full = invoice.to_document(false).unwrap().unwrap();
    assert_eq!(full.get("amount"), Some(&json!("1.03")));
    assert_eq!(full.get("issued_at"), Some(&json!("2024-03-01T08:00:00+00:00")));
    assert_eq!(full.get("billing"), Some(&json!({"address": {"city": null}})));

    invoice.set("city", "Bergen").unwrap();
    assert_eq!(
        to_json_string(&mut invoice, true).unwrap().as_deref(),
        Some(r#"{"billing":{"address":{"city":"Bergen"}}}"#)
    );
}

#[test]
fn timestamps_are_exported_in_utc() {
    let registry = registry();
    let mut invoice = registry
        .new_instance_from_document("Invoice", &doc(json!({"issued_at": "2024-03-01T08:00:00Z"})))
        .unwrap();
    let full = invoice.to_document(false).unwrap().unwrap();
    assert_eq!(full.get("issued_at"), Some(&json!("2024-03-01T08:00:00+00:00")));

    invoice
        .from_document(&doc(json!({"issued_at": "2024-03-01T09:30:00-01:00"})))
        .unwrap();
    let full = invoice.to_document(false).unwrap().unwrap();
    assert_eq!(full.get("issued_at"), Some(&json!("2024-03-01T10:30:00+00:00")));
}

#[test]
fn nullable_and_non_nullable_writes() {
    let registry = registry();
    let mut invoice = registry.new_instance("Invoice").unwrap();
    invoice.set("due", "").unwrap();
    assert_eq!(invoice.get("due").unwrap(), Some(Value::Null));

    let err = invoice.set("number", Value::Null).unwrap_err();
    assert!(err.is_type_error());

    let exported = invoice.to_document(false).unwrap().unwrap();
    assert_eq!(exported.get("due"), Some(&serde_json::Value::Null));
}

#[test]
fn defaults_are_converted_and_fresh() {
    let registry = Registry::new();
    registry
        .register(
            ModelSchema::new("Defaults")
                .attr_with_default("code", FieldKind::Str, 2)
                .field(
                    Field::new("items")
                        .kind(FieldKind::list(FieldKind::Str))
                        .default_factory(|| Value::List(Vec::new())),
                ),
        )
        .unwrap();

    let mut a = registry.new_instance("Defaults").unwrap();
    let mut b = registry.new_instance("Defaults").unwrap();
    assert_eq!(a.get("code").unwrap(), Some(Value::from("2")));

    let mut items = a.get("items").unwrap().unwrap();
    if let Value::List(list) = &mut items {
        list.push(Value::from("x"));
    }
    a.set("items", items).unwrap();
    assert_eq!(b.get("items").unwrap(), Some(Value::List(Vec::new())));
    assert_eq!(a.get("items").unwrap(), Some(Value::List(vec![Value::from("x")])));
}

#[test]
fn inherited_fields_export_in_declaration_order() {
    let registry = Registry::new();
    registry
        .register(
            ModelSchema::new("Base")
                .attr("id", FieldKind::Int)
                .field(Field::new("name").kind(FieldKind::Str).default_value("base")),
        )
        .unwrap();
    registry
        .register(
            ModelSchema::new("Derived")
                .extends("Base")
                .field(Field::new("name").read_only(true))
                .attr("extra", FieldKind::Int),
        )
        .unwrap();

    let structure = registry.structure("Derived").unwrap();
    let names: Vec<_> = structure.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["id", "name", "extra"]);

    let name = structure.field("name").unwrap();
    assert!(name.read_only);
    assert_eq!(name.type_hint, FieldKind::Str);

    let mut derived = registry.new_instance("Derived").unwrap();
    assert_eq!(derived.get("name").unwrap(), Some(Value::from("base")));
    derived.set("extra", 1).unwrap();
    let exported = derived.to_document(false).unwrap().unwrap();
    assert_eq!(serde_json::Value::Object(exported), json!({"extra": 1}));
}

#[test]
fn unknown_model_and_attribute_errors() {
    let registry = registry();
    assert!(registry.new_instance("Missing").is_err());
    let mut invoice = registry.new_instance("Invoice").unwrap();
    assert!(invoice.get("nope").is_err());
    assert!(invoice.set("nope", 1).is_err());
}

proptest! {
    #[test]
    fn decimal_text_survives_round_trip(units in 0i64..1_000_000, scale in 0u32..6) {
        let registry = registry();
        let text = rust_decimal_text(units, scale);
        let mut invoice = registry
            .new_instance_from_document("Invoice", &doc(json!({"amount": text.clone()})))
            .unwrap();
        let exported = invoice.to_document(false).unwrap().unwrap();
        prop_assert_eq!(exported.get("amount"), Some(&json!(text)));
        prop_assert_eq!(invoice.to_document(true).unwrap(), None);
    }

    #[test]
    fn integer_ids_compare_equal_across_types(id in any::<i32>()) {
        let registry = registry();
        let mut invoice = registry
            .new_instance_from_document("Invoice", &doc(json!({"id": id.to_string()})))
            .unwrap();
        prop_assert_eq!(invoice.to_document(true).unwrap(), None);
    }
}

/// `units` scaled down by `scale` decimal places, written out in full.
fn rust_decimal_text(units: i64, scale: u32) -> String {
    if scale == 0 {
        return units.to_string();
    }
    let digits = format!("{:0width$}", units, width = scale as usize + 1);
    let (whole, frac) = digits.split_at(digits.len() - scale as usize);
    format!("{whole}.{frac}")
}
