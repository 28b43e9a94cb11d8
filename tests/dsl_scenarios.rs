//! End-to-end keyword DSL scenarios
//!
//! Each test declares a grammar on a fresh runtime and drives invocations
//! through a [`NativeHost`] whose bodies are Rust closures.

use pretty_assertions::assert_eq;

use keyword_dsl::value::FieldMap;
use keyword_dsl::{
    HostError, InvocationRequest, InvocationSite, KeywordConfig, KeywordError, KeywordEvent,
    KeywordRuntime, NativeHost, Record, ScriptBlock, Value,
};

const PIPELINE: &str = r#"
Stage [Name] {
    Int Retries
    Int Timeout
    [String] [Owner]
}
"#;

const FLOW: &str = r#"
Step {
    Item [Name] {
        Detail { String Text }
    }
}
"#;

fn map(entries: &[(&str, Value)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<FieldMap>(),
    )
}

fn flow_host() -> NativeHost {
    NativeHost::new()
        .with_body("two-items", |_, invoker| {
            let mut out = invoker.invoke(
                InvocationRequest::new("Item", ScriptBlock::new("")).named("a"),
            )?;
            out.extend(invoker.invoke(
                InvocationRequest::new("Item", ScriptBlock::new("")).named("b"),
            )?);
            Ok(out)
        })
        .with_body("explode", |_, _| Err(HostError::failed("body failed")))
        .with_body("reach-grandchild", |_, invoker| {
            Ok(invoker.invoke(InvocationRequest::new(
                "Detail",
                map(&[("Text", Value::from("x"))]),
            ))?)
        })
}

fn record(values: Vec<Value>) -> Record {
    assert_eq!(values.len(), 1, "expected a single record, got {:?}", values);
    match values.into_iter().next() {
        Some(Value::Record(record)) => record,
        other => panic!("Expected record, got {:?}", other),
    }
}

// =============================================================================
// MAP BODIES
// =============================================================================

#[test]
fn test_map_body_produces_record() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    let out = runtime
        .invoke(
            InvocationRequest::new(
                "Stage",
                map(&[("Retries", Value::Int(3)), ("Timeout", Value::Int(60))]),
            )
            .named("build"),
        )
        .unwrap();
    let record = record(out);

    assert_eq!(
        record.keys().collect::<Vec<_>>(),
        vec!["Name", "Retries", "Timeout", "ProducedByKeyword"]
    );
    assert_eq!(record.get("Name"), Some(&Value::from("build")));
    assert_eq!(record.get("Retries"), Some(&Value::Int(3)));
    assert_eq!(record.get("Timeout"), Some(&Value::Int(60)));
    assert_eq!(record.get("ProducedByKeyword"), Some(&Value::from("Stage")));
    assert_eq!(
        record.type_name(),
        Some("KeywordDsl.DslAutomaticOutput#Stage")
    );
}

#[test]
fn test_map_body_defaults_name_to_keyword() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    let out = runtime
        .invoke(InvocationRequest::new(
            "stage",
            map(&[("Retries", Value::Int(1)), ("Timeout", Value::Int(2))]),
        ))
        .unwrap();
    assert_eq!(record(out).get("Name"), Some(&Value::from("Stage")));
}

#[test]
fn test_map_body_rejects_missing_and_unknown_properties() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    let missing = runtime.invoke(InvocationRequest::new(
        "Stage",
        map(&[("Retries", Value::Int(1))]),
    ));
    assert!(matches!(missing, Err(KeywordError::InvalidArgument { .. })));

    let unknown = runtime.invoke(InvocationRequest::new(
        "Stage",
        map(&[
            ("Retries", Value::Int(1)),
            ("Timeout", Value::Int(2)),
            ("Colour", Value::from("red")),
        ]),
    ));
    assert!(matches!(unknown, Err(KeywordError::InvalidArgument { .. })));
}

#[test]
fn test_reserved_property_names_rejected_at_declaration() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    let err = runtime
        .declare_dsl("Inventory", "Host { String Name; Int Port }", None)
        .unwrap_err();
    match err {
        KeywordError::Syntax(syntax) => {
            assert!(syntax.message.contains("'Name' is reserved"));
            assert_eq!(syntax.node, "String Name");
        }
        other => panic!("Expected syntax error, got {:?}", other),
    }
    assert!(runtime.registry().unwrap().dsl_keywords("Inventory").is_empty());
}

#[test]
fn test_renamed_output_field_frees_property_name() {
    let mut config = KeywordConfig::default();
    config.output.name_field = "Title".to_string();
    let runtime = KeywordRuntime::with_config(NativeHost::new(), config);
    runtime
        .declare_dsl("Inventory", "Host { String Name; Int Port }", None)
        .unwrap();

    let out = runtime
        .invoke(InvocationRequest::new(
            "Host",
            map(&[("Name", Value::from("web01")), ("Port", Value::Int(80))]),
        ))
        .unwrap();
    let host = record(out);
    assert_eq!(
        host.keys().collect::<Vec<_>>(),
        vec!["Title", "Name", "Port", "ProducedByKeyword"]
    );
    assert_eq!(host.get("Title"), Some(&Value::from("Host")));
    assert_eq!(host.get("Name"), Some(&Value::from("web01")));
}

#[test]
fn test_body_kind_mismatch() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    let script = runtime.invoke(InvocationRequest::new("Stage", ScriptBlock::new("")));
    assert!(matches!(script, Err(KeywordError::UnsupportedBody { .. })));

    let scalar = runtime.invoke(InvocationRequest::new("Stage", Value::Int(4)));
    assert!(matches!(scalar, Err(KeywordError::UnsupportedBody { .. })));
}

// =============================================================================
// EXECUTABLE BODIES AND SCOPES
// =============================================================================

#[test]
fn test_nested_items_are_keyed_by_name() {
    let runtime = KeywordRuntime::new(flow_host());
    runtime.declare_dsl("Flow", FLOW, None).unwrap();

    let out = runtime
        .invoke(InvocationRequest::new("Step", ScriptBlock::new("two-items")))
        .unwrap();
    let step = record(out);

    assert_eq!(
        step.keys().collect::<Vec<_>>(),
        vec!["Name", "a", "b", "ProducedByKeyword"]
    );
    let item = step.get("a").and_then(Value::as_record).unwrap();
    assert_eq!(item.get("ProducedByKeyword"), Some(&Value::from("Step/Item")));
    assert_eq!(step.get("ProducedByKeyword"), Some(&Value::from("Step")));

    let registry = runtime.registry().unwrap();
    assert_eq!(registry.scope_depth(), 0);
}

#[test]
fn test_children_only_visible_inside_parent() {
    let runtime = KeywordRuntime::new(flow_host());
    runtime.declare_dsl("Flow", FLOW, None).unwrap();

    let outside = runtime.invoke(InvocationRequest::new("Item", ScriptBlock::new("")));
    assert!(matches!(outside, Err(KeywordError::NotFound { .. })));
}

#[test]
fn test_grandchild_not_visible_from_parent_body() {
    let runtime = KeywordRuntime::new(flow_host());
    runtime.declare_dsl("Flow", FLOW, None).unwrap();

    let err = runtime
        .invoke(InvocationRequest::new("Step", ScriptBlock::new("reach-grandchild")))
        .unwrap_err();
    assert!(matches!(err, KeywordError::NotFound { ref name } if name == "Detail"));
    assert_eq!(runtime.registry().unwrap().scope_depth(), 0);
}

#[test]
fn test_scope_released_when_body_fails() {
    let runtime = KeywordRuntime::new(flow_host());
    runtime.declare_dsl("Flow", FLOW, None).unwrap();
    let before = runtime.registry().unwrap().visibility_snapshot();

    let err = runtime
        .invoke(InvocationRequest::new("Step", ScriptBlock::new("explode")))
        .unwrap_err();
    assert!(matches!(err, KeywordError::Host(HostError::Failed(_))));

    let registry = runtime.registry().unwrap();
    assert_eq!(registry.scope_depth(), 0);
    assert_eq!(registry.visibility_snapshot(), before);
}

#[test]
fn test_name_modes() {
    let runtime = KeywordRuntime::new(flow_host());
    runtime
        .declare_dsl("Named", "Target Name { Int Port }\nPlain { Int Port }", None)
        .unwrap();

    let unnamed = runtime.invoke(InvocationRequest::new(
        "Target",
        map(&[("Port", Value::Int(80))]),
    ));
    assert!(matches!(unnamed, Err(KeywordError::InvalidArgument { .. })));

    let named = runtime.invoke(
        InvocationRequest::new("Plain", map(&[("Port", Value::Int(80))])).named("web"),
    );
    assert!(matches!(named, Err(KeywordError::InvalidArgument { .. })));
}

// =============================================================================
// DISPATCH GUARDS
// =============================================================================

#[test]
fn test_direct_dispatcher_call_rejected() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();
    let body = map(&[("Retries", Value::Int(1)), ("Timeout", Value::Int(2))]);

    for alias in ["Invoke-Keyword", "KeywordDsl\\invoke-keyword"] {
        let err = runtime
            .invoke(InvocationRequest::new("Stage", body.clone()).invoked_as(alias))
            .unwrap_err();
        assert!(matches!(err, KeywordError::InvalidOperation { .. }), "{}", alias);
    }

    let via_other_module = runtime
        .invoke(InvocationRequest::new("Stage", body).invoked_as("Other\\Invoke-Keyword"));
    assert!(via_other_module.is_ok());
}

#[test]
fn test_pipeline_input_rejected() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    let err = runtime
        .invoke(
            InvocationRequest::new(
                "Stage",
                map(&[("Retries", Value::Int(1)), ("Timeout", Value::Int(2))]),
            )
            .at(InvocationSite::parse("build.ps1::3::1::Stage @{...}"))
            .with_pipeline_input(),
        )
        .unwrap_err();
    assert!(matches!(err, KeywordError::InvalidOperation { .. }));
}

// =============================================================================
// EVENTS
// =============================================================================

#[test]
fn test_event_hooks_wrap_record() {
    let host = NativeHost::new()
        .with_body("announce", |args, _| {
            let name = args.get("Name").and_then(Value::as_str).unwrap_or("-");
            Ok(vec![Value::from(format!("starting {}", name))])
        })
        .with_body("summarize", |args, _| {
            let retries = args
                .get("InputObject")
                .and_then(|r| r.field("Retries"))
                .and_then(Value::as_int)
                .unwrap_or_default();
            Ok(vec![Value::Int(retries * 10)])
        });
    let runtime = KeywordRuntime::new(host);
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();

    assert!(runtime
        .register_keyword_event(
            "Pipeline",
            "Stage",
            KeywordEvent::OnInvoking,
            ScriptBlock::new("announce")
        )
        .unwrap());
    assert!(runtime
        .register_keyword_event(
            "pipeline",
            "stage",
            KeywordEvent::OnInvoked,
            ScriptBlock::new("summarize")
        )
        .unwrap());

    let out = runtime
        .invoke(
            InvocationRequest::new(
                "Stage",
                map(&[("Retries", Value::Int(3)), ("Timeout", Value::Int(60))]),
            )
            .named("build"),
        )
        .unwrap();
    assert_eq!(out, vec![Value::from("starting build"), Value::Int(30)]);
}

// =============================================================================
// REGISTRY OPERATIONS
// =============================================================================

#[test]
fn test_standalone_keyword_cannot_be_hidden() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    let tool = runtime.register_standalone("Tool", |b| b).unwrap();

    let mut registry = runtime.registry_mut().unwrap();
    assert!(matches!(
        registry.hide(tool.id()),
        Err(KeywordError::InvalidOperation { .. })
    ));
    assert!(matches!(
        registry.pop_scope(),
        Err(KeywordError::InvalidOperation { .. })
    ));
}

#[test]
fn test_standalone_keyword_runs_body() {
    let host = NativeHost::new().with_body("emit", |_, _| {
        Ok(vec![Value::Record(Record::new().with_field("Name", "x"))])
    });
    let runtime = KeywordRuntime::new(host);
    runtime.register_standalone("Tool", |b| b).unwrap();

    let out = runtime
        .invoke(InvocationRequest::new("Tool", ScriptBlock::new("emit")))
        .unwrap();
    let tool = record(out);
    assert_eq!(tool.keys().collect::<Vec<_>>(), vec!["Name", "x", "ProducedByKeyword"]);
    assert_eq!(tool.get("ProducedByKeyword"), Some(&Value::from("Tool")));
}

#[test]
fn test_body_item_named_like_output_field_is_rejected() {
    let host = NativeHost::new().with_body("emit-reserved", |_, _| {
        Ok(vec![
            Value::Record(Record::new().with_field("Name", "Name")),
            Value::Record(Record::new().with_field("Name", "ok")),
        ])
    });
    let runtime = KeywordRuntime::new(host);
    runtime.register_standalone("Tool", |b| b).unwrap();

    let err = runtime
        .invoke(InvocationRequest::new("Tool", ScriptBlock::new("emit-reserved")))
        .unwrap_err();
    match err {
        KeywordError::InvalidArgument { keyword, message } => {
            assert_eq!(keyword, "Tool");
            assert!(message.contains("'Name'"));
        }
        other => panic!("Expected invalid argument, got {:?}", other),
    }
}

#[test]
fn test_remove_dsl_clears_bindings() {
    let runtime = KeywordRuntime::new(NativeHost::new());
    runtime.declare_dsl("Pipeline", PIPELINE, None).unwrap();
    assert_eq!(runtime.remove_dsl("Pipeline").unwrap(), 1);

    let registry = runtime.registry().unwrap();
    assert!(registry.is_empty());
    assert!(registry.bindings().lookup("Stage").is_none());
}
