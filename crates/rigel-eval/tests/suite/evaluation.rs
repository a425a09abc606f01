//! End-to-end evaluation against the default mock scene: paused in
//! `Main.run()` with `x = 42`, `s = "hello"`, `arr = {1, 2, 3}`, `big = 7L`.

use pretty_assertions::assert_eq;
use rigel_eval::EvalError;
use rigel_jdwp::mock::{
    MockClass, MockInvokeResult, MockJdwpServerConfig, MockMethod, CLASS_OBJECT_OFFSET,
    EXCEPTION_OBJECT_ID, HELLO_STRING_ID, INT_ARRAY_ID, MAIN_CLASS_ID, MAIN_CTOR_METHOD_ID,
    MAIN_FOO_METHOD_ID, MAIN_FRAME_ID, MAIN_THREAD_ID, OBJECT_CLASS_ID, OBJECT_TOSTRING_METHOD_ID,
    STRING_CLASS_ID, THIS_OBJECT_ID,
};
use rigel_jdwp::{tag, JdwpValue, INVOKE_SINGLE_THREADED};

use super::common::{eval, harness, harness_with};

#[tokio::test]
async fn literal_arithmetic() {
    let h = harness().await;
    let result = eval(&h, "1 + 2").await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.value, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn reads_a_frame_local() {
    let h = harness().await;
    assert_eq!(eval(&h, "x").await.value, Some(JdwpValue::Int(42)));
}

#[tokio::test]
async fn shadowed_local_resolves_to_the_inner_declaration() {
    // Slot 5 holds the outer 1, slot 6 the inner 2; the paused index sits
    // inside both ranges and the inner declaration must win.
    let h = harness().await;
    assert_eq!(eval(&h, "shaded").await.value, Some(JdwpValue::Int(2)));
}

#[tokio::test]
async fn long_promotion() {
    let h = harness().await;
    assert_eq!(eval(&h, "big + 1").await.value, Some(JdwpValue::Long(8)));
}

#[tokio::test]
async fn double_promotion() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "x + 0.5").await.value,
        Some(JdwpValue::Double(42.5))
    );
}

#[tokio::test]
async fn char_operand_promotes_to_int() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "(char) 65 + 1").await.value,
        Some(JdwpValue::Int(66))
    );
}

#[tokio::test]
async fn narrowing_cast_truncates() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "(byte) 300").await.value,
        Some(JdwpValue::Byte(44))
    );
}

#[tokio::test]
async fn string_concatenation_creates_a_target_string() {
    let h = harness().await;
    let result = eval(&h, "s + \"!\"").await;
    let id = result.value.and_then(|v| v.object_id()).unwrap();
    assert_eq!(h.server.string_text(id).await.as_deref(), Some("hello!"));
}

#[tokio::test]
async fn concatenation_stringifies_objects_via_to_string() {
    let h = harness().await;
    let result = eval(&h, "s + this").await;

    // `this` has no scripted text of its own; the interpreter must have
    // called Object.toString(), which the scene answers with "main-name".
    let id = result.value.and_then(|v| v.object_id()).unwrap();
    assert_eq!(
        h.server.string_text(id).await.as_deref(),
        Some("hellomain-name")
    );
    let calls = h.server.invoke_calls().await;
    assert!(calls
        .iter()
        .any(|c| c.method_id == OBJECT_TOSTRING_METHOD_ID));
}

#[tokio::test]
async fn reads_an_instance_field() {
    let h = harness().await;
    assert_eq!(eval(&h, "count").await.value, Some(JdwpValue::Int(10)));
}

#[tokio::test]
async fn reads_a_static_field() {
    let h = harness().await;
    assert_eq!(eval(&h, "instances").await.value, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn writes_an_instance_field() {
    let h = harness().await;
    let result = eval(&h, "count = 11").await;
    assert_eq!(result.value, Some(JdwpValue::Int(11)));
    assert_eq!(
        h.server.object_field(THIS_OBJECT_ID, "count").await,
        Some(JdwpValue::Int(11))
    );
}

#[tokio::test]
async fn writes_a_frame_local() {
    let h = harness().await;
    let result = eval(&h, "x = 7").await;
    assert_eq!(result.value, Some(JdwpValue::Int(7)));
    assert!(h
        .server
        .frame_writes()
        .await
        .contains(&(MAIN_THREAD_ID, MAIN_FRAME_ID, 1, JdwpValue::Int(7))));
}

#[tokio::test]
async fn compound_assignment_stores_and_yields() {
    let h = harness().await;
    let result = eval(&h, "x += 5").await;
    assert_eq!(result.value, Some(JdwpValue::Int(47)));
    assert!(h
        .server
        .frame_writes()
        .await
        .contains(&(MAIN_THREAD_ID, MAIN_FRAME_ID, 1, JdwpValue::Int(47))));
}

#[tokio::test]
async fn array_element_read() {
    let h = harness().await;
    assert_eq!(eval(&h, "arr[1]").await.value, Some(JdwpValue::Int(2)));
}

#[tokio::test]
async fn array_length() {
    let h = harness().await;
    assert_eq!(eval(&h, "arr.length").await.value, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn array_element_write() {
    let h = harness().await;
    let result = eval(&h, "arr[0] = 9").await;
    assert_eq!(result.value, Some(JdwpValue::Int(9)));
    let values = h.server.array_values(INT_ARRAY_ID).await.unwrap();
    assert_eq!(values[0], JdwpValue::Int(9));
}

#[tokio::test]
async fn method_call_result_feeds_arithmetic() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "getAnswer() + 1").await.value,
        Some(JdwpValue::Int(43))
    );
}

#[tokio::test]
async fn void_call_yields_no_value() {
    let h = harness().await;
    let result = eval(&h, "foo();").await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.value, None);

    let calls = h.server.invoke_calls().await;
    let call = calls
        .iter()
        .find(|c| c.method_id == MAIN_FOO_METHOD_ID)
        .unwrap();
    assert_eq!(call.object_id, Some(THIS_OBJECT_ID));
    assert_eq!(call.options, INVOKE_SINGLE_THREADED);
}

#[tokio::test]
async fn thrown_exception_surfaces_with_its_object() {
    let h = harness().await;
    let result = eval(&h, "boom();").await;
    assert_eq!(result.value, None);
    assert!(matches!(
        result.error,
        Some(EvalError::RemoteException(EXCEPTION_OBJECT_ID))
    ));
}

#[tokio::test]
async fn integer_division_by_zero() {
    let h = harness().await;
    let result = eval(&h, "1 / 0").await;
    assert!(matches!(result.error, Some(EvalError::DivideByZero)));
}

#[tokio::test]
async fn null_dereference_is_reported() {
    let h = harness().await;
    let result = eval(&h, "String q = null; return q.toString();").await;
    assert!(matches!(result.error, Some(EvalError::NullDereference)));
    assert!(h.server.invoke_calls().await.is_empty());
}

#[tokio::test]
async fn array_allocation_with_initializer() {
    let h = harness().await;
    let result = eval(&h, "new int[]{4, 5, 6}").await;
    let id = result.value.and_then(|v| v.object_id()).unwrap();
    assert_eq!(
        h.server.array_values(id).await.unwrap(),
        vec![JdwpValue::Int(4), JdwpValue::Int(5), JdwpValue::Int(6)]
    );
}

#[tokio::test]
async fn constructor_call_allocates() {
    let h = harness().await;
    let result = eval(&h, "new Main()").await;
    assert!(result.value.and_then(|v| v.object_id()).is_some());

    let calls = h.server.invoke_calls().await;
    let call = calls
        .iter()
        .find(|c| c.method_id == MAIN_CTOR_METHOD_ID)
        .unwrap();
    assert_eq!(call.class_id, MAIN_CLASS_ID);
    assert_eq!(call.object_id, None);
}

#[tokio::test]
async fn conditional_expression_picks_the_then_branch() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "x > 10 ? 1 : 2").await.value,
        Some(JdwpValue::Int(1))
    );
}

#[tokio::test]
async fn short_circuit_skips_the_right_operand() {
    let h = harness().await;
    let result = eval(&h, "false && getAnswer() == 42").await;
    assert_eq!(result.value, Some(JdwpValue::Boolean(false)));
    assert!(h.server.invoke_calls().await.is_empty());
}

#[tokio::test]
async fn statement_run_with_a_loop() {
    let h = harness().await;
    let result = eval(
        &h,
        "int i = 0; int total = 0; while (i < 3) { total = total + i; i = i + 1; } return total;",
    )
    .await;
    assert_eq!(result.value, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn declared_local_keeps_its_declared_type() {
    let h = harness().await;
    let result = eval(&h, "long y = 1; return y;").await;
    assert_eq!(result.value, Some(JdwpValue::Long(1)));
}

#[tokio::test]
async fn unresolved_name_fails_without_target_traffic() {
    let h = harness().await;
    let result = eval(&h, "nope + 1").await;
    match result.error {
        Some(EvalError::Unresolved(name)) => assert_eq!(name, "nope"),
        other => panic!("expected an unresolved-name error, got {other:?}"),
    }
    assert!(h.server.invoke_calls().await.is_empty());
}

#[tokio::test]
async fn unterminated_string_is_a_compile_error() {
    let h = harness().await;
    let result = eval(&h, "\"unterminated").await;
    assert!(matches!(
        result.error,
        Some(EvalError::Compilation { .. })
    ));
    assert_eq!(result.value, None);
}

#[tokio::test]
async fn this_yields_the_receiver() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "this").await.value,
        Some(JdwpValue::Object {
            tag: tag::OBJECT,
            id: THIS_OBJECT_ID
        })
    );
}

#[tokio::test]
async fn class_literal_yields_the_class_object() {
    let h = harness().await;
    assert_eq!(
        eval(&h, "java.lang.String.class").await.value,
        Some(JdwpValue::Object {
            tag: tag::CLASS_OBJECT,
            id: STRING_CLASS_ID + CLASS_OBJECT_OFFSET
        })
    );
}

#[tokio::test]
async fn reference_identity_comparison() {
    let h = harness().await;
    assert_eq!(eval(&h, "s == s").await.value, Some(JdwpValue::Boolean(true)));
    assert_eq!(
        eval(&h, "s == null").await.value,
        Some(JdwpValue::Boolean(false))
    );
    assert_eq!(
        eval(&h, "s != null").await.value,
        Some(JdwpValue::Boolean(true))
    );
}

#[tokio::test]
async fn instanceof_asks_the_class_object() {
    // The default scene has no java.lang.Class; `instanceof` lowers to
    // Class.isInstance, so declare it and script the answer.
    let mut config = MockJdwpServerConfig::default();
    config.scene.classes.push(MockClass {
        id: 0x2005,
        signature: "Ljava/lang/Class;".to_string(),
        superclass: Some(OBJECT_CLASS_ID),
        fields: Vec::new(),
        methods: vec![MockMethod {
            id: 0x7006,
            name: "isInstance".to_string(),
            signature: "(Ljava/lang/Object;)Z".to_string(),
            mod_bits: 0x0001,
            variables: Vec::new(),
            line_table: Vec::new(),
        }],
    });
    config.scene.invoke_results.insert(
        "isInstance".to_string(),
        MockInvokeResult {
            value: JdwpValue::Boolean(true),
            exception: 0,
        },
    );
    let h = harness_with(config).await;

    let result = eval(&h, "this instanceof Main").await;
    assert_eq!(result.value, Some(JdwpValue::Boolean(true)));

    let calls = h.server.invoke_calls().await;
    let call = calls.iter().find(|c| c.method_id == 0x7006).unwrap();
    assert_eq!(
        call.object_id,
        Some(MAIN_CLASS_ID + CLASS_OBJECT_OFFSET),
        "the receiver should be Main's class object"
    );
    assert_eq!(
        call.args,
        vec![JdwpValue::Object {
            tag: tag::OBJECT,
            id: THIS_OBJECT_ID
        }]
    );
}

#[tokio::test]
async fn string_literal_alone_materializes_in_the_target() {
    let h = harness().await;
    let result = eval(&h, "\"fresh\"").await;
    let id = result.value.and_then(|v| v.object_id()).unwrap();
    assert_eq!(h.server.string_text(id).await.as_deref(), Some("fresh"));
    assert!(h
        .server
        .created_strings()
        .await
        .iter()
        .any(|(created, text)| *created == id && text == "fresh"));
}

#[tokio::test]
async fn string_local_survives_identity_with_itself() {
    let h = harness().await;
    // Both sides read the same frame slot; no new string may be created.
    let result = eval(&h, "s == s").await;
    assert_eq!(result.value, Some(JdwpValue::Boolean(true)));
    assert!(h.server.created_strings().await.is_empty());
    assert_eq!(
        eval(&h, "s").await.value,
        Some(JdwpValue::Object {
            tag: tag::STRING,
            id: HELLO_STRING_ID
        })
    );
}
