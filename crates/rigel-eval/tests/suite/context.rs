//! `RuntimeContext` construction: binding collection, shadowing, anchors.

use pretty_assertions::assert_eq;
use rigel_eval::{Anchor, BindingKind, BindingSlot, EvalError, RuntimeContext, ARRAY_THIS};
use rigel_jdwp::mock::{
    MockJdwpServerConfig, INT_ARRAY_ID, MAIN_THREAD_ID, THIS_OBJECT_ID,
};
use rigel_jdwp::{tag, JdwpValue};

use super::common::{eval_anchored, harness, harness_with};

#[tokio::test]
async fn locals_shadow_fields_and_inner_scopes_shadow_outer() {
    let h = harness().await;
    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();

    // Two `shaded` declarations cover the paused index; the one starting
    // later is the inner scope and must supply the slot.
    let binding = context.resolve("shaded").unwrap();
    assert_eq!(binding.kind, BindingKind::Local);
    assert!(matches!(
        binding.slot,
        BindingSlot::FrameLocal { slot: 6, .. }
    ));
}

#[tokio::test]
async fn bindings_iterate_in_name_order() {
    let h = harness().await;
    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    let names: Vec<&str> = context.bindings().map(|b| b.name.as_str()).collect();
    assert_eq!(
        names,
        ["arr", "big", "count", "instances", "items", "name", "s", "shaded", "x"]
    );
}

#[tokio::test]
async fn generic_signature_shapes_the_display_type() {
    let h = harness().await;
    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    let items = context.resolve("items").unwrap();
    assert_eq!(items.type_name, "java.util.List<java.lang.String>");
    assert_eq!(items.signature, "Ljava/util/List;");
}

#[tokio::test]
async fn generic_tables_fall_back_to_erased_signatures() {
    let mut config = MockJdwpServerConfig::default();
    config.generic_tables_supported = false;
    let h = harness_with(config).await;

    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    assert_eq!(context.resolve("items").unwrap().type_name, "java.util.List");
    // Locals still resolve through the plain variable table.
    assert!(context.resolve("x").is_ok());
}

#[tokio::test]
async fn captured_locals_cover_frame_locals_only() {
    let h = harness().await;
    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    assert_eq!(
        context.captured_locals(),
        vec![
            ("arr".to_string(), "int[]".to_string()),
            ("big".to_string(), "long".to_string()),
            ("s".to_string(), "java.lang.String".to_string()),
            ("shaded".to_string(), "int".to_string()),
            ("x".to_string(), "int".to_string()),
        ]
    );
}

#[tokio::test]
async fn static_frame_binds_statics_but_not_instance_fields() {
    let mut config = MockJdwpServerConfig::default();
    for class in &mut config.scene.classes {
        for method in &mut class.methods {
            if method.name == "run" {
                method.mod_bits |= 0x0008;
            }
        }
    }
    for frame in &mut config.scene.frames {
        frame.this_object = None;
    }
    let h = harness_with(config).await;

    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    assert!(context.is_static());
    assert!(context.resolve("instances").is_ok());
    assert!(matches!(
        context.resolve("count"),
        Err(EvalError::Unresolved(_))
    ));
}

#[tokio::test]
async fn running_thread_is_rejected() {
    let mut config = MockJdwpServerConfig::default();
    config.scene.threads[0].suspend_count = 0;
    let h = harness_with(config).await;

    let result = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID).await;
    assert!(matches!(result, Err(EvalError::ThreadNotSuspended)));
}

#[tokio::test]
async fn suspended_thread_without_frames_has_no_context() {
    let mut config = MockJdwpServerConfig::default();
    config.scene.frames.clear();
    let h = harness_with(config).await;

    let result = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID).await;
    assert!(matches!(result, Err(EvalError::NoActiveContext)));
}

#[tokio::test]
async fn selection_of_several_values_is_ambiguous() {
    let h = harness().await;
    let anchor = Anchor::Selection(vec![JdwpValue::Int(1), JdwpValue::Int(2)]);
    let result = RuntimeContext::from_anchor(&h.client, MAIN_THREAD_ID, &anchor).await;
    assert!(matches!(result, Err(EvalError::AmbiguousSelection)));
}

#[tokio::test]
async fn empty_selection_has_no_context() {
    let h = harness().await;
    let anchor = Anchor::Selection(Vec::new());
    let result = RuntimeContext::from_anchor(&h.client, MAIN_THREAD_ID, &anchor).await;
    assert!(matches!(result, Err(EvalError::NoActiveContext)));
}

#[tokio::test]
async fn selected_primitive_has_no_members() {
    let h = harness().await;
    let anchor = Anchor::Selection(vec![JdwpValue::Int(5)]);
    let result = RuntimeContext::from_anchor(&h.client, MAIN_THREAD_ID, &anchor).await;
    assert!(matches!(result, Err(EvalError::NoActiveContext)));
}

#[tokio::test]
async fn selected_array_gets_a_pseudo_this() {
    let h = harness().await;
    let value = JdwpValue::Object {
        tag: tag::ARRAY,
        id: INT_ARRAY_ID,
    };
    let anchor = Anchor::Selection(vec![value]);

    let context = RuntimeContext::from_anchor(&h.client, MAIN_THREAD_ID, &anchor)
        .await
        .unwrap();
    assert_eq!(context.pseudo_this.as_deref(), Some(ARRAY_THIS));
    assert_eq!(context.declaring_type_name, "int[]");
    let binding = context.binding(ARRAY_THIS).unwrap();
    assert_eq!(binding.kind, BindingKind::PseudoThis);
    assert!(matches!(binding.slot, BindingSlot::Value(_)));

    // Through the engine, `this` now means the selected array.
    let result = eval_anchored(&h, "this.length", anchor).await;
    assert_eq!(result.value, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn selected_object_rebinds_member_lookup() {
    let h = harness().await;
    let anchor = Anchor::Selection(vec![JdwpValue::Object {
        tag: tag::OBJECT,
        id: THIS_OBJECT_ID,
    }]);

    let context = RuntimeContext::from_anchor(&h.client, MAIN_THREAD_ID, &anchor)
        .await
        .unwrap();
    assert_eq!(context.declaring_type_name, "Main");
    assert_eq!(context.this_object, Some((tag::OBJECT, THIS_OBJECT_ID)));
    assert!(context.resolve("count").is_ok());
    // Frame locals stay visible under a selection anchor.
    assert!(context.resolve("x").is_ok());

    let result = eval_anchored(&h, "count", anchor).await;
    assert_eq!(result.value, Some(JdwpValue::Int(10)));
}
