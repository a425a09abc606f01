//! Runtime name resolution for a paused execution point.
//!
//! A [`RuntimeContext`] captures everything an evaluation resolves names
//! against: the paused frame, its receiver, the locals in scope at the
//! paused index and the fields visible from the declaring type. Anchoring
//! on a selected value swaps the receiver side out while keeping the
//! frame's locals.

use std::collections::BTreeMap;

use rigel_jdwp::{
    error_codes, FieldId, FieldInfo, FrameId, JdwpClient, JdwpError, JdwpValue, Location, MethodId,
    MethodInfo, ObjectId, ReferenceTypeId, ThreadId, VariableInfo,
};

use crate::error::{EvalError, Result};

/// Name of the synthetic local standing in for an array selected as the
/// evaluation receiver. Arrays have no members to compile against, so the
/// snippet's `this` is textually redirected to this binding instead.
pub const ARRAY_THIS: &str = "__array_this";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Local,
    Field,
    PseudoThis,
}

/// Where a binding's value lives in the target.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingSlot {
    FrameLocal {
        slot: u32,
        signature: String,
    },
    InstanceField {
        object: ObjectId,
        field: FieldId,
        signature: String,
    },
    StaticField {
        class: ReferenceTypeId,
        field: FieldId,
        signature: String,
    },
    /// A plain value with no storage behind it.
    Value(JdwpValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub name: String,
    pub kind: BindingKind,
    /// Source-level type name, preferring the generic signature.
    pub type_name: String,
    /// Erased JVM signature.
    pub signature: String,
    pub slot: BindingSlot,
}

/// What an evaluation resolves against.
#[derive(Clone, Debug)]
pub enum Anchor {
    /// The newest frame of the thread.
    Frame,
    /// Values picked in a variables view; must name exactly one.
    Selection(Vec<JdwpValue>),
}

#[derive(Clone, Debug)]
pub struct RuntimeContext {
    pub thread: ThreadId,
    pub frame_id: FrameId,
    pub location: Location,
    /// Type member lookup starts here.
    pub declaring_type: ReferenceTypeId,
    pub declaring_type_name: String,
    pub this_object: Option<(u8, ObjectId)>,
    /// Synthetic local the snippet's `this` is redirected to, when the
    /// anchor is a selected array.
    pub pseudo_this: Option<String>,
    bindings: BTreeMap<String, Binding>,
}

impl RuntimeContext {
    /// Builds the context for the newest frame of `thread`.
    pub async fn from_frame(client: &JdwpClient, thread: ThreadId) -> Result<Self> {
        Self::from_anchor(client, thread, &Anchor::Frame).await
    }

    pub async fn from_anchor(
        client: &JdwpClient,
        thread: ThreadId,
        anchor: &Anchor,
    ) -> Result<Self> {
        let selected = match anchor {
            Anchor::Frame => None,
            Anchor::Selection(values) => match values.as_slice() {
                [] => return Err(EvalError::NoActiveContext),
                [value] => Some(*value),
                _ => return Err(EvalError::AmbiguousSelection),
            },
        };

        let status = client.thread_status(thread).await?;
        if !status.is_suspended() {
            return Err(EvalError::ThreadNotSuspended);
        }
        let frames = client.frames(thread, 0, 1).await?;
        let Some(frame) = frames.first() else {
            return Err(EvalError::NoActiveContext);
        };

        let mut context = Self {
            thread,
            frame_id: frame.frame_id,
            location: frame.location,
            declaring_type: frame.location.class_id,
            declaring_type_name: String::new(),
            this_object: None,
            pseudo_this: None,
            bindings: BTreeMap::new(),
        };

        match selected {
            None => {
                let signature = client.reference_type_signature(frame.location.class_id).await?;
                context.declaring_type_name = type_name_from_signature(&signature);
                context.this_object = client.stack_frame_this_object(thread, frame.frame_id).await?;
                let receiver = context.this_object.map(|(_, id)| id);
                context
                    .collect_fields(client, frame.location.class_id, receiver)
                    .await?;
            }
            Some(value) => context.anchor_to_value(client, value).await?,
        }

        // Locals go in last so they shadow same-named fields.
        context.collect_locals(client).await?;
        Ok(context)
    }

    /// Looks one identifier up; every free name the compiler meets goes
    /// through here.
    pub fn resolve(&self, identifier: &str) -> Result<&Binding> {
        self.bindings
            .get(identifier)
            .ok_or_else(|| EvalError::Unresolved(identifier.to_string()))
    }

    pub fn binding(&self, identifier: &str) -> Option<&Binding> {
        self.bindings.get(identifier)
    }

    /// All bindings, in name order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// `(name, type name)` pairs the synthesizer re-declares; locals only.
    pub fn captured_locals(&self) -> Vec<(String, String)> {
        self.bindings
            .values()
            .filter(|binding| binding.kind == BindingKind::Local)
            .map(|binding| (binding.name.clone(), binding.type_name.clone()))
            .collect()
    }

    pub fn is_static(&self) -> bool {
        self.this_object.is_none()
    }

    /// Re-anchors member lookup on one selected value.
    async fn anchor_to_value(&mut self, client: &JdwpClient, value: JdwpValue) -> Result<()> {
        let Some(object_id) = value.object_id() else {
            // Primitives and null have no members to resolve against.
            return Err(EvalError::NoActiveContext);
        };
        let class_id = client.object_reference_reference_type(object_id).await?;
        let signature = client.reference_type_signature(class_id).await?;
        self.declaring_type = class_id;
        self.declaring_type_name = type_name_from_signature(&signature);

        if signature.starts_with('[') {
            self.pseudo_this = Some(ARRAY_THIS.to_string());
            self.bindings.insert(
                ARRAY_THIS.to_string(),
                Binding {
                    name: ARRAY_THIS.to_string(),
                    kind: BindingKind::PseudoThis,
                    type_name: self.declaring_type_name.clone(),
                    signature,
                    slot: BindingSlot::Value(value),
                },
            );
            return Ok(());
        }

        self.this_object = Some((value.tag(), object_id));
        self.collect_fields(client, class_id, Some(object_id)).await
    }

    /// Fields reachable by simple name, walked subclass-to-superclass so a
    /// shadowing redeclaration hides the inherited one. Instance fields
    /// bind only when there is a receiver.
    async fn collect_fields(
        &mut self,
        client: &JdwpClient,
        class_id: ReferenceTypeId,
        receiver: Option<ObjectId>,
    ) -> Result<()> {
        let mut cursor = Some(class_id);
        while let Some(current) = cursor {
            for field in class_fields(client, current).await? {
                if self.bindings.contains_key(&field.name) {
                    continue;
                }
                let slot = if field.is_static() {
                    BindingSlot::StaticField {
                        class: current,
                        field: field.field_id,
                        signature: field.signature.clone(),
                    }
                } else {
                    match receiver {
                        Some(object) => BindingSlot::InstanceField {
                            object,
                            field: field.field_id,
                            signature: field.signature.clone(),
                        },
                        None => continue,
                    }
                };
                let display = field.generic_signature.as_deref().unwrap_or(&field.signature);
                self.bindings.insert(
                    field.name.clone(),
                    Binding {
                        name: field.name.clone(),
                        kind: BindingKind::Field,
                        type_name: type_name_from_signature(display),
                        signature: field.signature.clone(),
                        slot,
                    },
                );
            }
            cursor = client.class_type_superclass(current).await?;
        }
        Ok(())
    }

    /// Locals whose live range covers the paused index. On a name
    /// collision the declaration whose range starts latest wins; that is
    /// the innermost scope.
    async fn collect_locals(&mut self, client: &JdwpClient) -> Result<()> {
        let variables =
            method_variables(client, self.location.class_id, self.location.method_id).await?;

        let pc = self.location.index;
        let mut in_scope: BTreeMap<&str, &VariableInfo> = BTreeMap::new();
        for variable in &variables {
            let covers =
                variable.code_index <= pc && pc < variable.code_index + u64::from(variable.length);
            if !covers {
                continue;
            }
            match in_scope.get(variable.name.as_str()) {
                Some(current) if current.code_index >= variable.code_index => {}
                _ => {
                    in_scope.insert(&variable.name, variable);
                }
            }
        }

        for variable in in_scope.into_values() {
            let display = variable
                .generic_signature
                .as_deref()
                .unwrap_or(&variable.signature);
            self.bindings.insert(
                variable.name.clone(),
                Binding {
                    name: variable.name.clone(),
                    kind: BindingKind::Local,
                    type_name: type_name_from_signature(display),
                    signature: variable.signature.clone(),
                    slot: BindingSlot::FrameLocal {
                        slot: variable.slot,
                        signature: variable.signature.clone(),
                    },
                },
            );
        }
        Ok(())
    }
}

/// The frame method's variable table. Prefers the generic form, falls back
/// to the plain table where the VM lacks it, and treats missing debug info
/// as an empty table rather than an error.
async fn method_variables(
    client: &JdwpClient,
    class_id: ReferenceTypeId,
    method_id: MethodId,
) -> Result<Vec<VariableInfo>> {
    match client.method_variable_table_with_generic(class_id, method_id).await {
        Ok((_, variables)) => Ok(variables),
        Err(JdwpError::VmError(error_codes::NOT_IMPLEMENTED)) => {
            match client.method_variable_table(class_id, method_id).await {
                Ok((_, variables)) => Ok(variables),
                Err(JdwpError::VmError(error_codes::ABSENT_INFORMATION)) => Ok(Vec::new()),
                Err(err) => Err(err.into()),
            }
        }
        Err(JdwpError::VmError(error_codes::ABSENT_INFORMATION)) => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// A type's own fields, generic signatures included where the VM supports
/// them.
pub(crate) async fn class_fields(
    client: &JdwpClient,
    class_id: ReferenceTypeId,
) -> Result<Vec<FieldInfo>> {
    match client.reference_type_fields_with_generic(class_id).await {
        Ok(fields) => Ok(fields),
        Err(JdwpError::VmError(error_codes::NOT_IMPLEMENTED)) => {
            Ok(client.reference_type_fields(class_id).await?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Finds a field by simple name, walking superclasses. Returns the class
/// that declares it alongside the descriptor.
pub(crate) async fn find_field(
    client: &JdwpClient,
    class_id: ReferenceTypeId,
    name: &str,
) -> Result<Option<(ReferenceTypeId, FieldInfo)>> {
    let mut cursor = Some(class_id);
    while let Some(current) = cursor {
        if let Some(field) = class_fields(client, current)
            .await?
            .into_iter()
            .find(|field| field.name == name)
        {
            return Ok(Some((current, field)));
        }
        cursor = client.class_type_superclass(current).await?;
    }
    Ok(None)
}

/// Finds a method walking superclasses, by exact signature when one is
/// known and by arity otherwise.
pub(crate) async fn find_method(
    client: &JdwpClient,
    class_id: ReferenceTypeId,
    name: &str,
    signature: Option<&str>,
    argc: usize,
) -> Result<Option<(ReferenceTypeId, MethodInfo)>> {
    let mut cursor = Some(class_id);
    while let Some(current) = cursor {
        let found = client
            .reference_type_methods(current)
            .await?
            .into_iter()
            .find(|method| {
                method.name == name
                    && match signature {
                        Some(signature) => method.signature == signature,
                        None => method_param_signatures(&method.signature).len() == argc,
                    }
            });
        if let Some(method) = found {
            return Ok(Some((current, method)));
        }
        cursor = client.class_type_superclass(current).await?;
    }
    Ok(None)
}

/// Splits a JNI method signature into its parameter type signatures.
pub(crate) fn method_param_signatures(signature: &str) -> Vec<String> {
    let Some(inner) = signature
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
    else {
        return Vec::new();
    };
    let bytes = inner.as_bytes();
    let mut params = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        let start = index;
        while bytes.get(index) == Some(&b'[') {
            index += 1;
        }
        match bytes.get(index) {
            Some(b'L') => {
                while index < bytes.len() && bytes[index] != b';' {
                    index += 1;
                }
                index = (index + 1).min(inner.len());
            }
            Some(_) => index += 1,
            None => break,
        }
        params.push(inner[start..index].to_string());
    }
    params
}

/// The return type signature of a JNI method signature.
pub(crate) fn method_return_signature(signature: &str) -> &str {
    signature.rsplit(')').next().unwrap_or("V")
}

/// Renders a JVM type signature, generic forms included, as a Java source
/// name: `I` -> `int`, `[I` -> `int[]`,
/// `Ljava/util/List<Ljava/lang/String;>;` ->
/// `java.util.List<java.lang.String>`.
pub fn type_name_from_signature(signature: &str) -> String {
    let mut out = String::new();
    render_signature(signature, &mut out);
    out
}

/// Appends the rendering of the leading type in `sig` and returns how many
/// bytes of it were consumed.
fn render_signature(sig: &str, out: &mut String) -> usize {
    let bytes = sig.as_bytes();
    match bytes.first() {
        None => 0,
        Some(b'Z') => {
            out.push_str("boolean");
            1
        }
        Some(b'B') => {
            out.push_str("byte");
            1
        }
        Some(b'C') => {
            out.push_str("char");
            1
        }
        Some(b'S') => {
            out.push_str("short");
            1
        }
        Some(b'I') => {
            out.push_str("int");
            1
        }
        Some(b'J') => {
            out.push_str("long");
            1
        }
        Some(b'F') => {
            out.push_str("float");
            1
        }
        Some(b'D') => {
            out.push_str("double");
            1
        }
        Some(b'V') => {
            out.push_str("void");
            1
        }
        Some(b'[') => {
            let consumed = render_signature(&sig[1..], out);
            out.push_str("[]");
            consumed + 1
        }
        Some(b'L' | b'T') => {
            let mut index = 1;
            loop {
                let Some(&b) = bytes.get(index) else { break };
                match b {
                    b';' => {
                        index += 1;
                        break;
                    }
                    b'/' | b'$' => {
                        out.push('.');
                        index += 1;
                    }
                    b'<' => {
                        out.push('<');
                        index += 1;
                        let mut first = true;
                        while bytes.get(index).is_some_and(|&b| b != b'>') {
                            if !first {
                                out.push_str(", ");
                            }
                            first = false;
                            match bytes[index] {
                                b'*' => {
                                    out.push('?');
                                    index += 1;
                                }
                                b'+' => {
                                    out.push_str("? extends ");
                                    index += 1;
                                    index += render_signature(&sig[index..], out).max(1);
                                }
                                b'-' => {
                                    out.push_str("? super ");
                                    index += 1;
                                    index += render_signature(&sig[index..], out).max(1);
                                }
                                _ => {
                                    index += render_signature(&sig[index..], out).max(1);
                                }
                            }
                        }
                        out.push('>');
                        index += 1;
                    }
                    _ => {
                        let ch = sig[index..].chars().next().unwrap_or('\u{fffd}');
                        out.push(ch);
                        index += ch.len_utf8();
                    }
                }
            }
            index
        }
        Some(_) => {
            out.push_str(sig);
            sig.len()
        }
    }
}

/// The erased JNI signature for a Java source type name: `int[]` -> `[I`,
/// `java.util.List<String>` -> `Ljava/util/List;`.
pub fn signature_from_type_name(name: &str) -> String {
    let name = name.trim();
    if let Some(element) = name.strip_suffix("[]") {
        return format!("[{}", signature_from_type_name(element));
    }
    let base = match name.find('<') {
        Some(index) => &name[..index],
        None => name,
    };
    rigel_jdwp::class_name_to_signature(base)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn signatures_render_as_source_names() {
        assert_eq!(type_name_from_signature("I"), "int");
        assert_eq!(type_name_from_signature("[I"), "int[]");
        assert_eq!(type_name_from_signature("[[J"), "long[][]");
        assert_eq!(type_name_from_signature("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(
            type_name_from_signature("Ljava/util/List<Ljava/lang/String;>;"),
            "java.util.List<java.lang.String>"
        );
        assert_eq!(
            type_name_from_signature("Ljava/util/Map<Ljava/lang/String;Ljava/lang/Integer;>;"),
            "java.util.Map<java.lang.String, java.lang.Integer>"
        );
        assert_eq!(type_name_from_signature("LOuter$Inner;"), "Outer.Inner");
    }

    #[test]
    fn type_names_erase_to_signatures() {
        assert_eq!(signature_from_type_name("int"), "I");
        assert_eq!(signature_from_type_name("int[]"), "[I");
        assert_eq!(signature_from_type_name("java.lang.String[][]"), "[[Ljava/lang/String;");
        assert_eq!(signature_from_type_name("java.util.List<String>"), "Ljava/util/List;");
    }

    #[test]
    fn method_signatures_split() {
        assert_eq!(method_param_signatures("()V"), Vec::<String>::new());
        assert_eq!(method_param_signatures("(I[JLjava/lang/String;)V"), vec![
            "I".to_string(),
            "[J".to_string(),
            "Ljava/lang/String;".to_string()
        ]);
        assert_eq!(method_return_signature("(I)Ljava/lang/String;"), "Ljava/lang/String;");
        assert_eq!(method_return_signature("()V"), "V");
    }
}
