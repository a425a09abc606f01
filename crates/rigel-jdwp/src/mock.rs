//! Scripted in-process JDWP server.
//!
//! Integration suites point a [`JdwpClient`](crate::JdwpClient) at this server
//! instead of a real JVM. The served world is a [`MockScene`]: threads,
//! classes, a paused frame with locals, heap objects, arrays and strings.
//! Replies are computed from the scene; mutating commands (SetValues,
//! Suspend/Resume, CreateString, invokes) update it, and the server records
//! the interesting calls so tests can assert on traffic.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::codec::{encode_reply, signature_to_tag, JdwpReader, JdwpWriter, HANDSHAKE, HEADER_LEN};
use crate::types::{
    error_codes, tag, FieldId, FrameId, JdwpIdSizes, JdwpValue, Location, MethodId, ObjectId,
    ReferenceTypeId, ThreadId, CLASS_STATUS_PREPARED, TYPE_TAG_ARRAY, TYPE_TAG_CLASS,
};

pub const MAIN_THREAD_ID: ThreadId = 0x1001;
pub const MAIN_FRAME_ID: FrameId = 0x3001;

pub const OBJECT_CLASS_ID: ReferenceTypeId = 0x2000;
pub const MAIN_CLASS_ID: ReferenceTypeId = 0x2001;
pub const STRING_CLASS_ID: ReferenceTypeId = 0x2002;
pub const INT_ARRAY_CLASS_ID: ReferenceTypeId = 0x2003;
pub const EXCEPTION_CLASS_ID: ReferenceTypeId = 0x2004;

pub const THIS_OBJECT_ID: ObjectId = 0x4001;
pub const EXCEPTION_OBJECT_ID: ObjectId = 0x4002;
pub const HELLO_STRING_ID: ObjectId = 0x5001;
pub const NAME_STRING_ID: ObjectId = 0x5002;
pub const INT_ARRAY_ID: ObjectId = 0x6001;

pub const OBJECT_TOSTRING_METHOD_ID: MethodId = 0x7000;
pub const MAIN_RUN_METHOD_ID: MethodId = 0x7001;
pub const MAIN_FOO_METHOD_ID: MethodId = 0x7002;
pub const MAIN_GET_ANSWER_METHOD_ID: MethodId = 0x7003;
pub const MAIN_BOOM_METHOD_ID: MethodId = 0x7004;
pub const MAIN_CTOR_METHOD_ID: MethodId = 0x7005;

pub const MAIN_COUNT_FIELD_ID: FieldId = 0x8001;
pub const MAIN_NAME_FIELD_ID: FieldId = 0x8002;
pub const MAIN_INSTANCES_FIELD_ID: FieldId = 0x8003;
pub const MAIN_ITEMS_FIELD_ID: FieldId = 0x8004;

/// Paused code index of the default scene's `Main.run` frame.
pub const PAUSED_CODE_INDEX: u64 = 7;

/// ReferenceType.ClassObject replies with `type id + CLASS_OBJECT_OFFSET`.
pub const CLASS_OBJECT_OFFSET: u64 = 0x1_0000;

const FIRST_ALLOCATED_ID: u64 = 0x9000;

#[derive(Debug, Clone)]
pub struct MockThread {
    pub id: ThreadId,
    pub name: String,
    pub suspend_count: u32,
}

#[derive(Debug, Clone)]
pub struct MockVariable {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub length: u32,
    pub slot: u32,
}

#[derive(Debug, Clone)]
pub struct MockMethod {
    pub id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
    pub variables: Vec<MockVariable>,
    /// `(code_index, line)` pairs; empty means "no line info" and the mock
    /// answers `ABSENT_INFORMATION`.
    pub line_table: Vec<(u64, i32)>,
}

#[derive(Debug, Clone)]
pub struct MockField {
    pub id: FieldId,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub mod_bits: u32,
    /// Static fields: the class-level value. Instance fields: the default
    /// value objects of this class start with.
    pub value: JdwpValue,
}

#[derive(Debug, Clone)]
pub struct MockClass {
    pub id: ReferenceTypeId,
    pub signature: String,
    pub superclass: Option<ReferenceTypeId>,
    pub fields: Vec<MockField>,
    pub methods: Vec<MockMethod>,
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub id: ObjectId,
    pub class_id: ReferenceTypeId,
    /// Overrides of the class's instance-field defaults, by field name.
    pub fields: Vec<(String, JdwpValue)>,
}

#[derive(Debug, Clone)]
pub struct MockArray {
    pub id: ObjectId,
    pub class_id: ReferenceTypeId,
    pub element_tag: u8,
    pub values: Vec<JdwpValue>,
}

#[derive(Debug, Clone)]
pub struct MockFrame {
    pub thread: ThreadId,
    pub frame_id: FrameId,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub code_index: u64,
    pub this_object: Option<(u8, ObjectId)>,
    pub slots: Vec<(u32, JdwpValue)>,
}

/// Fixed reply for an invoked method, keyed by method name.
#[derive(Debug, Clone)]
pub struct MockInvokeResult {
    pub value: JdwpValue,
    /// Thrown-exception object id; 0 means the call returns normally.
    pub exception: ObjectId,
}

#[derive(Debug, Clone)]
pub struct MockScene {
    pub threads: Vec<MockThread>,
    pub classes: Vec<MockClass>,
    pub objects: Vec<MockObject>,
    pub arrays: Vec<MockArray>,
    pub strings: Vec<(ObjectId, String)>,
    pub frames: Vec<MockFrame>,
    /// Method name → scripted invoke reply. Unscripted invokes echo their
    /// first argument (or Void).
    pub invoke_results: HashMap<String, MockInvokeResult>,
}

impl Default for MockScene {
    /// One suspended `main` thread paused inside `Main.run()` with locals
    /// `x = 42`, `s = "hello"`, `arr = {1, 2, 3}`, `big = 7L` and a
    /// twice-declared `shaded` whose inner declaration is in scope.
    fn default() -> Self {
        let object_class = MockClass {
            id: OBJECT_CLASS_ID,
            signature: "Ljava/lang/Object;".to_string(),
            superclass: None,
            fields: Vec::new(),
            methods: vec![MockMethod {
                id: OBJECT_TOSTRING_METHOD_ID,
                name: "toString".to_string(),
                signature: "()Ljava/lang/String;".to_string(),
                mod_bits: 0x0001,
                variables: Vec::new(),
                line_table: Vec::new(),
            }],
        };

        let run_variables = vec![
            MockVariable {
                code_index: 0,
                name: "x".to_string(),
                signature: "I".to_string(),
                generic_signature: None,
                length: 100,
                slot: 1,
            },
            MockVariable {
                code_index: 0,
                name: "s".to_string(),
                signature: "Ljava/lang/String;".to_string(),
                generic_signature: None,
                length: 100,
                slot: 2,
            },
            MockVariable {
                code_index: 0,
                name: "arr".to_string(),
                signature: "[I".to_string(),
                generic_signature: None,
                length: 100,
                slot: 3,
            },
            MockVariable {
                code_index: 0,
                name: "big".to_string(),
                signature: "J".to_string(),
                generic_signature: None,
                length: 100,
                slot: 4,
            },
            // Outer declaration, visible the whole method.
            MockVariable {
                code_index: 0,
                name: "shaded".to_string(),
                signature: "I".to_string(),
                generic_signature: None,
                length: 100,
                slot: 5,
            },
            // Inner declaration, also covering the paused index.
            MockVariable {
                code_index: 4,
                name: "shaded".to_string(),
                signature: "I".to_string(),
                generic_signature: None,
                length: 20,
                slot: 6,
            },
        ];

        let main_class = MockClass {
            id: MAIN_CLASS_ID,
            signature: "LMain;".to_string(),
            superclass: Some(OBJECT_CLASS_ID),
            fields: vec![
                MockField {
                    id: MAIN_COUNT_FIELD_ID,
                    name: "count".to_string(),
                    signature: "I".to_string(),
                    generic_signature: None,
                    mod_bits: 0x0002,
                    value: JdwpValue::Int(10),
                },
                MockField {
                    id: MAIN_NAME_FIELD_ID,
                    name: "name".to_string(),
                    signature: "Ljava/lang/String;".to_string(),
                    generic_signature: None,
                    mod_bits: 0x0002,
                    value: JdwpValue::Object { tag: tag::STRING, id: NAME_STRING_ID },
                },
                MockField {
                    id: MAIN_INSTANCES_FIELD_ID,
                    name: "instances".to_string(),
                    signature: "I".to_string(),
                    generic_signature: None,
                    mod_bits: 0x0002 | 0x0008,
                    value: JdwpValue::Int(3),
                },
                MockField {
                    id: MAIN_ITEMS_FIELD_ID,
                    name: "items".to_string(),
                    signature: "Ljava/util/List;".to_string(),
                    generic_signature: Some("Ljava/util/List<Ljava/lang/String;>;".to_string()),
                    mod_bits: 0x0002,
                    value: JdwpValue::Null,
                },
            ],
            methods: vec![
                MockMethod {
                    id: MAIN_CTOR_METHOD_ID,
                    name: "<init>".to_string(),
                    signature: "()V".to_string(),
                    mod_bits: 0x0001,
                    variables: Vec::new(),
                    line_table: Vec::new(),
                },
                MockMethod {
                    id: MAIN_RUN_METHOD_ID,
                    name: "run".to_string(),
                    signature: "()V".to_string(),
                    mod_bits: 0x0001,
                    variables: run_variables,
                    line_table: vec![(0, 5), (4, 6), (8, 7)],
                },
                MockMethod {
                    id: MAIN_FOO_METHOD_ID,
                    name: "foo".to_string(),
                    signature: "()V".to_string(),
                    mod_bits: 0x0001,
                    variables: Vec::new(),
                    line_table: Vec::new(),
                },
                MockMethod {
                    id: MAIN_GET_ANSWER_METHOD_ID,
                    name: "getAnswer".to_string(),
                    signature: "()I".to_string(),
                    mod_bits: 0x0001,
                    variables: Vec::new(),
                    line_table: Vec::new(),
                },
                MockMethod {
                    id: MAIN_BOOM_METHOD_ID,
                    name: "boom".to_string(),
                    signature: "()V".to_string(),
                    mod_bits: 0x0001,
                    variables: Vec::new(),
                    line_table: Vec::new(),
                },
            ],
        };

        let string_class = MockClass {
            id: STRING_CLASS_ID,
            signature: "Ljava/lang/String;".to_string(),
            superclass: Some(OBJECT_CLASS_ID),
            fields: Vec::new(),
            methods: Vec::new(),
        };

        let int_array_class = MockClass {
            id: INT_ARRAY_CLASS_ID,
            signature: "[I".to_string(),
            superclass: Some(OBJECT_CLASS_ID),
            fields: Vec::new(),
            methods: Vec::new(),
        };

        let exception_class = MockClass {
            id: EXCEPTION_CLASS_ID,
            signature: "Ljava/lang/RuntimeException;".to_string(),
            superclass: Some(OBJECT_CLASS_ID),
            fields: Vec::new(),
            methods: Vec::new(),
        };

        let mut invoke_results = HashMap::new();
        invoke_results.insert(
            "foo".to_string(),
            MockInvokeResult { value: JdwpValue::Void, exception: 0 },
        );
        invoke_results.insert(
            "getAnswer".to_string(),
            MockInvokeResult { value: JdwpValue::Int(42), exception: 0 },
        );
        invoke_results.insert(
            "boom".to_string(),
            MockInvokeResult { value: JdwpValue::Null, exception: EXCEPTION_OBJECT_ID },
        );
        invoke_results.insert(
            "toString".to_string(),
            MockInvokeResult {
                value: JdwpValue::Object { tag: tag::STRING, id: NAME_STRING_ID },
                exception: 0,
            },
        );

        Self {
            threads: vec![MockThread {
                id: MAIN_THREAD_ID,
                name: "main".to_string(),
                suspend_count: 1,
            }],
            classes: vec![
                object_class,
                main_class,
                string_class,
                int_array_class,
                exception_class,
            ],
            objects: vec![
                MockObject {
                    id: THIS_OBJECT_ID,
                    class_id: MAIN_CLASS_ID,
                    fields: Vec::new(),
                },
                MockObject {
                    id: EXCEPTION_OBJECT_ID,
                    class_id: EXCEPTION_CLASS_ID,
                    fields: Vec::new(),
                },
            ],
            arrays: vec![MockArray {
                id: INT_ARRAY_ID,
                class_id: INT_ARRAY_CLASS_ID,
                element_tag: tag::INT,
                values: vec![JdwpValue::Int(1), JdwpValue::Int(2), JdwpValue::Int(3)],
            }],
            strings: vec![
                (HELLO_STRING_ID, "hello".to_string()),
                (NAME_STRING_ID, "main-name".to_string()),
            ],
            frames: vec![MockFrame {
                thread: MAIN_THREAD_ID,
                frame_id: MAIN_FRAME_ID,
                class_id: MAIN_CLASS_ID,
                method_id: MAIN_RUN_METHOD_ID,
                code_index: PAUSED_CODE_INDEX,
                this_object: Some((tag::OBJECT, THIS_OBJECT_ID)),
                slots: vec![
                    (1, JdwpValue::Int(42)),
                    (2, JdwpValue::Object { tag: tag::STRING, id: HELLO_STRING_ID }),
                    (3, JdwpValue::Object { tag: tag::ARRAY, id: INT_ARRAY_ID }),
                    (4, JdwpValue::Long(7)),
                    (5, JdwpValue::Int(1)),
                    (6, JdwpValue::Int(2)),
                ],
            }],
            invoke_results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockJdwpServerConfig {
    pub id_sizes: JdwpIdSizes,
    /// Sleep before sending each reply; exercises the client's blocking
    /// round-trip path.
    pub reply_delay: Option<Duration>,
    /// When false, the `WithGeneric` table commands answer
    /// `NOT_IMPLEMENTED` so callers exercise their fallbacks.
    pub generic_tables_supported: bool,
    /// Drop the connection instead of replying to the next invoke. Simulates
    /// the target dying mid-round-trip.
    pub drop_connection_on_invoke: bool,
    pub scene: MockScene,
}

impl Default for MockJdwpServerConfig {
    fn default() -> Self {
        Self {
            id_sizes: JdwpIdSizes::default(),
            reply_delay: None,
            generic_tables_supported: true,
            drop_connection_on_invoke: false,
            scene: MockScene::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockInvokeCall {
    pub class_id: ReferenceTypeId,
    pub object_id: Option<ObjectId>,
    pub thread: ThreadId,
    pub method_id: MethodId,
    pub args: Vec<JdwpValue>,
    pub options: u32,
}

struct State {
    id_sizes: JdwpIdSizes,
    reply_delay: Option<Duration>,
    generic_tables_supported: bool,
    drop_connection_on_invoke: bool,

    threads: HashMap<ThreadId, String>,
    classes: HashMap<ReferenceTypeId, MockClass>,
    frames: Vec<MockFrame>,
    invoke_results: HashMap<String, MockInvokeResult>,

    suspend_counts: Mutex<HashMap<ThreadId, u32>>,
    object_classes: Mutex<HashMap<ObjectId, ReferenceTypeId>>,
    object_fields: Mutex<HashMap<ObjectId, HashMap<FieldId, JdwpValue>>>,
    static_fields: Mutex<HashMap<ReferenceTypeId, HashMap<FieldId, JdwpValue>>>,
    arrays: Mutex<HashMap<ObjectId, MockArray>>,
    strings: Mutex<HashMap<ObjectId, String>>,
    frame_slots: Mutex<HashMap<(ThreadId, FrameId), HashMap<u32, JdwpValue>>>,
    pinned: Mutex<HashSet<ObjectId>>,

    created_strings: Mutex<Vec<(ObjectId, String)>>,
    invoke_calls: Mutex<Vec<MockInvokeCall>>,
    frame_writes: Mutex<Vec<(ThreadId, FrameId, u32, JdwpValue)>>,
    field_writes: Mutex<Vec<(ObjectId, FieldId, JdwpValue)>>,
    commands_served: AtomicU32,
    next_object_id: AtomicU64,
}

impl State {
    fn new(config: MockJdwpServerConfig) -> Self {
        let MockJdwpServerConfig {
            id_sizes,
            reply_delay,
            generic_tables_supported,
            drop_connection_on_invoke,
            scene,
        } = config;

        let mut threads = HashMap::new();
        let mut suspend_counts = HashMap::new();
        for thread in scene.threads {
            threads.insert(thread.id, thread.name);
            suspend_counts.insert(thread.id, thread.suspend_count);
        }

        let mut classes = HashMap::new();
        let mut static_fields: HashMap<ReferenceTypeId, HashMap<FieldId, JdwpValue>> =
            HashMap::new();
        for class in scene.classes {
            let statics = class
                .fields
                .iter()
                .filter(|f| f.mod_bits & 0x0008 != 0)
                .map(|f| (f.id, f.value))
                .collect();
            static_fields.insert(class.id, statics);
            classes.insert(class.id, class);
        }

        let mut object_classes = HashMap::new();
        let mut object_fields: HashMap<ObjectId, HashMap<FieldId, JdwpValue>> = HashMap::new();
        for object in scene.objects {
            object_classes.insert(object.id, object.class_id);
            let mut values = HashMap::new();
            // Walk the hierarchy so inherited instance fields get defaults
            // too.
            let mut cursor = Some(object.class_id);
            while let Some(class_id) = cursor {
                let Some(class) = classes.get(&class_id) else { break };
                for field in class.fields.iter().filter(|f| f.mod_bits & 0x0008 == 0) {
                    values.entry(field.id).or_insert(field.value);
                }
                cursor = class.superclass;
            }
            for (name, value) in object.fields {
                let field_id = classes
                    .values()
                    .flat_map(|c| c.fields.iter())
                    .find(|f| f.name == name)
                    .map(|f| f.id);
                if let Some(field_id) = field_id {
                    values.insert(field_id, value);
                }
            }
            object_fields.insert(object.id, values);
        }

        let mut arrays = HashMap::new();
        for array in scene.arrays {
            object_classes.insert(array.id, array.class_id);
            arrays.insert(array.id, array);
        }

        let mut strings = HashMap::new();
        for (id, text) in scene.strings {
            object_classes.insert(id, STRING_CLASS_ID);
            strings.insert(id, text);
        }

        let mut frame_slots = HashMap::new();
        for frame in &scene.frames {
            frame_slots.insert(
                (frame.thread, frame.frame_id),
                frame.slots.iter().copied().collect::<HashMap<_, _>>(),
            );
        }

        Self {
            id_sizes,
            reply_delay,
            generic_tables_supported,
            drop_connection_on_invoke,
            threads,
            classes,
            frames: scene.frames,
            invoke_results: scene.invoke_results,
            suspend_counts: Mutex::new(suspend_counts),
            object_classes: Mutex::new(object_classes),
            object_fields: Mutex::new(object_fields),
            static_fields: Mutex::new(static_fields),
            arrays: Mutex::new(arrays),
            strings: Mutex::new(strings),
            frame_slots: Mutex::new(frame_slots),
            pinned: Mutex::new(HashSet::new()),
            created_strings: Mutex::new(Vec::new()),
            invoke_calls: Mutex::new(Vec::new()),
            frame_writes: Mutex::new(Vec::new()),
            field_writes: Mutex::new(Vec::new()),
            commands_served: AtomicU32::new(0),
            next_object_id: AtomicU64::new(FIRST_ALLOCATED_ID),
        }
    }

    fn alloc_object_id(&self) -> ObjectId {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    fn find_method(&self, method_id: MethodId) -> Option<(&MockClass, &MockMethod)> {
        self.classes.values().find_map(|class| {
            class
                .methods
                .iter()
                .find(|m| m.id == method_id)
                .map(|m| (class, m))
        })
    }

    fn find_field(&self, field_id: FieldId) -> Option<&MockField> {
        self.classes
            .values()
            .flat_map(|c| c.fields.iter())
            .find(|f| f.id == field_id)
    }

    fn find_frame(&self, thread: ThreadId, frame_id: FrameId) -> Option<&MockFrame> {
        self.frames
            .iter()
            .find(|f| f.thread == thread && f.frame_id == frame_id)
    }
}

pub struct MockJdwpServer {
    addr: SocketAddr,
    state: Arc<State>,
    shutdown: CancellationToken,
}

impl MockJdwpServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(MockJdwpServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockJdwpServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::new(config));
        let shutdown = CancellationToken::new();

        tokio::spawn(run(listener, state.clone(), shutdown.clone()));

        Ok(Self { addr, state, shutdown })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn commands_served(&self) -> u32 {
        self.state.commands_served.load(Ordering::Relaxed)
    }

    pub async fn suspend_count(&self, thread: ThreadId) -> u32 {
        self.state
            .suspend_counts
            .lock()
            .await
            .get(&thread)
            .copied()
            .unwrap_or(0)
    }

    pub async fn created_strings(&self) -> Vec<(ObjectId, String)> {
        self.state.created_strings.lock().await.clone()
    }

    pub async fn invoke_calls(&self) -> Vec<MockInvokeCall> {
        self.state.invoke_calls.lock().await.clone()
    }

    pub async fn frame_writes(&self) -> Vec<(ThreadId, FrameId, u32, JdwpValue)> {
        self.state.frame_writes.lock().await.clone()
    }

    pub async fn field_writes(&self) -> Vec<(ObjectId, FieldId, JdwpValue)> {
        self.state.field_writes.lock().await.clone()
    }

    pub async fn pinned_objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.state.pinned.lock().await.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn string_text(&self, id: ObjectId) -> Option<String> {
        self.state.strings.lock().await.get(&id).cloned()
    }

    pub async fn array_values(&self, id: ObjectId) -> Option<Vec<JdwpValue>> {
        self.state.arrays.lock().await.get(&id).map(|a| a.values.clone())
    }

    pub async fn object_field(&self, object_id: ObjectId, name: &str) -> Option<JdwpValue> {
        let field = self
            .state
            .classes
            .values()
            .flat_map(|c| c.fields.iter())
            .find(|f| f.name == name)?;
        self.state
            .object_fields
            .lock()
            .await
            .get(&object_id)?
            .get(&field.id)
            .copied()
    }

    pub async fn static_field(&self, class_id: ReferenceTypeId, name: &str) -> Option<JdwpValue> {
        let field = self
            .state
            .classes
            .get(&class_id)?
            .fields
            .iter()
            .find(|f| f.name == name)?;
        self.state
            .static_fields
            .lock()
            .await
            .get(&class_id)?
            .get(&field.id)
            .copied()
    }
}

impl Drop for MockJdwpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        accept = listener.accept() => {
            let (mut socket, _) = accept?;

            // Debugger sends the handshake; the server echoes it back.
            let mut hs = [0u8; HANDSHAKE.len()];
            socket.read_exact(&mut hs).await?;
            if hs != *HANDSHAKE {
                return Ok(());
            }
            socket.write_all(HANDSHAKE).await?;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    res = read_packet(&mut socket) => {
                        let Some(packet) = res? else {
                            return Ok(());
                        };
                        if !handle_packet(&mut socket, &state, packet).await? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

struct Packet {
    id: u32,
    command_set: u8,
    command: u8,
    payload: Vec<u8>,
}

async fn read_packet(socket: &mut tokio::net::TcpStream) -> std::io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_n) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Ok(None);
    }
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];
    if flags != 0 {
        // Only debugger-to-target commands are expected here.
        return Ok(None);
    }
    let command_set = header[9];
    let command = header[10];
    let mut payload = vec![0u8; length - HEADER_LEN];
    socket.read_exact(&mut payload).await?;
    Ok(Some(Packet {
        id,
        command_set,
        command,
        payload,
    }))
}

/// Serve one command. Returns `false` when the connection should drop
/// without a reply.
async fn handle_packet(
    socket: &mut tokio::net::TcpStream,
    state: &Arc<State>,
    packet: Packet,
) -> std::io::Result<bool> {
    state.commands_served.fetch_add(1, Ordering::Relaxed);

    let Some((error_code, payload)) = dispatch(state, &packet).await else {
        return Ok(false);
    };

    if let Some(delay) = state.reply_delay {
        tokio::time::sleep(delay).await;
    }

    let reply = encode_reply(packet.id, error_code, &payload);
    socket.write_all(&reply).await?;
    Ok(true)
}

/// `(error_code, payload)` for a command, or `None` to drop the connection.
async fn dispatch(state: &State, packet: &Packet) -> Option<(u16, Vec<u8>)> {
    let sizes = &state.id_sizes;
    let mut r = JdwpReader::new(&packet.payload);

    let reply = match (packet.command_set, packet.command) {
        // VirtualMachine.IDSizes
        (1, 7) => {
            let mut w = JdwpWriter::new();
            w.write_u32(sizes.field_id as u32);
            w.write_u32(sizes.method_id as u32);
            w.write_u32(sizes.object_id as u32);
            w.write_u32(sizes.reference_type_id as u32);
            w.write_u32(sizes.frame_id as u32);
            (0, w.into_vec())
        }
        // VirtualMachine.ClassesBySignature
        (1, 2) => {
            let Ok(signature) = r.read_string() else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            let matches: Vec<&MockClass> = state
                .classes
                .values()
                .filter(|c| c.signature == signature)
                .collect();
            w.write_u32(matches.len() as u32);
            for class in matches {
                let ref_type_tag = if class.signature.starts_with('[') {
                    TYPE_TAG_ARRAY
                } else {
                    TYPE_TAG_CLASS
                };
                w.write_u8(ref_type_tag);
                w.write_reference_type_id(class.id, sizes);
                w.write_u32(CLASS_STATUS_PREPARED);
            }
            (0, w.into_vec())
        }
        // VirtualMachine.AllThreads
        (1, 4) => {
            let mut ids: Vec<ThreadId> = state.threads.keys().copied().collect();
            ids.sort_unstable();
            let mut w = JdwpWriter::new();
            w.write_u32(ids.len() as u32);
            for id in ids {
                w.write_object_id(id, sizes);
            }
            (0, w.into_vec())
        }
        // VirtualMachine.CreateString
        (1, 11) => {
            let Ok(text) = r.read_string() else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let id = state.alloc_object_id();
            state.strings.lock().await.insert(id, text.clone());
            state
                .object_classes
                .lock()
                .await
                .insert(id, STRING_CLASS_ID);
            state.created_strings.lock().await.push((id, text));
            let mut w = JdwpWriter::new();
            w.write_object_id(id, sizes);
            (0, w.into_vec())
        }
        // ReferenceType.Signature
        (2, 1) => {
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            match state.classes.get(&class_id) {
                Some(class) => {
                    let mut w = JdwpWriter::new();
                    w.write_string(&class.signature);
                    (0, w.into_vec())
                }
                None => (error_codes::INVALID_CLASS, Vec::new()),
            }
        }
        // ReferenceType.Fields / FieldsWithGeneric
        (2, 4) | (2, 14) => {
            let with_generic = packet.command == 14;
            if with_generic && !state.generic_tables_supported {
                return Some((error_codes::NOT_IMPLEMENTED, Vec::new()));
            }
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let Some(class) = state.classes.get(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(class.fields.len() as u32);
            for field in &class.fields {
                w.write_id(field.id, sizes.field_id);
                w.write_string(&field.name);
                w.write_string(&field.signature);
                if with_generic {
                    w.write_string(field.generic_signature.as_deref().unwrap_or(""));
                }
                w.write_u32(field.mod_bits);
            }
            (0, w.into_vec())
        }
        // ReferenceType.Methods
        (2, 5) => {
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let Some(class) = state.classes.get(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(class.methods.len() as u32);
            for method in &class.methods {
                w.write_id(method.id, sizes.method_id);
                w.write_string(&method.name);
                w.write_string(&method.signature);
                w.write_u32(method.mod_bits);
            }
            (0, w.into_vec())
        }
        // ReferenceType.GetValues (statics)
        (2, 6) => {
            let res = (|| {
                let class_id = r.read_reference_type_id(sizes)?;
                let count = r.read_u32()? as usize;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(r.read_id(sizes.field_id)?);
                }
                Ok::<_, crate::types::JdwpError>((class_id, ids))
            })();
            let Ok((class_id, ids)) = res else {
                return Some((error_codes::INVALID_FIELDID, Vec::new()));
            };
            let statics = state.static_fields.lock().await;
            let Some(class_statics) = statics.get(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(ids.len() as u32);
            for id in ids {
                let Some(value) = class_statics.get(&id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                w.write_tagged_value(value, sizes);
            }
            (0, w.into_vec())
        }
        // ReferenceType.ClassObject
        (2, 11) => {
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            if !state.classes.contains_key(&class_id) {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            }
            let mut w = JdwpWriter::new();
            w.write_object_id(class_id + CLASS_OBJECT_OFFSET, sizes);
            (0, w.into_vec())
        }
        // ClassType.Superclass
        (3, 1) => {
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let Some(class) = state.classes.get(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_reference_type_id(class.superclass.unwrap_or(0), sizes);
            (0, w.into_vec())
        }
        // ClassType.SetValues (statics; untagged values)
        (3, 2) => {
            let Ok(class_id) = r.read_reference_type_id(sizes) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let Ok(count) = r.read_u32() else {
                return Some((error_codes::INVALID_FIELDID, Vec::new()));
            };
            let mut writes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let Ok(field_id) = r.read_id(sizes.field_id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                let Some(field) = state.find_field(field_id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                let tag_byte = signature_to_tag(&field.signature);
                let Ok(value) = r.read_value(tag_byte, sizes) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                writes.push((field_id, value));
            }
            let mut statics = state.static_fields.lock().await;
            let Some(class_statics) = statics.get_mut(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            for (field_id, value) in writes {
                class_statics.insert(field_id, value);
                state.field_writes.lock().await.push((0, field_id, value));
            }
            (0, Vec::new())
        }
        // ClassType.InvokeMethod / ClassType.NewInstance
        (3, 3) | (3, 4) => {
            let res = (|| {
                let class_id = r.read_reference_type_id(sizes)?;
                let thread = r.read_object_id(sizes)?;
                let method_id = r.read_id(sizes.method_id)?;
                let count = r.read_u32()? as usize;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(r.read_tagged_value(sizes)?);
                }
                let options = r.read_u32()?;
                Ok::<_, crate::types::JdwpError>((class_id, thread, method_id, args, options))
            })();
            let Ok((class_id, thread, method_id, args, options)) = res else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            return invoke(state, class_id, None, thread, method_id, args, options, packet.command == 4)
                .await;
        }
        // ArrayType.NewInstance
        (4, 1) => {
            let res = (|| {
                let class_id = r.read_reference_type_id(sizes)?;
                let length = r.read_i32()?;
                Ok::<_, crate::types::JdwpError>((class_id, length))
            })();
            let Ok((class_id, length)) = res else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let Some(class) = state.classes.get(&class_id) else {
                return Some((error_codes::INVALID_CLASS, Vec::new()));
            };
            let element_tag = class.signature.as_bytes().get(1).copied().unwrap_or(tag::OBJECT);
            let default = default_value_for_tag(element_tag);
            let id = state.alloc_object_id();
            state.arrays.lock().await.insert(
                id,
                MockArray {
                    id,
                    class_id,
                    element_tag,
                    values: vec![default; length.max(0) as usize],
                },
            );
            state.object_classes.lock().await.insert(id, class_id);
            let mut w = JdwpWriter::new();
            w.write_tagged_object_id(tag::ARRAY, id, sizes);
            (0, w.into_vec())
        }
        // Method.LineTable
        (6, 1) => {
            let res = (|| {
                let class_id = r.read_reference_type_id(sizes)?;
                let method_id = r.read_id(sizes.method_id)?;
                Ok::<_, crate::types::JdwpError>((class_id, method_id))
            })();
            let Ok((_class_id, method_id)) = res else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            let Some((_, method)) = state.find_method(method_id) else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            if method.line_table.is_empty() {
                return Some((error_codes::ABSENT_INFORMATION, Vec::new()));
            }
            let mut w = JdwpWriter::new();
            w.write_u64(method.line_table.first().map(|(i, _)| *i).unwrap_or(0));
            w.write_u64(method.line_table.last().map(|(i, _)| *i + 4).unwrap_or(0));
            w.write_u32(method.line_table.len() as u32);
            for (code_index, line) in &method.line_table {
                w.write_u64(*code_index);
                w.write_i32(*line);
            }
            (0, w.into_vec())
        }
        // Method.VariableTable / VariableTableWithGeneric
        (6, 2) | (6, 5) => {
            let with_generic = packet.command == 5;
            if with_generic && !state.generic_tables_supported {
                return Some((error_codes::NOT_IMPLEMENTED, Vec::new()));
            }
            let res = (|| {
                let class_id = r.read_reference_type_id(sizes)?;
                let method_id = r.read_id(sizes.method_id)?;
                Ok::<_, crate::types::JdwpError>((class_id, method_id))
            })();
            let Ok((_class_id, method_id)) = res else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            let Some((_, method)) = state.find_method(method_id) else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(0); // arg count (slots), unused by the client
            w.write_u32(method.variables.len() as u32);
            for var in &method.variables {
                w.write_u64(var.code_index);
                w.write_string(&var.name);
                w.write_string(&var.signature);
                if with_generic {
                    w.write_string(var.generic_signature.as_deref().unwrap_or(""));
                }
                w.write_u32(var.length);
                w.write_u32(var.slot);
            }
            (0, w.into_vec())
        }
        // ObjectReference.ReferenceType
        (9, 1) => {
            let Ok(object_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let classes = state.object_classes.lock().await;
            let Some(class_id) = classes.get(&object_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let is_array = state
                .classes
                .get(class_id)
                .map(|c| c.signature.starts_with('['))
                .unwrap_or(false);
            let mut w = JdwpWriter::new();
            w.write_u8(if is_array { TYPE_TAG_ARRAY } else { TYPE_TAG_CLASS });
            w.write_reference_type_id(*class_id, sizes);
            (0, w.into_vec())
        }
        // ObjectReference.GetValues
        (9, 2) => {
            let res = (|| {
                let object_id = r.read_object_id(sizes)?;
                let count = r.read_u32()? as usize;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(r.read_id(sizes.field_id)?);
                }
                Ok::<_, crate::types::JdwpError>((object_id, ids))
            })();
            let Ok((object_id, ids)) = res else {
                return Some((error_codes::INVALID_FIELDID, Vec::new()));
            };
            let objects = state.object_fields.lock().await;
            let Some(fields) = objects.get(&object_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(ids.len() as u32);
            for id in ids {
                let Some(value) = fields.get(&id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                w.write_tagged_value(value, sizes);
            }
            (0, w.into_vec())
        }
        // ObjectReference.SetValues (untagged values)
        (9, 3) => {
            let Ok(object_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let Ok(count) = r.read_u32() else {
                return Some((error_codes::INVALID_FIELDID, Vec::new()));
            };
            let mut writes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let Ok(field_id) = r.read_id(sizes.field_id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                let Some(field) = state.find_field(field_id) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                let tag_byte = signature_to_tag(&field.signature);
                let Ok(value) = r.read_value(tag_byte, sizes) else {
                    return Some((error_codes::INVALID_FIELDID, Vec::new()));
                };
                writes.push((field_id, value));
            }
            let mut objects = state.object_fields.lock().await;
            let Some(fields) = objects.get_mut(&object_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            for (field_id, value) in writes {
                fields.insert(field_id, value);
                state
                    .field_writes
                    .lock()
                    .await
                    .push((object_id, field_id, value));
            }
            (0, Vec::new())
        }
        // ObjectReference.InvokeMethod
        (9, 6) => {
            let res = (|| {
                let object_id = r.read_object_id(sizes)?;
                let thread = r.read_object_id(sizes)?;
                let class_id = r.read_reference_type_id(sizes)?;
                let method_id = r.read_id(sizes.method_id)?;
                let count = r.read_u32()? as usize;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(r.read_tagged_value(sizes)?);
                }
                let options = r.read_u32()?;
                Ok::<_, crate::types::JdwpError>((
                    object_id, thread, class_id, method_id, args, options,
                ))
            })();
            let Ok((object_id, thread, class_id, method_id, args, options)) = res else {
                return Some((error_codes::INVALID_METHODID, Vec::new()));
            };
            return invoke(
                state,
                class_id,
                Some(object_id),
                thread,
                method_id,
                args,
                options,
                false,
            )
            .await;
        }
        // ObjectReference.DisableCollection
        (9, 7) => {
            let Ok(object_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            state.pinned.lock().await.insert(object_id);
            (0, Vec::new())
        }
        // ObjectReference.EnableCollection
        (9, 8) => {
            let Ok(object_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            state.pinned.lock().await.remove(&object_id);
            (0, Vec::new())
        }
        // StringReference.Value
        (10, 1) => {
            let Ok(string_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let strings = state.strings.lock().await;
            let Some(text) = strings.get(&string_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_string(text);
            (0, w.into_vec())
        }
        // ThreadReference.Name
        (11, 1) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            let Some(name) = state.threads.get(&thread) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_string(name);
            (0, w.into_vec())
        }
        // ThreadReference.Suspend
        (11, 2) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            if !state.threads.contains_key(&thread) {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            }
            let mut counts = state.suspend_counts.lock().await;
            *counts.entry(thread).or_insert(0) += 1;
            (0, Vec::new())
        }
        // ThreadReference.Resume
        (11, 3) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            let mut counts = state.suspend_counts.lock().await;
            let Some(count) = counts.get_mut(&thread) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            *count = count.saturating_sub(1);
            (0, Vec::new())
        }
        // ThreadReference.Status
        (11, 4) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            if !state.threads.contains_key(&thread) {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            }
            let suspended = state
                .suspend_counts
                .lock()
                .await
                .get(&thread)
                .copied()
                .unwrap_or(0)
                > 0;
            let mut w = JdwpWriter::new();
            w.write_u32(1); // RUNNING
            w.write_u32(u32::from(suspended));
            (0, w.into_vec())
        }
        // ThreadReference.Frames
        (11, 6) => {
            let res = (|| {
                let thread = r.read_object_id(sizes)?;
                let start = r.read_i32()?;
                let length = r.read_i32()?;
                Ok::<_, crate::types::JdwpError>((thread, start, length))
            })();
            let Ok((thread, start, length)) = res else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            if !state.threads.contains_key(&thread) {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            }
            let frames: Vec<&MockFrame> = state
                .frames
                .iter()
                .filter(|f| f.thread == thread)
                .skip(start.max(0) as usize)
                .take(if length < 0 { usize::MAX } else { length as usize })
                .collect();
            let mut w = JdwpWriter::new();
            w.write_u32(frames.len() as u32);
            for frame in frames {
                w.write_frame_id(frame.frame_id, sizes);
                w.write_location(
                    &Location {
                        type_tag: TYPE_TAG_CLASS,
                        class_id: frame.class_id,
                        method_id: frame.method_id,
                        index: frame.code_index,
                    },
                    sizes,
                );
            }
            (0, w.into_vec())
        }
        // ThreadReference.FrameCount
        (11, 7) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            if !state.threads.contains_key(&thread) {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            }
            let count = state.frames.iter().filter(|f| f.thread == thread).count();
            let mut w = JdwpWriter::new();
            w.write_u32(count as u32);
            (0, w.into_vec())
        }
        // ThreadReference.SuspendCount
        (11, 12) => {
            let Ok(thread) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_THREAD, Vec::new()));
            };
            let count = state
                .suspend_counts
                .lock()
                .await
                .get(&thread)
                .copied()
                .unwrap_or(0);
            let mut w = JdwpWriter::new();
            w.write_u32(count);
            (0, w.into_vec())
        }
        // ArrayReference.Length
        (13, 1) => {
            let Ok(array_id) = r.read_object_id(sizes) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let arrays = state.arrays.lock().await;
            let Some(array) = arrays.get(&array_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_i32(array.values.len() as i32);
            (0, w.into_vec())
        }
        // ArrayReference.GetValues
        (13, 2) => {
            let res = (|| {
                let array_id = r.read_object_id(sizes)?;
                let first = r.read_i32()?;
                let length = r.read_i32()?;
                Ok::<_, crate::types::JdwpError>((array_id, first, length))
            })();
            let Ok((array_id, first, length)) = res else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let arrays = state.arrays.lock().await;
            let Some(array) = arrays.get(&array_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let first = first.max(0) as usize;
            let length = length.max(0) as usize;
            if first + length > array.values.len() {
                return Some((error_codes::INVALID_LENGTH, Vec::new()));
            }
            let mut w = JdwpWriter::new();
            w.write_u8(array.element_tag);
            w.write_u32(length as u32);
            for value in &array.values[first..first + length] {
                if tag::is_primitive(array.element_tag) {
                    w.write_value(value, sizes);
                } else {
                    w.write_tagged_value(value, sizes);
                }
            }
            (0, w.into_vec())
        }
        // ArrayReference.SetValues (untagged element values)
        (13, 3) => {
            let res = (|| {
                let array_id = r.read_object_id(sizes)?;
                let first = r.read_i32()?;
                let count = r.read_u32()? as usize;
                Ok::<_, crate::types::JdwpError>((array_id, first, count))
            })();
            let Ok((array_id, first, count)) = res else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let mut arrays = state.arrays.lock().await;
            let Some(array) = arrays.get_mut(&array_id) else {
                return Some((error_codes::INVALID_OBJECT, Vec::new()));
            };
            let first = first.max(0) as usize;
            if first + count > array.values.len() {
                return Some((error_codes::INVALID_LENGTH, Vec::new()));
            }
            for i in 0..count {
                let Ok(value) = r.read_value(array.element_tag, sizes) else {
                    return Some((error_codes::INVALID_LENGTH, Vec::new()));
                };
                array.values[first + i] = value;
            }
            (0, Vec::new())
        }
        // StackFrame.GetValues
        (16, 1) => {
            let res = (|| {
                let thread = r.read_object_id(sizes)?;
                let frame_id = r.read_frame_id(sizes)?;
                let count = r.read_u32()? as usize;
                let mut slots = Vec::with_capacity(count);
                for _ in 0..count {
                    let slot = r.read_u32()?;
                    let _sig_byte = r.read_u8()?;
                    slots.push(slot);
                }
                Ok::<_, crate::types::JdwpError>((thread, frame_id, slots))
            })();
            let Ok((thread, frame_id, slots)) = res else {
                return Some((error_codes::INVALID_SLOT, Vec::new()));
            };
            let frame_slots = state.frame_slots.lock().await;
            let Some(values) = frame_slots.get(&(thread, frame_id)) else {
                return Some((error_codes::INVALID_FRAMEID, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            w.write_u32(slots.len() as u32);
            for slot in slots {
                let Some(value) = values.get(&slot) else {
                    return Some((error_codes::INVALID_SLOT, Vec::new()));
                };
                w.write_tagged_value(value, sizes);
            }
            (0, w.into_vec())
        }
        // StackFrame.SetValues (tagged slot values)
        (16, 2) => {
            let res = (|| {
                let thread = r.read_object_id(sizes)?;
                let frame_id = r.read_frame_id(sizes)?;
                let count = r.read_u32()? as usize;
                let mut writes = Vec::with_capacity(count);
                for _ in 0..count {
                    let slot = r.read_u32()?;
                    let value = r.read_tagged_value(sizes)?;
                    writes.push((slot, value));
                }
                Ok::<_, crate::types::JdwpError>((thread, frame_id, writes))
            })();
            let Ok((thread, frame_id, writes)) = res else {
                return Some((error_codes::INVALID_SLOT, Vec::new()));
            };
            let mut frame_slots = state.frame_slots.lock().await;
            let Some(values) = frame_slots.get_mut(&(thread, frame_id)) else {
                return Some((error_codes::INVALID_FRAMEID, Vec::new()));
            };
            for (slot, value) in writes {
                values.insert(slot, value);
                state
                    .frame_writes
                    .lock()
                    .await
                    .push((thread, frame_id, slot, value));
            }
            (0, Vec::new())
        }
        // StackFrame.ThisObject
        (16, 3) => {
            let res = (|| {
                let thread = r.read_object_id(sizes)?;
                let frame_id = r.read_frame_id(sizes)?;
                Ok::<_, crate::types::JdwpError>((thread, frame_id))
            })();
            let Ok((thread, frame_id)) = res else {
                return Some((error_codes::INVALID_FRAMEID, Vec::new()));
            };
            let Some(frame) = state.find_frame(thread, frame_id) else {
                return Some((error_codes::INVALID_FRAMEID, Vec::new()));
            };
            let mut w = JdwpWriter::new();
            match frame.this_object {
                Some((tag_byte, id)) => w.write_tagged_object_id(tag_byte, id, sizes),
                None => w.write_tagged_object_id(tag::OBJECT, 0, sizes),
            }
            (0, w.into_vec())
        }
        _ => (error_codes::NOT_IMPLEMENTED, Vec::new()),
    };

    Some(reply)
}

/// Shared invoke path for ClassType.InvokeMethod, ClassType.NewInstance and
/// ObjectReference.InvokeMethod.
#[allow(clippy::too_many_arguments)]
async fn invoke(
    state: &State,
    class_id: ReferenceTypeId,
    object_id: Option<ObjectId>,
    thread: ThreadId,
    method_id: MethodId,
    args: Vec<JdwpValue>,
    options: u32,
    is_constructor: bool,
) -> Option<(u16, Vec<u8>)> {
    if state.drop_connection_on_invoke {
        return None;
    }

    let sizes = &state.id_sizes;
    let suspended = state
        .suspend_counts
        .lock()
        .await
        .get(&thread)
        .copied()
        .unwrap_or(0)
        > 0;
    if !suspended {
        return Some((error_codes::THREAD_NOT_SUSPENDED, Vec::new()));
    }

    let Some((_, method)) = state.find_method(method_id) else {
        return Some((error_codes::INVALID_METHODID, Vec::new()));
    };

    state.invoke_calls.lock().await.push(MockInvokeCall {
        class_id,
        object_id,
        thread,
        method_id,
        args: args.clone(),
        options,
    });

    let scripted = state.invoke_results.get(&method.name).cloned();
    let (value, exception) = match scripted {
        Some(result) => (result.value, result.exception),
        None if is_constructor => {
            let id = state.alloc_object_id();
            state.object_classes.lock().await.insert(id, class_id);
            let defaults = state
                .classes
                .get(&class_id)
                .map(|class| {
                    class
                        .fields
                        .iter()
                        .filter(|f| f.mod_bits & 0x0008 == 0)
                        .map(|f| (f.id, f.value))
                        .collect::<HashMap<_, _>>()
                })
                .unwrap_or_default();
            state.object_fields.lock().await.insert(id, defaults);
            (JdwpValue::Object { tag: tag::OBJECT, id }, 0)
        }
        // Unscripted plain invokes echo their first argument.
        None => (args.first().copied().unwrap_or(JdwpValue::Void), 0),
    };

    let mut w = JdwpWriter::new();
    if is_constructor && exception == 0 {
        // NewInstance replies with the new object, not a plain value.
        match value {
            JdwpValue::Object { tag: t, id } => w.write_tagged_object_id(t, id, sizes),
            _ => w.write_tagged_object_id(tag::OBJECT, 0, sizes),
        }
    } else {
        w.write_tagged_value(&value, sizes);
    }
    w.write_tagged_object_id(tag::OBJECT, exception, sizes);
    Some((0, w.into_vec()))
}

fn default_value_for_tag(tag_byte: u8) -> JdwpValue {
    match tag_byte {
        tag::BOOLEAN => JdwpValue::Boolean(false),
        tag::BYTE => JdwpValue::Byte(0),
        tag::CHAR => JdwpValue::Char(0),
        tag::SHORT => JdwpValue::Short(0),
        tag::INT => JdwpValue::Int(0),
        tag::LONG => JdwpValue::Long(0),
        tag::FLOAT => JdwpValue::Float(0.0),
        tag::DOUBLE => JdwpValue::Double(0.0),
        _ => JdwpValue::Null,
    }
}
