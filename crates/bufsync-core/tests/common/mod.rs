#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bufsync_core::host::apply_edit_ops;
use bufsync_core::position::utf16_len;
use bufsync_core::rpc::methods;
use bufsync_core::{
    BufferId, ContentChange, DocumentId, DocumentSnapshot, EditOptions, Eol, HostChangeEvent, HostEditOp,
    HostEditor, HostError, Position, Range, RpcCall, RpcChannel, RpcError, Selection, SyncEngine, SyncSettings,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-memory host editor
// ============================================================================

struct Doc {
    version: u64,
    eol: Eol,
    lines: Vec<String>,
    anchor: Position,
    cursor: Position,
}

/// Host editor over plain line arrays. Applying an edit bumps the version
/// and drags the cursor to the origin, like a host whose edit replaced the
/// text under it.
#[derive(Default)]
pub struct MemoryHost {
    docs: Mutex<HashMap<DocumentId, Doc>>,
    active: Mutex<Option<DocumentId>>,
    insert_mode: AtomicBool,
    reject_edits: AtomicBool,
    select_after_edit: AtomicBool,
    hold_edits: AtomicBool,
    edit_started: Notify,
    edit_released: Notify,
    edits: Mutex<Vec<(DocumentId, Vec<HostEditOp>, EditOptions)>>,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self, document: &DocumentId, text: &str) {
        self.docs.lock().unwrap().insert(
            document.clone(),
            Doc {
                version: 1,
                eol: Eol::Lf,
                lines: Eol::Lf.split(text),
                anchor: Position::default(),
                cursor: Position::default(),
            },
        );
    }

    pub fn close(&self, document: &DocumentId) {
        self.docs.lock().unwrap().remove(document);
    }

    pub fn text(&self, document: &DocumentId) -> String {
        let docs = self.docs.lock().unwrap();
        let doc = &docs[document];
        doc.lines.join(doc.eol.as_str())
    }

    pub fn version(&self, document: &DocumentId) -> u64 {
        self.docs.lock().unwrap()[document].version
    }

    pub fn place_cursor(&self, document: &DocumentId, position: Position) {
        self.select(document, position, position);
    }

    pub fn select(&self, document: &DocumentId, anchor: Position, active: Position) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(document) {
            doc.anchor = anchor;
            doc.cursor = active;
        }
    }

    /// Leave the whole first line selected after each applied edit, like a
    /// host whose replace selects the inserted text.
    pub fn select_after_edit(&self, on: bool) {
        self.select_after_edit.store(on, Ordering::SeqCst);
    }

    /// Park every following edit inside `apply_edit` until released.
    pub fn hold_edits(&self) {
        self.hold_edits.store(true, Ordering::SeqCst);
    }

    pub fn release_edits(&self) {
        self.hold_edits.store(false, Ordering::SeqCst);
        self.edit_released.notify_one();
    }

    /// Resolves once a held edit has entered `apply_edit`.
    pub async fn edit_started(&self) {
        self.edit_started.notified().await;
    }

    pub fn activate(&self, document: &DocumentId) {
        *self.active.lock().unwrap() = Some(document.clone());
    }

    pub fn set_insert_mode(&self, on: bool) {
        self.insert_mode.store(on, Ordering::SeqCst);
    }

    pub fn reject_edits(&self, on: bool) {
        self.reject_edits.store(on, Ordering::SeqCst);
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }

    pub fn edits(&self) -> Vec<(DocumentId, Vec<HostEditOp>, EditOptions)> {
        self.edits.lock().unwrap().clone()
    }

    /// Simulate the user replacing `range` with `text` and return the change
    /// event the host would emit.
    pub fn user_edit(&self, document: &DocumentId, range: Range, text: &str) -> HostChangeEvent {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs.get_mut(document).unwrap();

        let eol_len = utf16_len(doc.eol.as_str());
        let offset = |pos: Position| -> usize {
            let before: usize = doc.lines[..pos.line].iter().map(|l| utf16_len(l) + eol_len).sum();
            before + pos.character
        };
        let range_offset = offset(range.start);
        let range_length = offset(range.end) - range_offset;

        doc.lines = apply_edit_ops(
            &doc.lines,
            &[HostEditOp::Replace {
                range,
                text: text.to_string(),
            }],
        );
        doc.version += 1;

        let lines: Vec<&str> = text.split('\n').collect();
        doc.cursor = if lines.len() == 1 {
            Position::new(range.start.line, range.start.character + utf16_len(text))
        } else {
            Position::new(range.start.line + lines.len() - 1, utf16_len(lines[lines.len() - 1]))
        };
        doc.anchor = doc.cursor;

        HostChangeEvent {
            document: document.clone(),
            version: doc.version,
            eol: doc.eol,
            changes: vec![ContentChange {
                range,
                range_offset,
                range_length,
                text: text.to_string(),
            }],
            text: doc.lines.join(doc.eol.as_str()),
        }
    }
}

#[async_trait]
impl HostEditor for MemoryHost {
    fn snapshot(&self, document: &DocumentId) -> Option<DocumentSnapshot> {
        self.docs.lock().unwrap().get(document).map(|doc| DocumentSnapshot {
            version: doc.version,
            eol: doc.eol,
            lines: doc.lines.clone(),
        })
    }

    async fn apply_edit(
        &self,
        document: &DocumentId,
        ops: Vec<HostEditOp>,
        options: EditOptions,
    ) -> Result<(), HostError> {
        tokio::task::yield_now().await;
        if self.hold_edits.load(Ordering::SeqCst) {
            self.edit_started.notify_one();
            self.edit_released.notified().await;
        }
        if self.reject_edits.load(Ordering::SeqCst) {
            return Err(HostError::Rejected("read-only".to_string()));
        }
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(document)
            .ok_or_else(|| HostError::DocumentClosed(document.clone()))?;
        doc.lines = apply_edit_ops(&doc.lines, &ops);
        doc.version += 1;
        doc.anchor = Position::default();
        doc.cursor = if self.select_after_edit.load(Ordering::SeqCst) {
            Position::new(0, utf16_len(&doc.lines[0]))
        } else {
            Position::default()
        };
        self.edits.lock().unwrap().push((document.clone(), ops, options));
        Ok(())
    }

    fn cursor(&self, document: &DocumentId) -> Option<Position> {
        self.docs.lock().unwrap().get(document).map(|doc| doc.cursor)
    }

    fn selection(&self, document: &DocumentId) -> Option<Selection> {
        self.docs.lock().unwrap().get(document).map(|doc| Selection {
            anchor: doc.anchor,
            active: doc.cursor,
        })
    }

    fn set_cursor(&self, document: &DocumentId, position: Position) {
        self.place_cursor(document, position);
    }

    fn active_cursor(&self, document: &DocumentId) -> Option<Position> {
        let active = self.active.lock().unwrap().clone();
        match active {
            Some(active) if &active == document => self.cursor(document),
            _ => None,
        }
    }

    fn is_insert_mode(&self) -> bool {
        self.insert_mode.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Recording RPC channel
// ============================================================================

/// RPC channel that records every call and answers from a canned table.
pub struct FakeRpc {
    requests: Mutex<Vec<(String, Vec<Value>)>>,
    batches: Mutex<Vec<Vec<RpcCall>>>,
    tick: AtomicU64,
    failing: Mutex<HashSet<String>>,
    responses: Mutex<HashMap<String, Value>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRpc {
    pub fn new() -> Arc<Self> {
        let responses = HashMap::from([
            (methods::GET_CURRENT_WIN.to_string(), json!(1000)),
            (methods::CREATE_BUF.to_string(), json!(7)),
            (methods::OPEN_WIN.to_string(), json!(1001)),
        ]);
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            tick: AtomicU64::new(5),
            failing: Mutex::new(HashSet::new()),
            responses: Mutex::new(responses),
            delay: Mutex::new(None),
        })
    }

    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    pub fn fail(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.responses.lock().unwrap().insert(method.to_string(), value);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Vec<Value>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<RpcCall>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcChannel for FakeRpc {
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.requests.lock().unwrap().push((method.to_string(), args));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(method) {
            return Err(RpcError::Transport(format!("{method} failed")));
        }
        if let Some(value) = self.responses.lock().unwrap().get(method) {
            return Ok(value.clone());
        }
        if method == methods::BUF_GET_CHANGEDTICK {
            return Ok(json!(self.tick.load(Ordering::SeqCst)));
        }
        Ok(Value::Null)
    }

    async fn call_atomic(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, String>>, RpcError> {
        let results = calls.iter().map(|_| Ok(Value::Null)).collect();
        self.batches.lock().unwrap().push(calls);
        Ok(results)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub host: Arc<MemoryHost>,
    pub rpc: Arc<FakeRpc>,
    pub engine: Arc<SyncEngine>,
    pub doc: DocumentId,
    pub buffer: BufferId,
}

impl Harness {
    /// One document with `text`, attached to buffer 1.
    pub fn new(text: &str) -> Self {
        Self::with_settings(text, SyncSettings::default())
    }

    pub fn with_settings(text: &str, settings: SyncSettings) -> Self {
        init_tracing();
        let host = MemoryHost::new();
        let rpc = FakeRpc::new();
        let engine = SyncEngine::new(host.clone(), rpc.clone(), settings);
        let doc = DocumentId::new("file:///test.txt");
        let buffer = BufferId(1);
        host.open(&doc, text);
        engine.attach_buffer(buffer, doc.clone(), text);
        Self {
            host,
            rpc,
            engine,
            doc,
            buffer,
        }
    }
}
