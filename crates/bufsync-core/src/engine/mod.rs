//! The bidirectional synchronization engine.
//!
//! All per-document and per-buffer bookkeeping lives in one [`EngineState`]
//! behind a plain mutex that is never held across an `.await`. Host edits
//! are forwarded under `change_lock` so they reach the external engine in
//! the order they happened; external edits are queued and applied by a
//! single drain worker per engine.

mod completion;
mod inbound;
mod outbound;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::host::{DocumentId, HostChangeEvent, HostEditor, HostError};
use crate::position::{editor_col_from_screen_col, Position};
use crate::repeat::RepeatChange;
use crate::rpc::{BufferId, ChangeRecord, EngineEvent, RpcChannel};

use completion::CompletionHandle;

pub use inbound::apply_change_record;
pub use outbound::{build_outbound_changes, OutboundBatch, OutboundChange};

#[derive(Default)]
struct EngineState {
    buffers: HashMap<BufferId, DocumentId>,
    documents: HashMap<DocumentId, BufferId>,
    /// Text the external engine is known to hold, per document.
    known_content: HashMap<DocumentId, String>,
    /// Ticks at or below the watermark were caused by our own writes.
    skip_ticks: HashMap<BufferId, u64>,
    /// Host versions at or below the watermark were caused by our own edits.
    skip_versions: HashMap<DocumentId, u64>,
    completions: HashMap<DocumentId, VecDeque<CompletionHandle>>,
    cursor_hints: HashMap<DocumentId, Position>,
    pending: VecDeque<(DocumentId, ChangeRecord)>,
    draining: bool,
    repeat: Option<RepeatChange>,
}

pub struct SyncEngine {
    host: Arc<dyn HostEditor>,
    rpc: Arc<dyn RpcChannel>,
    settings: SyncSettings,
    state: Mutex<EngineState>,
    change_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncEngine {
    pub fn new(host: Arc<dyn HostEditor>, rpc: Arc<dyn RpcChannel>, settings: SyncSettings) -> Arc<Self> {
        Arc::new(Self {
            host,
            rpc,
            settings,
            state: Mutex::new(EngineState::default()),
            change_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Buffer registry ──────────────────────────────────────────────

    /// Pair an external buffer with a host document whose text the buffer
    /// was initialized with.
    pub fn attach_buffer(&self, buffer: BufferId, document: DocumentId, text: impl Into<String>) {
        debug!("Init buffer content for buffer {}, document {}", buffer, document);
        let mut st = self.state();
        if let Some(previous) = st.documents.insert(document.clone(), buffer) {
            if previous != buffer {
                st.buffers.remove(&previous);
                st.skip_ticks.remove(&previous);
            }
        }
        st.buffers.insert(buffer, document.clone());
        st.known_content.insert(document, text.into());
    }

    pub fn detach_buffer(&self, buffer: BufferId) {
        let mut st = self.state();
        st.skip_ticks.remove(&buffer);
        if let Some(document) = st.buffers.remove(&buffer) {
            debug!("Detached buffer {} from {}", buffer, document);
            st.documents.remove(&document);
            st.known_content.remove(&document);
            st.skip_versions.remove(&document);
            st.cursor_hints.remove(&document);
        }
    }

    pub fn buffer_for_document(&self, document: &DocumentId) -> Option<BufferId> {
        self.state().documents.get(document).copied()
    }

    pub fn document_for_buffer(&self, buffer: BufferId) -> Option<DocumentId> {
        self.state().buffers.get(&buffer).cloned()
    }

    fn require_buffer(&self, document: &DocumentId) -> Result<BufferId> {
        self.buffer_for_document(document)
            .ok_or_else(|| SyncError::StaleDocument(document.to_string()))
    }

    fn require_document(&self, buffer: BufferId) -> Result<DocumentId> {
        self.document_for_buffer(buffer).ok_or(SyncError::StaleBuffer(buffer.0))
    }

    /// Map a screen cell the external engine reports for `buffer` onto a
    /// host position, expanding tabs with the configured tab size.
    pub fn host_position_from_screen(&self, buffer: BufferId, line: usize, screen_col: usize) -> Result<Position> {
        let document = self.require_document(buffer)?;
        let snapshot = self
            .host
            .snapshot(&document)
            .ok_or(SyncError::Host(HostError::DocumentClosed(document)))?;
        let text = snapshot.lines.get(line).map(String::as_str).unwrap_or("");
        let character = editor_col_from_screen_col(text, screen_col, self.settings.editor.tab_size);
        Ok(Position::new(line, character))
    }

    /// Last text the external engine is known to hold for `document`.
    pub fn known_content(&self, document: &DocumentId) -> Option<String> {
        self.state().known_content.get(document).cloned()
    }

    pub fn skip_tick(&self, buffer: BufferId) -> u64 {
        self.state().skip_ticks.get(&buffer).copied().unwrap_or(0)
    }

    pub fn skip_version(&self, document: &DocumentId) -> u64 {
        self.state().skip_versions.get(document).copied().unwrap_or(0)
    }

    // ── Completion signal ────────────────────────────────────────────

    /// Wait until every change record accepted for `document` so far has
    /// been applied. Fails if any of them was rejected by the host.
    pub async fn await_quiescence(&self, document: &DocumentId) -> Result<()> {
        let waiters: Vec<_> = {
            let st = self.state();
            match st.completions.get(document) {
                Some(queue) => queue.iter().map(CompletionHandle::waiter).collect(),
                None => return Ok(()),
            }
        };
        let outcomes = futures::future::join_all(waiters.into_iter().map(|w| w.wait())).await;
        if outcomes.into_iter().all(|resolved| resolved) {
            Ok(())
        } else {
            Err(SyncError::rejected(document))
        }
    }

    pub fn has_pending_changes(&self, document: &DocumentId) -> bool {
        self.state()
            .completions
            .get(document)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Cursor position left by the last applied external edit, handed out
    /// once.
    pub fn take_cursor_hint(&self, document: &DocumentId) -> Option<Position> {
        self.state().cursor_hints.remove(document)
    }

    /// Lock serializing outbound edits. Collaborators hold it to read the
    /// host document without racing an in-flight send.
    pub fn change_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.change_lock)
    }

    /// Accumulated insert-mode change awaiting replay, if any.
    pub fn repeat_change(&self) -> Option<RepeatChange> {
        self.state().repeat.clone()
    }

    // ── Event pumps ──────────────────────────────────────────────────

    pub fn handle_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::BufLines(record) => {
                self.on_change_record(record);
            }
            EngineEvent::Detached(buffer) => self.detach_buffer(buffer),
            EngineEvent::Notification { method, .. } => {
                debug!("Unhandled engine notification: {}", method);
            }
        }
    }

    /// Feed external engine events into the inbound pipe until the stream
    /// closes.
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                engine.handle_event(event);
            }
            debug!("Engine event stream closed");
        })
    }

    /// Forward host change events, one at a time and in arrival order.
    pub fn spawn_host_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<HostChangeEvent>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                engine.on_host_change(event).await;
            }
            debug!("Host event stream closed");
        })
    }
}
