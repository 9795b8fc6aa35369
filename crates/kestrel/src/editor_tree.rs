//
// editor_tree.rs
//
// Live syntax tree for an edited document. The owning thread applies edits
// and triggers rebuilds; parsing runs on the rayon pool and finished
// documents are published through a watch channel, so readers only ever see
// complete, immutable snapshots.
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ropey::Rope;
use tokio::sync::watch;

use crate::ast::Ast;
use crate::ast_builder;
use crate::config::TreeConfig;
use crate::perf::TimingGuard;
use crate::tokenizer::{relex, tokenize_all, DirtyRange, Token};

/// A fully built snapshot: text, tokens and tree for one document version.
#[derive(Debug)]
pub struct ParsedDocument {
    pub version: u64,
    pub text: Arc<str>,
    pub tokens: Vec<Token>,
    pub ast: Ast,
}

impl ParsedDocument {
    pub fn parse(version: u64, text: Arc<str>) -> Self {
        let tokens = tokenize_all(&text);
        let ast = ast_builder::build(&text, &tokens);
        Self {
            version,
            text,
            tokens,
            ast,
        }
    }

    /// Build `text` reusing `base`'s tokens outside `dirty`.
    fn reparse(base: &ParsedDocument, version: u64, text: Arc<str>, dirty: DirtyRange) -> Self {
        let tokens = relex(&base.tokens, &text, dirty);
        let ast = ast_builder::build(&text, &tokens);
        Self {
            version,
            text,
            tokens,
            ast,
        }
    }
}

/// Work item handed to the rebuild worker.
struct BuildRequest {
    version: u64,
    rope: Rope,
    base: Arc<ParsedDocument>,
    dirty: Option<DirtyRange>,
    incremental: bool,
}

impl BuildRequest {
    fn run(self) -> ParsedDocument {
        let _guard = TimingGuard::new("editor_tree.rebuild");
        let text: Arc<str> = Arc::from(self.rope.to_string());
        match self.dirty {
            Some(dirty) if self.incremental => {
                ParsedDocument::reparse(&self.base, self.version, text, dirty)
            }
            _ => ParsedDocument::parse(self.version, text),
        }
    }
}

#[derive(Default)]
struct WorkerSlot {
    /// Newest request not yet picked up. Older queued requests are replaced.
    queued: Option<BuildRequest>,
    running: bool,
}

/// State shared between the owner, the rebuild worker and readers.
struct Shared {
    sender: watch::Sender<Arc<ParsedDocument>>,
    /// Newest version the owner has produced.
    latest: AtomicU64,
    /// Version of the published document; guards the publish step.
    published: Mutex<u64>,
    published_changed: Condvar,
    worker: Mutex<WorkerSlot>,
}

impl Shared {
    /// Publish `document` if it is still the newest version. Superseded
    /// results are dropped.
    fn publish(&self, document: ParsedDocument) -> bool {
        let mut published = lock(&self.published);
        let latest = self.latest.load(Ordering::Acquire);
        if document.version != latest || document.version <= *published {
            log::trace!(
                "discarding rebuild of version {} (latest {}, published {})",
                document.version,
                latest,
                *published
            );
            return false;
        }
        *published = document.version;
        log::trace!(
            "publishing version {} ({} tokens, {} nodes)",
            document.version,
            document.tokens.len(),
            document.ast.len()
        );
        self.sender.send_replace(Arc::new(document));
        drop(published);
        self.published_changed.notify_all();
        true
    }

    /// Worker loop: build queued requests until the slot is empty.
    fn drain(self: Arc<Self>) {
        loop {
            let request = {
                let mut slot = lock(&self.worker);
                match slot.queued.take() {
                    Some(request) => request,
                    None => {
                        slot.running = false;
                        return;
                    }
                }
            };
            if request.version < self.latest.load(Ordering::Acquire) {
                log::trace!("skipping superseded rebuild of version {}", request.version);
                continue;
            }
            let document = request.run();
            self.publish(document);
        }
    }

    fn wait_for_published(&self, version: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut published = lock(&self.published);
        while *published < version {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            published = self
                .published_changed
                .wait_timeout(published, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The authoritative tree for one document.
///
/// Mutation needs `&mut self`, so exactly one owner can edit at a time; the
/// owner may move the tree to another thread. Readers use [`TreeReader`]
/// handles, which observe published snapshots only.
pub struct EditorTree {
    rope: Rope,
    version: u64,
    /// Edits not yet folded into the published document, tagged with the
    /// version they produced.
    edits: Vec<(u64, DirtyRange)>,
    /// Newest version handed to the worker.
    dispatched: u64,
    shared: Arc<Shared>,
    config: TreeConfig,
}

impl EditorTree {
    pub fn new(text: &str) -> Self {
        Self::with_config(text, TreeConfig::default())
    }

    pub fn with_config(text: &str, config: TreeConfig) -> Self {
        let document = ParsedDocument::parse(0, Arc::from(text));
        let (sender, _) = watch::channel(Arc::new(document));
        Self {
            rope: Rope::from_str(text),
            version: 0,
            edits: Vec::new(),
            dispatched: 0,
            shared: Arc::new(Shared {
                sender,
                latest: AtomicU64::new(0),
                published: Mutex::new(0),
                published_changed: Condvar::new(),
                worker: Mutex::new(WorkerSlot::default()),
            }),
            config,
        }
    }

    /// Version of the text as edited so far. Starts at 0, +1 per edit.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn len(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Record an edit and return the new version. Offsets beyond the text or
    /// inside a multi-byte character are clamped down to the nearest valid
    /// position.
    pub fn apply_edit(&mut self, start: usize, old_len: usize, new_text: &str) -> u64 {
        let len = self.rope.len_bytes();
        let start_char = self.rope.byte_to_char(start.min(len));
        let end_char = self
            .rope
            .byte_to_char(start.saturating_add(old_len).min(len))
            .max(start_char);
        let start = self.rope.char_to_byte(start_char);
        let old_len = self.rope.char_to_byte(end_char) - start;

        self.rope.remove(start_char..end_char);
        self.rope.insert(start_char, new_text);
        self.version += 1;
        self.shared.latest.store(self.version, Ordering::Release);
        self.edits.push((
            self.version,
            DirtyRange::from_edit(start, old_len, new_text.len()),
        ));
        log::trace!(
            "edit v{}: replace {}..{} with {} bytes",
            self.version,
            start,
            start + old_len,
            new_text.len()
        );

        if self.config.rebuild_on_edit {
            self.schedule_rebuild();
        }
        self.version
    }

    /// Queue a background rebuild of the current version. A request that is
    /// still queued is replaced, so bursts of edits coalesce into one build.
    pub fn schedule_rebuild(&mut self) {
        if self.is_ready() || self.dispatched == self.version {
            return;
        }
        let request = self.build_request();
        self.dispatched = self.version;

        let shared = Arc::clone(&self.shared);
        let mut slot = lock(&self.shared.worker);
        slot.queued = Some(request);
        if !slot.running {
            slot.running = true;
            rayon::spawn(move || shared.drain());
        }
    }

    /// Whether the published document reflects every applied edit.
    pub fn is_ready(&self) -> bool {
        self.shared.sender.borrow().version == self.version
    }

    /// Block until the published document reflects every edit applied so
    /// far, and return it.
    ///
    /// Builds on the calling thread when the current version was never
    /// handed to the worker (or the worker has not picked it up yet), and
    /// waits for the worker otherwise. If the worker takes longer than the
    /// configured timeout the build is redone here.
    pub fn ensure_ready(&mut self) -> Arc<ParsedDocument> {
        let current = self.current_root();
        if current.version == self.version {
            return current;
        }

        let reclaimed = lock(&self.shared.worker).queued.take().is_some();
        if !reclaimed && self.dispatched == self.version {
            let timeout = Duration::from_millis(self.config.ready_timeout_ms);
            if self.shared.wait_for_published(self.version, timeout) {
                return self.current_root();
            }
            log::warn!(
                "rebuild of version {} did not finish within {:?}; building synchronously",
                self.version,
                timeout
            );
        }

        let request = self.build_request();
        self.dispatched = self.version;
        self.shared.publish(request.run());
        self.current_root()
    }

    /// The newest published document. May lag behind [`Self::version`]
    /// while a rebuild is pending.
    pub fn current_root(&self) -> Arc<ParsedDocument> {
        Arc::clone(&self.shared.sender.borrow())
    }

    pub fn reader(&self) -> TreeReader {
        TreeReader {
            receiver: self.shared.sender.subscribe(),
        }
    }

    fn build_request(&mut self) -> BuildRequest {
        let base = self.current_root();
        self.edits.retain(|(version, _)| *version > base.version);
        let dirty = self
            .edits
            .iter()
            .map(|(_, edit)| *edit)
            .reduce(|folded, edit| {
                folded.merge(
                    edit.start,
                    edit.old_end - edit.start,
                    edit.new_end - edit.start,
                )
            });
        BuildRequest {
            version: self.version,
            rope: self.rope.clone(),
            base,
            dirty,
            incremental: self.config.incremental_relex,
        }
    }
}

impl std::fmt::Debug for EditorTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorTree")
            .field("version", &self.version)
            .field("published", &self.shared.sender.borrow().version)
            .field("pending_edits", &self.edits.len())
            .finish()
    }
}

/// Read-only, cloneable handle onto a tree's published documents.
#[derive(Clone)]
pub struct TreeReader {
    receiver: watch::Receiver<Arc<ParsedDocument>>,
}

impl TreeReader {
    pub fn current(&self) -> Arc<ParsedDocument> {
        Arc::clone(&self.receiver.borrow())
    }

    pub fn version(&self) -> u64 {
        self.receiver.borrow().version
    }

    /// Wait until a document at `version` or newer is published. Returns
    /// `None` if the tree is dropped first.
    pub async fn wait_for_version(&self, version: u64) -> Option<Arc<ParsedDocument>> {
        let mut receiver = self.receiver.clone();
        loop {
            {
                let document = receiver.borrow_and_update();
                if document.version >= version {
                    return Some(Arc::clone(&document));
                }
            }
            if receiver.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    fn manual_config() -> TreeConfig {
        TreeConfig {
            rebuild_on_edit: false,
            ..TreeConfig::default()
        }
    }

    fn call_names(document: &ParsedDocument) -> Vec<String> {
        let ast = &document.ast;
        ast.iter()
            .filter(|&id| ast.kind(id) == NodeKind::CallExpression)
            .filter_map(|id| ast.callee_name(id, &document.text))
            .collect()
    }

    #[test]
    fn test_initial_document_is_ready() {
        let tree = EditorTree::new("aov(");
        assert!(tree.is_ready());
        let document = tree.current_root();
        assert_eq!(document.version, 0);
        assert_eq!(&*document.text, "aov(");
        assert_eq!(call_names(&document), vec!["aov"]);
    }

    #[test]
    fn test_edits_without_rebuild_leave_previous_root() {
        let mut tree = EditorTree::with_config("x <- 1", manual_config());
        tree.apply_edit(6, 0, "\nf(a)");
        assert_eq!(tree.version(), 1);
        assert!(!tree.is_ready());
        assert_eq!(&*tree.current_root().text, "x <- 1");

        let document = tree.ensure_ready();
        assert_eq!(document.version, 1);
        assert_eq!(&*document.text, "x <- 1\nf(a)");
        assert_eq!(call_names(&document), vec!["f"]);
    }

    #[test]
    fn test_coalesced_edits_match_full_parse() {
        let mut tree = EditorTree::with_config("aov(", manual_config());
        tree.apply_edit(4, 0, "a");
        tree.apply_edit(5, 0, ",");
        tree.apply_edit(6, 0, " b)");
        tree.apply_edit(0, 0, "# fit\n");
        let document = tree.ensure_ready();
        let expected = "# fit\naov(a, b)";
        assert_eq!(&*document.text, expected);
        assert_eq!(document.tokens, tokenize_all(expected));
        assert!(document.ast.check_structure(expected.len()).is_ok());
    }

    #[test]
    fn test_superseded_rebuild_is_not_published() {
        let mut tree = EditorTree::with_config("a", manual_config());
        tree.apply_edit(1, 0, "b");
        let request = tree.build_request();
        tree.apply_edit(2, 0, "c");

        let stale = request.run();
        assert_eq!(stale.version, 1);
        assert!(!tree.shared.publish(stale));
        assert_eq!(tree.current_root().version, 0);
        assert_eq!(tree.reader().version(), 0);

        let document = tree.ensure_ready();
        assert_eq!(document.version, 2);
        assert_eq!(&*document.text, "abc");

        // Nothing older than the published version gets through either.
        assert!(!tree.shared.publish(ParsedDocument::parse(1, Arc::from("ab"))));
        assert!(Arc::ptr_eq(&document, &tree.current_root()));
    }

    #[test]
    fn test_ready_timeout_builds_inline_and_rejects_late_result() {
        let config = TreeConfig {
            rebuild_on_edit: false,
            ready_timeout_ms: 0,
            ..TreeConfig::default()
        };
        let mut tree = EditorTree::with_config("f(", config);
        tree.apply_edit(2, 0, "x");

        // Picked up by a worker that has not finished yet.
        let late = tree.build_request();
        tree.dispatched = tree.version();

        let document = tree.ensure_ready();
        assert_eq!(document.version, 1);
        assert_eq!(&*document.text, "f(x");
        assert!(tree.is_ready());

        assert!(!tree.shared.publish(late.run()));
        assert!(Arc::ptr_eq(&document, &tree.current_root()));
        assert_eq!(tree.reader().version(), 1);
    }

    #[test]
    fn test_out_of_range_edit_is_clamped() {
        let mut tree = EditorTree::with_config("abc", manual_config());
        tree.apply_edit(10, 5, "d");
        assert_eq!(tree.text(), "abcd");
        tree.apply_edit(1, 100, "");
        assert_eq!(tree.text(), "a");
        assert_eq!(tree.ensure_ready().tokens, tokenize_all("a"));
    }

    #[test]
    fn test_edit_inside_multibyte_char_is_clamped() {
        let mut tree = EditorTree::with_config("é", manual_config());
        // Byte 1 is inside `é`; the edit snaps back to byte 0.
        tree.apply_edit(1, 0, "x");
        assert_eq!(tree.text(), "xé");
        assert_eq!(tree.ensure_ready().tokens, tokenize_all("xé"));
    }

    #[test]
    fn test_background_rebuild_publishes() {
        let mut tree = EditorTree::new("f(");
        let version = tree.apply_edit(2, 0, "x)");
        let document = tree.ensure_ready();
        assert_eq!(document.version, version);
        assert_eq!(&*document.text, "f(x)");
        assert!(tree.is_ready());
    }

    #[test]
    fn test_many_rapid_edits_end_consistent() {
        let mut tree = EditorTree::new("");
        let mut expected = String::new();
        for i in 0..200 {
            let piece = if i % 10 == 9 { "\n" } else { "f(a," };
            tree.apply_edit(expected.len(), 0, piece);
            expected.push_str(piece);
        }
        let document = tree.ensure_ready();
        assert_eq!(document.version, 200);
        assert_eq!(&*document.text, expected);
        assert_eq!(document.tokens, tokenize_all(&expected));
    }

    #[test]
    fn test_full_relex_when_incremental_disabled() {
        let config = TreeConfig {
            rebuild_on_edit: false,
            incremental_relex: false,
            ..TreeConfig::default()
        };
        let mut tree = EditorTree::with_config("a <- 1", config);
        tree.apply_edit(5, 1, "2");
        assert_eq!(tree.ensure_ready().tokens, tokenize_all("a <- 2"));
    }

    #[test]
    fn test_reader_sees_only_complete_documents() {
        let mut tree = EditorTree::new("");
        let reader = tree.reader();
        let handle = std::thread::spawn(move || {
            for _ in 0..500 {
                let document = reader.current();
                assert!(document.ast.check_structure(document.text.len()).is_ok());
                assert_eq!(document.tokens, tokenize_all(&document.text));
            }
        });
        for i in 0..300 {
            let len = tree.len();
            tree.apply_edit(len, 0, if i % 7 == 0 { "\n" } else { "g(x, " });
        }
        tree.ensure_ready();
        handle.join().unwrap();
    }

    #[test]
    fn test_tree_can_move_between_threads() {
        let mut tree = EditorTree::new("x");
        tree.apply_edit(1, 0, " <- 1");
        let tree = std::thread::spawn(move || {
            let mut tree = tree;
            tree.ensure_ready();
            tree.apply_edit(0, 0, "y <- ");
            tree
        })
        .join()
        .unwrap();
        let mut tree = tree;
        assert_eq!(&*tree.ensure_ready().text, "y <- x <- 1");
    }

    #[tokio::test]
    async fn test_reader_waits_for_version() {
        let mut tree = EditorTree::new("a");
        let reader = tree.reader();
        let version = tree.apply_edit(1, 0, "b");
        let document = reader.wait_for_version(version).await.unwrap();
        assert_eq!(&*document.text, "ab");
    }

    #[tokio::test]
    async fn test_reader_returns_none_when_tree_dropped() {
        let tree = EditorTree::with_config("a", manual_config());
        let reader = tree.reader();
        drop(tree);
        assert!(reader.wait_for_version(5).await.is_none());
    }
}
