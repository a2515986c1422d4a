//! Listing engine
//!
//! One engine performs one directory discovery. `start()` posts `on_listing_start`,
//! arms the timeout timer and spawns a single worker task. The worker and the timer
//! race for the engine phase with compare-and-swap, so exactly one of them produces
//! the terminal callbacks and `on_listing_end` is emitted once.
//!
//! Abort and timeout are checked before the list call, right after it returns,
//! after sorting and between child counts. In-flight protocol I/O is never
//! interrupted. A panicking backend call is contained in the worker.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatch::ControlHandle;
use super::filter::KeepPolicy;
use super::listener::ListingListener;
use super::sort::{arrange, SortOrder};
use crate::capability::Listable;
use crate::entry::Entry;
use crate::error::{FsError, FsResult};
use crate::uri::FileUri;

/// Lifecycle of a listing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListingState {
    Created = 0,
    Started = 1,
    Discovering = 2,
    /// Timer disarmed, filtering and sorting in progress
    Sorting = 3,
    Delivered = 4,
    TimedOut = 5,
    Aborted = 6,
    Failed = 7,
    Ended = 8,
}

impl ListingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListingState::Created,
            1 => ListingState::Started,
            2 => ListingState::Discovering,
            3 => ListingState::Sorting,
            4 => ListingState::Delivered,
            5 => ListingState::TimedOut,
            6 => ListingState::Aborted,
            7 => ListingState::Failed,
            _ => ListingState::Ended,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ListingState::Delivered
                | ListingState::TimedOut
                | ListingState::Aborted
                | ListingState::Failed
                | ListingState::Ended
        )
    }
}

/// Per-listing options
#[derive(Clone)]
pub struct ListingOptions {
    pub sort: SortOrder,
    /// `None` disables the timer
    pub timeout: Option<Duration>,
    pub keep: Arc<dyn KeepPolicy>,
}

impl ListingOptions {
    pub fn new(keep: Arc<dyn KeepPolicy>) -> Self {
        Self {
            sort: SortOrder::default(),
            timeout: None,
            keep,
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// A zero duration disables the timer
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }
}

/// State shared by the engine handle, its worker and its timer
struct Shared {
    phase: AtomicU8,
    abort: AtomicBool,
    ended: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn phase(&self) -> ListingState {
        ListingState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Move to `to` if the current phase is one of `from`
    fn transition(&self, from: &[ListingState], to: ListingState) -> bool {
        let mut current = self.phase.load(Ordering::SeqCst);
        loop {
            if !from.contains(&ListingState::from_u8(current)) {
                return false;
            }
            match self
                .phase
                .compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn disarm_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

/// Delivers callbacks for one engine through the control queue
#[derive(Clone)]
struct Courier {
    control: ControlHandle,
    listener: Arc<dyn ListingListener>,
    shared: Arc<Shared>,
}

impl Courier {
    fn start(&self) {
        let listener = self.listener.clone();
        self.control.post(move || listener.on_listing_start());
    }

    fn update(&self, entries: Vec<Entry>) {
        let listener = self.listener.clone();
        let shared = self.shared.clone();
        self.control.post(move || {
            if !shared.aborted() {
                listener.on_listing_update(entries);
            }
        });
    }

    fn file_info(&self, entry: Entry) {
        let listener = self.listener.clone();
        let shared = self.shared.clone();
        self.control.post(move || {
            if !shared.aborted() {
                listener.on_listing_file_info_update(entry.uri(), &entry);
            }
        });
    }

    fn failure(&self, error: FsError) {
        let listener = self.listener.clone();
        let shared = self.shared.clone();
        self.control.post(move || {
            if shared.aborted() {
                return;
            }
            if error.is_authentication() {
                listener.on_credential_required(&error);
            } else {
                listener.on_listing_fatal_error(&error, error.kind());
            }
        });
    }

    fn timeout(&self) {
        let listener = self.listener.clone();
        self.control.post(move || listener.on_listing_timeout());
    }

    fn end(&self) {
        let listener = self.listener.clone();
        let shared = self.shared.clone();
        self.control.post(move || {
            shared.ended.store(true, Ordering::SeqCst);
            listener.on_listing_end();
        });
    }
}

/// Single-use directory discovery
pub struct ListingEngine {
    uri: FileUri,
    lister: Arc<dyn Listable>,
    options: ListingOptions,
    remote: bool,
    courier: Courier,
}

impl ListingEngine {
    pub fn new(
        lister: Arc<dyn Listable>,
        uri: FileUri,
        options: ListingOptions,
        control: ControlHandle,
        listener: Arc<dyn ListingListener>,
    ) -> Self {
        let remote = uri.scheme().map(|s| s.is_remote()).unwrap_or(false);
        let shared = Arc::new(Shared {
            phase: AtomicU8::new(ListingState::Created as u8),
            abort: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            timer: Mutex::new(None),
        });
        Self {
            uri,
            lister,
            options,
            remote,
            courier: Courier {
                control,
                listener,
                shared,
            },
        }
    }

    pub fn uri(&self) -> &FileUri {
        &self.uri
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Current phase; `Ended` once `on_listing_end` has been dispatched
    pub fn state(&self) -> ListingState {
        if self.courier.shared.ended.load(Ordering::SeqCst) {
            ListingState::Ended
        } else {
            self.courier.shared.phase()
        }
    }

    /// Launch the worker. Must be called from within a tokio runtime, once.
    pub fn start(&self) -> FsResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| FsError::Unsupported("listing requires a tokio runtime".to_string()))?;
        let shared = &self.courier.shared;
        if !shared.transition(&[ListingState::Created], ListingState::Started) {
            return Err(FsError::Unsupported(format!(
                "listing engine for {} already started",
                self.uri
            )));
        }

        debug!("Starting listing of {}", self.uri);
        self.courier.start();

        if let Some(timeout) = self.options.timeout {
            let courier = self.courier.clone();
            let uri = self.uri.clone();
            let timer = runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                let fired = courier.shared.transition(
                    &[ListingState::Started, ListingState::Discovering],
                    ListingState::TimedOut,
                );
                if fired {
                    warn!("Listing of {} timed out after {:?}", uri, timeout);
                    courier.timeout();
                    courier.end();
                }
            });
            *shared.timer.lock() = Some(timer);
        }

        let worker = Worker {
            uri: self.uri.clone(),
            lister: self.lister.clone(),
            options: self.options.clone(),
            courier: self.courier.clone(),
        };
        runtime.spawn(worker.run());
        Ok(())
    }

    /// Request cancellation. `on_listing_end` is still delivered exactly once.
    pub fn abort(&self) {
        debug!("Abort requested for listing of {}", self.uri);
        self.courier.shared.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.courier.shared.aborted()
    }
}

struct Worker {
    uri: FileUri,
    lister: Arc<dyn Listable>,
    options: ListingOptions,
    courier: Courier,
}

impl Worker {
    async fn run(self) {
        let shared = self.courier.shared.clone();
        if !shared.transition(&[ListingState::Started], ListingState::Discovering) {
            return;
        }

        if shared.aborted() {
            if shared.transition(&[ListingState::Discovering], ListingState::Aborted) {
                shared.disarm_timer();
                self.courier.end();
            }
            return;
        }

        let result = AssertUnwindSafe(self.lister.list(&self.uri))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(FsError::Protocol("listing worker panicked".to_string())));

        if !shared.transition(&[ListingState::Discovering], ListingState::Sorting) {
            debug!("Discarding late result for {}", self.uri);
            return;
        }
        shared.disarm_timer();

        if shared.aborted() {
            shared.phase.store(ListingState::Aborted as u8, Ordering::SeqCst);
            self.courier.end();
            return;
        }

        let entries = match result {
            Ok(entries) => entries,
            Err(error) => {
                info!("Listing of {} failed: {}", self.uri, error);
                shared.phase.store(ListingState::Failed as u8, Ordering::SeqCst);
                self.courier.failure(error);
                self.courier.end();
                return;
            }
        };

        let keep = self.options.keep.as_ref();
        let (directories, files): (Vec<Entry>, Vec<Entry>) = entries
            .into_iter()
            .filter(|e| {
                if e.is_directory() {
                    keep.keep_directory(e.name())
                } else {
                    keep.keep_file(e.name())
                }
            })
            .partition(|e| e.is_directory());
        let listing = arrange(
            directories,
            files,
            self.options.sort,
            self.lister.merge_policy(),
        );

        if shared.aborted() {
            shared.phase.store(ListingState::Aborted as u8, Ordering::SeqCst);
            self.courier.end();
            return;
        }

        debug!("Listing of {} produced {} entries", self.uri, listing.len());
        let subdirectories: Vec<Entry> = if self.lister.reports_child_counts() {
            listing.iter().filter(|e| e.is_directory()).cloned().collect()
        } else {
            Vec::new()
        };
        shared.phase.store(ListingState::Delivered as u8, Ordering::SeqCst);
        self.courier.update(listing);

        for directory in subdirectories {
            if shared.aborted() {
                break;
            }
            let counted = AssertUnwindSafe(self.lister.count_children(&directory, keep))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FsError::Protocol("child count panicked".to_string())));
            match counted {
                Ok(counts) => self.courier.file_info(directory.with_children(counts)),
                Err(e) => debug!("Skipping child count of {}: {}", directory.uri(), e),
            }
        }

        self.courier.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ChildCounts;
    use crate::listing::{control_queue, ListFilter, MergePolicy};
    use crate::testing::{drive_until_end, Event, RecordingListener, StaticLister};

    fn options() -> ListingOptions {
        ListingOptions::new(Arc::new(ListFilter::default()))
    }

    fn uri() -> FileUri {
        FileUri::parse("sftp://host/data").unwrap()
    }

    #[tokio::test]
    async fn test_successful_listing_filters_and_sorts() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .dir("z")
            .dir("b")
            .dir(".cache")
            .file("m", 3)
            .file("a", 1)
            .file(".hidden", 1);
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(
            Arc::new(lister),
            uri(),
            options().with_timeout(Duration::from_secs(5)),
            control,
            listener.clone(),
        );
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.events(),
            vec![
                Event::Start,
                Event::Update(vec!["a".into(), "b".into(), "m".into(), "z".into()]),
                Event::End,
            ]
        );
        assert_eq!(engine.state(), ListingState::Ended);
    }

    #[tokio::test]
    async fn test_separate_policy_keeps_directories_first() {
        let lister = StaticLister::new(MergePolicy::SeparateThenConcat)
            .dir("z")
            .dir("b")
            .file("m", 3)
            .file("a", 1);
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.updates(),
            vec![vec!["b".to_string(), "z".into(), "a".into(), "m".into()]]
        );
    }

    #[tokio::test]
    async fn test_timeout_discards_late_result() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .file("late", 1)
            .delay(Duration::from_millis(300));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(
            Arc::new(lister),
            uri(),
            options().with_timeout(Duration::from_millis(50)),
            control,
            listener.clone(),
        );
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        // let the slow worker finish and make sure nothing else arrives
        tokio::time::sleep(Duration::from_millis(400)).await;
        queue.drain();

        assert_eq!(
            listener.events(),
            vec![Event::Start, Event::Timeout, Event::End]
        );
        assert_eq!(engine.state(), ListingState::Ended);
    }

    #[tokio::test]
    async fn test_abort_before_result_suppresses_update() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .file("a", 1)
            .delay(Duration::from_millis(100));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        engine.abort();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(listener.events(), vec![Event::Start, Event::End]);
        assert!(engine.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_stops_child_count_pass() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .dir("a")
            .dir("b")
            .dir("c")
            .dir("d")
            .dir("e")
            .with_child_counts(Duration::from_millis(100));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();

        while listener.updates().is_empty() {
            tokio::time::timeout(Duration::from_secs(5), queue.next())
                .await
                .expect("no update in time");
        }
        let aborted_at = tokio::time::Instant::now();
        engine.abort();
        drive_until_end(&mut queue, &listener).await;

        // at most the in-flight count finishes, and its result is suppressed
        assert!(aborted_at.elapsed() < Duration::from_millis(350));
        let events = listener.events();
        assert!(!events.iter().any(|e| matches!(e, Event::FileInfo(..))));
        assert_eq!(listener.count(&Event::End), 1);
        assert_eq!(events.last(), Some(&Event::End));
        assert_eq!(engine.state(), ListingState::Ended);
    }

    /// Aborts its engine the first time it is consulted
    struct AbortingFilter {
        engine: Arc<std::sync::OnceLock<std::sync::Weak<ListingEngine>>>,
    }

    impl AbortingFilter {
        fn abort(&self) -> bool {
            if let Some(engine) = self.engine.get().and_then(|weak| weak.upgrade()) {
                engine.abort();
            }
            true
        }
    }

    impl KeepPolicy for AbortingFilter {
        fn keep_file(&self, _name: &str) -> bool {
            self.abort()
        }

        fn keep_directory(&self, _name: &str) -> bool {
            self.abort()
        }
    }

    #[tokio::test]
    async fn test_abort_during_sorting_suppresses_update() {
        let slot = Arc::new(std::sync::OnceLock::new());
        let filter = AbortingFilter { engine: slot.clone() };
        let lister = StaticLister::new(MergePolicy::Unified).dir("d").file("f", 1);
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = Arc::new(ListingEngine::new(
            Arc::new(lister),
            uri(),
            ListingOptions::new(Arc::new(filter)),
            control,
            listener.clone(),
        ));
        assert!(slot.set(Arc::downgrade(&engine)).is_ok());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(listener.events(), vec![Event::Start, Event::End]);
        assert!(engine.is_aborted());
        assert_eq!(engine.state(), ListingState::Ended);
    }

    #[tokio::test]
    async fn test_panicking_child_count_still_ends() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .dir("a")
            .dir("b")
            .file("f", 1)
            .panic_on_count();
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.events(),
            vec![
                Event::Start,
                Event::Update(vec!["a".into(), "b".into(), "f".into()]),
                Event::End
            ]
        );
        assert_eq!(engine.state(), ListingState::Ended);
    }

    #[tokio::test]
    async fn test_child_counts_follow_update() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .dir("a")
            .dir("b")
            .with_child_counts(Duration::from_millis(1));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        let counts = ChildCounts { directories: 1, files: 2 };
        assert_eq!(
            listener.events(),
            vec![
                Event::Start,
                Event::Update(vec!["a".into(), "b".into()]),
                Event::FileInfo("a".into(), counts),
                Event::FileInfo("b".into(), counts),
                Event::End
            ]
        );
    }

    #[tokio::test]
    async fn test_authentication_failure_requests_credentials() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .fail_with(|| FsError::AuthenticationFailed("bad password".into()));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.events(),
            vec![Event::Start, Event::CredentialRequired, Event::End]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_carries_kind() {
        let lister = StaticLister::new(MergePolicy::Unified)
            .fail_with(|| FsError::UnknownHost("nowhere.invalid".into()));
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.events(),
            vec![
                Event::Start,
                Event::Fatal(crate::error::ErrorKind::UnknownHost),
                Event::End
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_backend_still_ends() {
        let lister = StaticLister::new(MergePolicy::Unified).panic_on_list();
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(Arc::new(lister), uri(), options(), control, listener.clone());
        engine.start().unwrap();
        drive_until_end(&mut queue, &listener).await;

        assert_eq!(
            listener.events(),
            vec![
                Event::Start,
                Event::Fatal(crate::error::ErrorKind::Unknown),
                Event::End
            ]
        );
    }

    #[tokio::test]
    async fn test_engine_is_single_use() {
        let (control, mut queue) = control_queue();
        let listener = RecordingListener::new();
        let engine = ListingEngine::new(
            Arc::new(StaticLister::new(MergePolicy::Unified)),
            uri(),
            options(),
            control,
            listener.clone(),
        );
        engine.start().unwrap();
        assert!(engine.start().is_err());
        drive_until_end(&mut queue, &listener).await;
        assert_eq!(listener.count(&Event::End), 1);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (control, _queue) = control_queue();
        let engine = ListingEngine::new(
            Arc::new(StaticLister::new(MergePolicy::Unified)),
            uri(),
            options(),
            control,
            RecordingListener::new(),
        );
        assert!(engine.start().is_err());
        assert_eq!(engine.state(), ListingState::Created);
    }
}
