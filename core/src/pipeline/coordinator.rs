//! Per-document orchestration: one active loader, callbacks, pagination state and positions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{CacheStatsSnapshot, ChapterCaches};
use crate::config::{PipelineConfig, ResizeAnchor};
use crate::error::ContentError;
use crate::memory::{MemoryEvent, MemoryMonitor};
use crate::paginate::{PaginationEngine, PaginationError};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::loader::{ContentLoader, LoadOutcome};
use crate::pipeline::processor::ImageProcessor;
use crate::source::SharedSource;
use crate::stats::{LoadKind, LoadSnapshot, StatsCollector};
use crate::store::PositionStore;
use crate::types::{
    DocumentId, GenerationToken, LoadRequest, ReadingMode, ReadingPosition, RenderedChapter,
};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Successful delivery for one request.
#[derive(Debug, Clone)]
pub struct ContentReady {
    pub generation: GenerationToken,
    pub chapter: Arc<RenderedChapter>,
}

/// Failed delivery for one request.
#[derive(Debug)]
pub struct LoadFailure {
    pub generation: GenerationToken,
    pub chapter_index: u32,
    pub error: ContentError,
}

type ReadyCallback = Arc<dyn Fn(ContentReady) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(LoadFailure) + Send + Sync>;
type MemoryCallback = Arc<dyn Fn(MemoryEvent) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    ready: Option<ReadyCallback>,
    error: Option<ErrorCallback>,
    memory: Option<MemoryCallback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("ready", &self.ready.is_some())
            .field("error", &self.error.is_some())
            .field("memory", &self.memory.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct ActiveLoad {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State the background thread needs after the coordinator call has returned.
#[derive(Debug)]
struct Delivery {
    callbacks: Arc<Mutex<Callbacks>>,
    stats: Arc<StatsCollector>,
    monitor: Arc<MemoryMonitor>,
    memory_limit: Option<u64>,
}

impl Delivery {
    fn run(self, loader: ContentLoader) {
        let request = loader.request();
        let started = Instant::now();
        let outcome = loader.run();
        let elapsed = started.elapsed();

        match outcome {
            LoadOutcome::Completed(chapter) => {
                self.stats.record_load(LoadKind::Completed, elapsed);
                debug!(
                    target: "pipeline::coordinator",
                    chapter_index = request.chapter_index,
                    generation = request.generation.as_u64(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "chapter ready"
                );
                let callback = self.callbacks.lock().ready.clone();
                match callback {
                    Some(callback) => {
                        callback(ContentReady { generation: request.generation, chapter })
                    }
                    None => trace!(target: "pipeline::coordinator", "no content-ready callback"),
                }
                self.check_memory();
            }
            LoadOutcome::Failed(error) => {
                self.stats.record_load(LoadKind::Failed, elapsed);
                warn!(
                    target: "pipeline::coordinator",
                    chapter_index = request.chapter_index,
                    generation = request.generation.as_u64(),
                    "chapter load failed: {error}"
                );
                let callback = self.callbacks.lock().error.clone();
                let failure = LoadFailure {
                    generation: request.generation,
                    chapter_index: request.chapter_index,
                    error,
                };
                match callback {
                    Some(callback) => callback(failure),
                    None => trace!(target: "pipeline::coordinator", "no load-error callback"),
                }
            }
            LoadOutcome::Cancelled => self.stats.record_load(LoadKind::Cancelled, elapsed),
        }
    }

    fn check_memory(&self) {
        let Some(limit) = self.memory_limit else {
            return;
        };
        let event = self.monitor.check_threshold(limit);
        if event == MemoryEvent::Steady {
            return;
        }
        if let Some(callback) = self.callbacks.lock().memory.clone() {
            callback(event);
        }
    }
}

/// Entry point for a consumer of one open document.
///
/// At most one [`ContentLoader`] runs per coordinator. A new [`LoadCoordinator::request_chapter`]
/// cancels the previous request, waits a bounded interval for it to wind down, and then starts
/// the next one. Every request that is not superseded produces exactly one content-ready or
/// load-error callback on the loader thread.
pub struct LoadCoordinator {
    document_id: DocumentId,
    source: SharedSource,
    caches: Arc<ChapterCaches>,
    processor: ImageProcessor,
    cancel_wait: Duration,
    resize_anchor: ResizeAnchor,
    next_generation: AtomicU64,
    active: Mutex<Option<ActiveLoad>>,
    delivery_callbacks: Arc<Mutex<Callbacks>>,
    stats: Arc<StatsCollector>,
    monitor: Arc<MemoryMonitor>,
    memory_limit: Option<u64>,
    engines: Mutex<HashMap<u32, PaginationEngine>>,
    position: Mutex<ReadingPosition>,
    position_store: Option<Arc<dyn PositionStore>>,
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("document_id", &self.document_id)
            .field("next_generation", &self.next_generation.load(Ordering::Relaxed))
            .field("active", &self.active.lock().is_some())
            .field("callbacks", &*self.delivery_callbacks.lock())
            .field("position", &*self.position.lock())
            .finish_non_exhaustive()
    }
}

impl LoadCoordinator {
    pub fn new(document_id: DocumentId, source: SharedSource, config: &PipelineConfig) -> Self {
        Self {
            position: Mutex::new(ReadingPosition::start_of(document_id.clone())),
            document_id,
            source,
            caches: Arc::new(ChapterCaches::new(config)),
            processor: ImageProcessor::new(config.images),
            cancel_wait: config.cancel_wait(),
            resize_anchor: config.resize_anchor,
            next_generation: AtomicU64::new(0),
            active: Mutex::new(None),
            delivery_callbacks: Arc::new(Mutex::new(Callbacks::default())),
            stats: Arc::new(StatsCollector::new()),
            monitor: Arc::new(MemoryMonitor::new()),
            memory_limit: config.memory_limit_bytes,
            engines: Mutex::new(HashMap::new()),
            position_store: None,
        }
    }

    pub fn with_monitor(mut self, monitor: MemoryMonitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn with_position_store(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.position_store = Some(store);
        self
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn chapter_count(&self) -> u32 {
        self.source.lock().chapter_count()
    }

    /// Start loading `chapter_index`, superseding any in-flight request. Returns without waiting
    /// for the load; the result arrives through the registered callbacks.
    pub fn request_chapter(&self, chapter_index: u32) -> GenerationToken {
        let generation =
            GenerationToken::new(self.next_generation.fetch_add(1, Ordering::AcqRel) + 1);
        let request = LoadRequest { chapter_index, generation };

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            self.wind_down(previous);
        }

        {
            let mut position = self.position.lock();
            if position.chapter_index != chapter_index {
                position.chapter_index = chapter_index;
                position.page_index = 0;
                position.offset = 0;
            }
        }

        let token = CancellationToken::new(generation);
        let loader = ContentLoader::new(
            request,
            self.document_id.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.caches),
            self.processor,
            token.clone(),
        );
        let delivery = Delivery {
            callbacks: Arc::clone(&self.delivery_callbacks),
            stats: Arc::clone(&self.stats),
            monitor: Arc::clone(&self.monitor),
            memory_limit: self.memory_limit,
        };

        debug!(
            target: "pipeline::coordinator",
            chapter_index,
            generation = generation.as_u64(),
            "starting chapter load"
        );
        let handle = thread::spawn(move || delivery.run(loader));
        *active = Some(ActiveLoad { token, handle });
        generation
    }

    pub fn on_content_ready(&self, callback: impl Fn(ContentReady) + Send + Sync + 'static) {
        self.delivery_callbacks.lock().ready = Some(Arc::new(callback));
    }

    pub fn on_load_error(&self, callback: impl Fn(LoadFailure) + Send + Sync + 'static) {
        self.delivery_callbacks.lock().error = Some(Arc::new(callback));
    }

    /// Receives `Exceeded`/`Recovered` transitions observed after completed loads. Only active
    /// when a memory limit is configured.
    pub fn on_memory_event(&self, callback: impl Fn(MemoryEvent) + Send + Sync + 'static) {
        self.delivery_callbacks.lock().memory = Some(Arc::new(callback));
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.caches.stats()
    }

    pub fn load_stats(&self) -> LoadSnapshot {
        self.stats.snapshot()
    }

    /// Record the laid-out height of a chapter as measured by the renderer.
    pub fn report_content_height(&self, chapter_index: u32, content_height: u32) {
        self.engines
            .lock()
            .entry(chapter_index)
            .and_modify(|engine| engine.set_content_height(content_height))
            .or_insert_with(|| PaginationEngine::new(content_height));
    }

    pub fn query_page_count(
        &self,
        chapter_index: u32,
        viewport_height: u32,
    ) -> Result<u32, PaginationError> {
        let mut engines = self.engines.lock();
        let engine = engines
            .get_mut(&chapter_index)
            .ok_or(PaginationError::UnknownContentHeight { chapter_index })?;
        Ok(engine.breaks_for(viewport_height)?.page_count())
    }

    /// Offset of `page_index` under the most recently queried viewport height. Moves the
    /// current reading position there.
    pub fn goto_page(&self, chapter_index: u32, page_index: u32) -> Result<u32, PaginationError> {
        let offset = {
            let engines = self.engines.lock();
            let engine = engines
                .get(&chapter_index)
                .ok_or(PaginationError::UnknownContentHeight { chapter_index })?;
            engine.offset_for_page(page_index)?
        };

        let mut position = self.position.lock();
        position.chapter_index = chapter_index;
        position.page_index = page_index;
        position.offset = offset;
        Ok(offset)
    }

    /// Recompute breaks for a new viewport height and return the page that keeps the reader's
    /// place, per the configured resize anchor.
    pub fn resize_viewport(
        &self,
        chapter_index: u32,
        current_page: u32,
        new_viewport_height: u32,
    ) -> Result<u32, PaginationError> {
        let (page, offset) = {
            let mut engines = self.engines.lock();
            let engine = engines
                .get_mut(&chapter_index)
                .ok_or(PaginationError::UnknownContentHeight { chapter_index })?;
            let page = engine.resize(new_viewport_height, current_page, self.resize_anchor)?;
            (page, engine.offset_for_page(page)?)
        };

        let mut position = self.position.lock();
        if position.chapter_index == chapter_index {
            position.page_index = page;
            position.offset = offset;
        }
        Ok(page)
    }

    pub fn current_position(&self) -> ReadingPosition {
        self.position.lock().clone()
    }

    /// Record how the host is presenting the document. Stored with the position.
    pub fn set_reading_mode(&self, mode: ReadingMode) {
        self.position.lock().mode = mode;
    }

    /// Persist the current position. A no-op without a position store.
    pub fn save_position(&self) -> crate::Result<()> {
        let Some(store) = &self.position_store else {
            return Ok(());
        };
        let position = self.current_position();
        store.save(&position)?;
        trace!(
            target: "pipeline::coordinator",
            chapter_index = position.chapter_index,
            page_index = position.page_index,
            "position saved"
        );
        Ok(())
    }

    /// Load the stored position for this document and make it current. The caller decides
    /// whether to request the chapter it points at.
    pub fn restore_position(&self) -> crate::Result<Option<ReadingPosition>> {
        let Some(store) = &self.position_store else {
            return Ok(None);
        };
        let restored = store.load(&self.document_id)?;
        if let Some(position) = &restored {
            *self.position.lock() = position.clone();
        }
        Ok(restored)
    }

    /// Cancel in-flight work and drop every cache entry and pagination state for the document.
    pub fn close(&self) {
        if let Some(previous) = self.active.lock().take() {
            self.wind_down(previous);
        }
        self.caches.clear();
        self.engines.lock().clear();
        info!(
            target: "pipeline::coordinator",
            document_id = self.document_id.as_str(),
            "document closed"
        );
    }

    /// Cancel `previous` and give it up to `cancel_wait` to exit. A loader still busy after that
    /// is left to finish on its own; it can no longer publish anything.
    fn wind_down(&self, previous: ActiveLoad) {
        let generation = previous.token.generation().as_u64();
        if previous.token.cancel() {
            debug!(target: "pipeline::coordinator", generation, "superseding in-flight load");
        }

        let deadline = Instant::now() + self.cancel_wait;
        while !previous.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    target: "pipeline::coordinator",
                    generation,
                    wait_ms = self.cancel_wait.as_millis() as u64,
                    "superseded load did not stop in time, detaching"
                );
                return;
            }
            thread::sleep(CANCEL_POLL_INTERVAL);
        }

        if previous.handle.join().is_err() {
            error!(target: "pipeline::coordinator", generation, "loader thread panicked");
        }
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, shared};
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn coordinator(source: MemorySource) -> LoadCoordinator {
        LoadCoordinator::new(DocumentId::new("doc"), shared(source), &PipelineConfig::default())
    }

    #[test]
    fn delivers_rendered_chapter() {
        let coordinator = coordinator(MemorySource::new().with_chapter("<p>hello</p>"));
        let (tx, rx) = mpsc::channel();
        coordinator.on_content_ready(move |ready| {
            let _ = tx.send(ready);
        });

        let generation = coordinator.request_chapter(0);
        let ready = rx.recv_timeout(TIMEOUT).expect("content ready");
        assert_eq!(ready.generation, generation);
        assert_eq!(ready.chapter.markup, "<p>hello</p>");
    }

    #[test]
    fn missing_chapter_is_reported_once() {
        let coordinator = coordinator(MemorySource::new());
        let (tx, rx) = mpsc::channel();
        coordinator.on_load_error(move |failure| {
            let _ = tx.send(failure);
        });

        coordinator.request_chapter(4);
        let failure = rx.recv_timeout(TIMEOUT).expect("load error");
        assert_eq!(failure.chapter_index, 4);
        assert!(matches!(failure.error, ContentError::ContentNotFound { .. }));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn generations_increase() {
        let coordinator = coordinator(MemorySource::new().with_chapter("a").with_chapter("b"));
        let first = coordinator.request_chapter(0);
        let second = coordinator.request_chapter(1);
        assert!(second > first);
    }

    #[test]
    fn pagination_requires_reported_height() {
        let coordinator = coordinator(MemorySource::new());
        assert_eq!(
            coordinator.query_page_count(0, 800),
            Err(PaginationError::UnknownContentHeight { chapter_index: 0 })
        );

        coordinator.report_content_height(0, 2500);
        assert_eq!(coordinator.query_page_count(0, 800), Ok(4));
        assert_eq!(coordinator.goto_page(0, 3), Ok(2400));
        assert_eq!(
            coordinator.goto_page(0, 4),
            Err(PaginationError::PageOutOfRange { page: 4, page_count: 4 })
        );

        let position = coordinator.current_position();
        assert_eq!((position.page_index, position.offset), (3, 2400));
    }

    #[test]
    fn close_clears_pagination_and_caches() {
        let coordinator = coordinator(MemorySource::new().with_chapter("<p>x</p>"));
        let (tx, rx) = mpsc::channel();
        coordinator.on_content_ready(move |ready| {
            let _ = tx.send(ready);
        });
        coordinator.request_chapter(0);
        rx.recv_timeout(TIMEOUT).expect("content ready");
        coordinator.report_content_height(0, 100);

        coordinator.close();
        assert_eq!(coordinator.cache_stats().rendered.count, 0);
        assert!(coordinator.query_page_count(0, 800).is_err());
    }
}
