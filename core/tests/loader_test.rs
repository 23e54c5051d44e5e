use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbaImage};
use reader_pipeline::cache::ChapterCaches;
use reader_pipeline::config::PipelineConfig;
use reader_pipeline::error::{ContentError, SourceError};
use reader_pipeline::memory::{MemoryEvent, MemoryMonitor};
use reader_pipeline::pipeline::{
    CancellationToken, ContentLoader, ImageProcessor, LoadCoordinator, LoadOutcome,
};
use reader_pipeline::source::{ContentSource, MemorySource, shared};
use reader_pipeline::store::MemoryPositionStore;
use reader_pipeline::types::{
    ChapterKey, DocumentId, GenerationToken, LoadRequest, ReadingMode, RenderedChapter,
    ResourceKey,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

/// Chapter `gated` blocks inside the fetch until the test releases it.
struct GatedSource {
    inner: MemorySource,
    gated: u32,
    entered: Sender<u32>,
    release: Receiver<()>,
}

impl ContentSource for GatedSource {
    fn chapter_count(&self) -> u32 {
        self.inner.chapter_count()
    }

    fn get_chapter_markup(&mut self, chapter_index: u32) -> Result<Vec<u8>, SourceError> {
        if chapter_index == self.gated {
            let _ = self.entered.send(chapter_index);
            let _ = self.release.recv_timeout(TIMEOUT);
        }
        self.inner.get_chapter_markup(chapter_index)
    }

    fn get_resource(&mut self, path: &str, relative_to: u32) -> Result<Vec<u8>, SourceError> {
        self.inner.get_resource(path, relative_to)
    }
}

fn book(chapters: u32) -> MemorySource {
    (0..chapters).fold(MemorySource::new(), |source, index| {
        source.with_chapter(format!("<p>chapter {index}</p>"))
    })
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

fn fast_config() -> PipelineConfig {
    PipelineConfig { cancel_wait_ms: 10, ..PipelineConfig::default() }
}

#[test]
fn superseded_request_delivers_nothing() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let source =
        GatedSource { inner: book(5), gated: 2, entered: entered_tx, release: release_rx };
    let coordinator = LoadCoordinator::new(DocumentId::new("book"), shared(source), &fast_config());

    let (ready_tx, ready_rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = ready_tx.send(ready);
    });
    let (error_tx, error_rx) = mpsc::channel();
    coordinator.on_load_error(move |failure| {
        let _ = error_tx.send(failure);
    });

    coordinator.request_chapter(2);
    assert_eq!(entered_rx.recv_timeout(TIMEOUT), Ok(2), "chapter 2 fetch started");

    let latest = coordinator.request_chapter(3);
    release_tx.send(()).expect("release gate");

    let ready = ready_rx.recv_timeout(TIMEOUT).expect("chapter 3 delivered");
    assert_eq!(ready.chapter.chapter_index, 3);
    assert_eq!(ready.generation, latest);
    assert!(ready_rx.recv_timeout(QUIET).is_err(), "exactly one delivery");
    assert!(error_rx.try_recv().is_err());

    let stats = coordinator.cache_stats();
    assert_eq!(stats.rendered.count, 1);
    assert_eq!(stats.raw.count, 1, "cancelled load must not populate the raw cache");
    assert_eq!(coordinator.load_stats().cancelled, 1);
}

#[test]
fn rapid_navigation_ends_on_the_last_chapter() {
    let coordinator =
        LoadCoordinator::new(DocumentId::new("book"), shared(book(6)), &fast_config());
    let (tx, rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = tx.send(ready);
    });

    let mut last = None;
    for chapter_index in 0..6 {
        last = Some(coordinator.request_chapter(chapter_index));
    }

    let mut delivered = Vec::new();
    while let Ok(ready) = rx.recv_timeout(QUIET) {
        delivered.push(ready);
    }
    let final_delivery = delivered.last().expect("at least one delivery");
    assert_eq!(final_delivery.chapter.chapter_index, 5);
    assert_eq!(Some(final_delivery.generation), last);

    let mut generations: Vec<_> = delivered.iter().map(|ready| ready.generation).collect();
    generations.dedup();
    assert_eq!(generations.len(), delivered.len(), "no request is delivered twice");
}

#[test]
fn images_are_inlined_and_missing_ones_left_alone() {
    let source = MemorySource::new()
        .with_chapter(r#"<p><img src="a.png"/><img src="a.png"/><img src="gone.png"/></p>"#)
        .with_resource("a.png", png(4, 4));
    let coordinator =
        LoadCoordinator::new(DocumentId::new("book"), shared(source), &fast_config());
    let (tx, rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = tx.send(ready);
    });

    coordinator.request_chapter(0);
    let ready = rx.recv_timeout(TIMEOUT).expect("content ready");
    let markup = &ready.chapter.markup;
    assert_eq!(markup.matches("data:image/png;base64,").count(), 2);
    assert!(markup.contains(r#"src="gone.png""#));
    assert_eq!(ready.chapter.resource_count, 1);
    assert_eq!(coordinator.cache_stats().resource.count, 1);
}

#[test]
fn second_request_is_served_from_the_rendered_cache() {
    let coordinator =
        LoadCoordinator::new(DocumentId::new("book"), shared(book(2)), &fast_config());
    let (tx, rx) = mpsc::channel();
    coordinator.on_content_ready(move |ready| {
        let _ = tx.send(ready);
    });

    coordinator.request_chapter(1);
    let first = rx.recv_timeout(TIMEOUT).expect("first load");
    coordinator.request_chapter(1);
    let second = rx.recv_timeout(TIMEOUT).expect("second load");

    assert!(Arc::ptr_eq(&first.chapter, &second.chapter));
    assert_eq!(coordinator.cache_stats().rendered.hits, 1);
}

#[test]
fn invalid_utf8_is_reported_as_corrupted() {
    struct Binary;
    impl ContentSource for Binary {
        fn chapter_count(&self) -> u32 {
            1
        }
        fn get_chapter_markup(&mut self, _chapter_index: u32) -> Result<Vec<u8>, SourceError> {
            Ok(vec![0xFF, 0xFE, 0x00])
        }
        fn get_resource(&mut self, path: &str, _relative_to: u32) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::NotFound(path.to_string()))
        }
    }

    let coordinator = LoadCoordinator::new(DocumentId::new("bin"), shared(Binary), &fast_config());
    let (tx, rx) = mpsc::channel();
    coordinator.on_load_error(move |failure| {
        let _ = tx.send(failure);
    });

    coordinator.request_chapter(0);
    let failure = rx.recv_timeout(TIMEOUT).expect("load error");
    assert!(matches!(failure.error, ContentError::ContentCorrupted { .. }));
    assert!(failure.error.is_user_facing());
}

#[test]
fn mismatched_rendered_entry_is_dropped() {
    let document_id = DocumentId::new("book");
    let caches = Arc::new(ChapterCaches::new(&PipelineConfig::default()));
    let wrong = Arc::new(RenderedChapter {
        document_id: document_id.clone(),
        chapter_index: 9,
        markup: String::new(),
        resource_count: 0,
    });
    caches.rendered.set(ChapterKey::new(document_id.clone(), 0), wrong);

    let generation = GenerationToken::new(1);
    let loader = ContentLoader::new(
        LoadRequest { chapter_index: 0, generation },
        document_id.clone(),
        shared(book(1)),
        Arc::clone(&caches),
        ImageProcessor::default(),
        CancellationToken::new(generation),
    );

    let outcome = loader.run();
    assert!(matches!(outcome, LoadOutcome::Failed(ContentError::CacheIntegrity { .. })));
    assert!(!caches.rendered.contains(&ChapterKey::new(document_id, 0)));
}

#[test]
fn cancelled_loader_leaves_caches_untouched() {
    let document_id = DocumentId::new("book");
    let caches = Arc::new(ChapterCaches::new(&PipelineConfig::default()));
    let source = MemorySource::new()
        .with_chapter(r#"<img src="a.png">"#)
        .with_resource("a.png", png(2, 2));
    let generation = GenerationToken::new(1);
    let token = CancellationToken::new(generation);
    token.cancel();

    let loader = ContentLoader::new(
        LoadRequest { chapter_index: 0, generation },
        document_id.clone(),
        shared(source),
        Arc::clone(&caches),
        ImageProcessor::default(),
        token,
    );

    assert!(loader.run().is_cancelled());
    assert!(caches.raw.is_empty());
    assert!(caches.rendered.is_empty());
    assert!(!caches.resource.contains(&ResourceKey::new(document_id, "a.png")));
}

#[test]
fn memory_crossings_are_forwarded_after_loads() {
    let config = PipelineConfig { memory_limit_bytes: Some(1_000), ..fast_config() };
    let coordinator = LoadCoordinator::new(DocumentId::new("book"), shared(book(2)), &config)
        .with_monitor(MemoryMonitor::with_sampler(|| Some(5_000)));
    let (tx, rx) = mpsc::channel();
    coordinator.on_memory_event(move |event| {
        let _ = tx.send(event);
    });

    coordinator.request_chapter(0);
    assert_eq!(
        rx.recv_timeout(TIMEOUT),
        Ok(MemoryEvent::Exceeded { usage_bytes: 5_000, limit_bytes: 1_000 })
    );

    coordinator.request_chapter(1);
    assert!(rx.recv_timeout(QUIET).is_err(), "steady state above the limit stays quiet");
}

#[test]
fn positions_round_trip_through_the_store() {
    let store = Arc::new(MemoryPositionStore::new());
    let document_id = DocumentId::new("book");
    let coordinator = LoadCoordinator::new(document_id.clone(), shared(book(3)), &fast_config())
        .with_position_store(store.clone());

    coordinator.report_content_height(2, 3000);
    assert_eq!(coordinator.query_page_count(2, 1000), Ok(3));
    assert_eq!(coordinator.goto_page(2, 1), Ok(1000));
    coordinator.save_position().expect("save");

    let reopened = LoadCoordinator::new(document_id, shared(book(3)), &fast_config())
        .with_position_store(store);
    let restored = reopened.restore_position().expect("restore").expect("stored position");
    assert_eq!((restored.chapter_index, restored.page_index, restored.offset), (2, 1, 1000));
    assert_eq!(reopened.current_position(), restored);
}

#[test]
fn reading_mode_is_saved_with_the_position() {
    let store = Arc::new(MemoryPositionStore::new());
    let document_id = DocumentId::new("book");
    let coordinator = LoadCoordinator::new(document_id.clone(), shared(book(2)), &fast_config())
        .with_position_store(store.clone());
    assert_eq!(coordinator.current_position().mode, ReadingMode::Paginated);

    coordinator.set_reading_mode(ReadingMode::Continuous);
    coordinator.request_chapter(1);
    assert_eq!(coordinator.current_position().mode, ReadingMode::Continuous);
    coordinator.save_position().expect("save");

    let reopened = LoadCoordinator::new(document_id, shared(book(2)), &fast_config())
        .with_position_store(store);
    let restored = reopened.restore_position().expect("restore").expect("stored position");
    assert_eq!((restored.chapter_index, restored.mode), (1, ReadingMode::Continuous));
}
