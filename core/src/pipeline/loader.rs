//! Turns one chapter request into a fully resolved [`RenderedChapter`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::cache::ChapterCaches;
use crate::error::ContentError;
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::markup;
use crate::pipeline::processor::ImageProcessor;
use crate::source::SharedSource;
use crate::types::{
    ChapterKey, DocumentId, LoadRequest, RawChapter, RenderedChapter, ResourceBytes, ResourceKey,
};

/// Terminal state of a load.
#[derive(Debug)]
pub enum LoadOutcome {
    Completed(Arc<RenderedChapter>),
    Failed(ContentError),
    Cancelled,
}

impl LoadOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Cache writes held back until the request commits, so a superseded load leaves every cache
/// untouched.
#[derive(Default)]
struct PendingWrites {
    raw: Option<(ChapterKey, Arc<RawChapter>)>,
    resources: Vec<(ResourceKey, Arc<ResourceBytes>)>,
}

/// Single-request loader. Construct one per [`LoadRequest`] and call [`ContentLoader::run`] on
/// a background thread.
pub struct ContentLoader {
    request: LoadRequest,
    document_id: DocumentId,
    source: SharedSource,
    caches: Arc<ChapterCaches>,
    processor: ImageProcessor,
    token: CancellationToken,
}

impl fmt::Debug for ContentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentLoader")
            .field("request", &self.request)
            .field("document_id", &self.document_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ContentLoader {
    pub fn new(
        request: LoadRequest,
        document_id: DocumentId,
        source: SharedSource,
        caches: Arc<ChapterCaches>,
        processor: ImageProcessor,
        token: CancellationToken,
    ) -> Self {
        Self { request, document_id, source, caches, processor, token }
    }

    pub fn request(&self) -> LoadRequest {
        self.request
    }

    /// Run the load to completion. Never panics on source or decode failures; those are
    /// reported through [`LoadOutcome::Failed`].
    pub fn run(&self) -> LoadOutcome {
        let chapter_index = self.request.chapter_index;
        let key = ChapterKey::new(self.document_id.clone(), chapter_index);

        match self.rendered_hit(&key) {
            Ok(Some(hit)) => {
                trace!(target: "pipeline::loader", chapter_index, "rendered cache hit");
                return self.finish(Ok(hit), PendingWrites::default());
            }
            Ok(None) => {}
            Err(err) => return self.finish(Err(err), PendingWrites::default()),
        }

        if self.token.is_cancelled() {
            return self.cancelled("before fetching markup");
        }

        let mut pending = PendingWrites::default();
        let raw = match self.raw_chapter(&key, &mut pending) {
            Ok(raw) => raw,
            Err(err) => return self.finish(Err(err), pending),
        };

        if self.token.is_cancelled() {
            return self.cancelled("before resolving resources");
        }

        let Some(rendered) = self.resolve_resources(&raw, &mut pending) else {
            return self.cancelled("while resolving resources");
        };

        self.finish(Ok(Arc::new(rendered)), pending)
    }

    fn rendered_hit(&self, key: &ChapterKey) -> Result<Option<Arc<RenderedChapter>>, ContentError> {
        let Some(hit) = self.caches.rendered.get(key) else {
            return Ok(None);
        };
        if hit.document_id != key.document_id || hit.chapter_index != key.chapter_index {
            let detail = format!(
                "rendered cache key {}#{} holds {}#{}",
                key.document_id.as_str(),
                key.chapter_index,
                hit.document_id.as_str(),
                hit.chapter_index
            );
            error!(target: "pipeline::loader", %detail, "cache integrity violated");
            self.caches.rendered.remove(key);
            return Err(ContentError::CacheIntegrity { detail });
        }
        Ok(Some(hit))
    }

    fn raw_chapter(
        &self,
        key: &ChapterKey,
        pending: &mut PendingWrites,
    ) -> Result<Arc<RawChapter>, ContentError> {
        if let Some(raw) = self.caches.raw.get(key) {
            return Ok(raw);
        }

        let chapter_index = key.chapter_index;
        let what = format!("chapter {chapter_index}");
        let bytes = self
            .source
            .lock()
            .get_chapter_markup(chapter_index)
            .map_err(|err| ContentError::from_source(err, what.clone()))?;
        let markup = String::from_utf8(bytes).map_err(|err| ContentError::ContentCorrupted {
            what,
            reason: format!("markup is not valid UTF-8: {err}"),
        })?;

        let raw = Arc::new(RawChapter { chapter_index, markup });
        pending.raw = Some((key.clone(), Arc::clone(&raw)));
        Ok(raw)
    }

    /// Returns `None` if the request was cancelled part way through.
    fn resolve_resources(
        &self,
        raw: &RawChapter,
        pending: &mut PendingWrites,
    ) -> Option<RenderedChapter> {
        let refs = markup::scan_references(&raw.markup);
        let mut data_uris = HashMap::new();

        for path in markup::unique_paths(&refs) {
            if self.token.is_cancelled() {
                return None;
            }
            if let Some(resource) = self.resource(path, pending) {
                let uri = markup::data_uri(&resource.mime, &resource.bytes);
                data_uris.insert(path.to_string(), uri);
            }
        }

        let inlined = markup::inline_resources(&raw.markup, &refs, &data_uris);
        Some(RenderedChapter {
            document_id: self.document_id.clone(),
            chapter_index: raw.chapter_index,
            markup: inlined,
            resource_count: data_uris.len(),
        })
    }

    /// Resolve one resource. A failed fetch leaves the reference unresolved; a failed decode
    /// falls back to the original bytes. Neither fails the chapter.
    fn resource(&self, path: &str, pending: &mut PendingWrites) -> Option<Arc<ResourceBytes>> {
        let chapter_index = self.request.chapter_index;
        let resolved = self.source.lock().resolve_path(path, chapter_index);
        let key = ResourceKey::new(self.document_id.clone(), resolved.clone());

        if let Some(hit) = self.caches.resource.get(&key) {
            return Some(hit);
        }
        if let Some((_, queued)) = pending.resources.iter().find(|(queued, _)| *queued == key) {
            return Some(Arc::clone(queued));
        }

        let original = match self.source.lock().get_resource(&resolved, chapter_index) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    target: "pipeline::loader",
                    chapter_index,
                    path = %resolved,
                    "unable to fetch resource: {err}"
                );
                return None;
            }
        };

        let mime = markup::mime_from_path(&resolved).to_string();
        let resource = if self.processor.should_skip(&mime) {
            ResourceBytes { mime, bytes: original, original: true }
        } else {
            let (max_w, max_h) = self.processor.aggressive_limits(original.len());
            match self.processor.process(&original, max_w, max_h) {
                Ok(bytes) => {
                    let untouched = bytes == original;
                    ResourceBytes { mime, bytes, original: untouched }
                }
                Err(err) => {
                    warn!(
                        target: "pipeline::loader",
                        chapter_index,
                        path = %resolved,
                        "resource processing failed, using original bytes: {err}"
                    );
                    ResourceBytes { mime, bytes: original, original: true }
                }
            }
        };

        let resource = Arc::new(resource);
        pending.resources.push((key, Arc::clone(&resource)));
        Some(resource)
    }

    fn finish(
        &self,
        result: Result<Arc<RenderedChapter>, ContentError>,
        pending: PendingWrites,
    ) -> LoadOutcome {
        if !self.token.try_commit() {
            return self.cancelled("before publishing");
        }

        if let Some((key, raw)) = pending.raw {
            self.caches.raw.set(key, raw);
        }
        for (key, resource) in pending.resources {
            self.caches.resource.set(key, resource);
        }

        match result {
            Ok(rendered) => {
                let key = ChapterKey::new(self.document_id.clone(), rendered.chapter_index);
                if !self.caches.rendered.contains(&key) {
                    self.caches.rendered.set(key, Arc::clone(&rendered));
                }
                LoadOutcome::Completed(rendered)
            }
            Err(err) => LoadOutcome::Failed(err),
        }
    }

    fn cancelled(&self, stage: &str) -> LoadOutcome {
        debug!(
            target: "pipeline::loader",
            chapter_index = self.request.chapter_index,
            generation = self.request.generation.as_u64(),
            stage,
            "load cancelled"
        );
        LoadOutcome::Cancelled
    }
}
