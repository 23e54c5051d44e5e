//! Viewport-height virtual pagination.
//!
//! A chapter's laid-out content is a single column `content_height` units tall. Pages are
//! consecutive `viewport_height` slices of it; the last page is whatever remains. Break
//! positions are a pure function of the two heights, so they can be dropped and rebuilt at
//! any time (for instance after a window resize) without drifting.

use thiserror::Error;

use crate::config::ResizeAnchor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("viewport height must be non-zero")]
    InvalidViewport,
    #[error("page {page} is out of range for {page_count} pages")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("content height of chapter {chapter_index} has not been reported")]
    UnknownContentHeight { chapter_index: u32 },
    #[error("page breaks have not been calculated yet")]
    NotCalculated,
}

/// Ordered break offsets `[0, b1, …, content_height]` for one viewport height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBreaks {
    viewport_height: u32,
    offsets: Vec<u32>,
}

impl PageBreaks {
    /// Empty content still yields one (empty) page: `[0, 0]`.
    pub fn calculate(content_height: u32, viewport_height: u32) -> Result<Self, PaginationError> {
        if viewport_height == 0 {
            return Err(PaginationError::InvalidViewport);
        }

        let mut offsets = Vec::with_capacity((content_height / viewport_height) as usize + 2);
        offsets.push(0);
        let mut position = 0u32;
        while position < content_height {
            position = position.saturating_add(viewport_height).min(content_height);
            offsets.push(position);
        }
        if offsets.len() == 1 {
            offsets.push(0);
        }

        Ok(Self { viewport_height, offsets })
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn viewport_height(&self) -> u32 {
        self.viewport_height
    }

    pub fn content_height(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn page_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Page `i` with `breaks[i] <= offset < breaks[i + 1]`. The last page also owns
    /// `content_height` and anything past it.
    pub fn page_for_offset(&self, offset: u32) -> u32 {
        let last_page = self.page_count() - 1;
        if offset >= self.content_height() {
            return last_page;
        }
        let at_or_below = self.offsets.partition_point(|&start| start <= offset);
        ((at_or_below - 1) as u32).min(last_page)
    }

    /// Start offset of `page`. Out-of-range pages are an error, never clamped.
    pub fn offset_for_page(&self, page: u32) -> Result<u32, PaginationError> {
        if page >= self.page_count() {
            return Err(PaginationError::PageOutOfRange { page, page_count: self.page_count() });
        }
        Ok(self.offsets[page as usize])
    }
}

/// Lazily computed page breaks for one chapter.
#[derive(Debug, Clone)]
pub struct PaginationEngine {
    content_height: u32,
    breaks: Option<PageBreaks>,
}

impl PaginationEngine {
    pub fn new(content_height: u32) -> Self {
        Self { content_height, breaks: None }
    }

    pub fn calculate_breaks(
        content_height: u32,
        viewport_height: u32,
    ) -> Result<PageBreaks, PaginationError> {
        PageBreaks::calculate(content_height, viewport_height)
    }

    pub fn content_height(&self) -> u32 {
        self.content_height
    }

    /// A new measurement invalidates any cached breaks.
    pub fn set_content_height(&mut self, content_height: u32) {
        if content_height != self.content_height {
            self.content_height = content_height;
            self.breaks = None;
        }
    }

    /// True when no breaks exist for `current_viewport_height`.
    pub fn needs_recalculation(&self, current_viewport_height: u32) -> bool {
        self.breaks.as_ref().is_none_or(|breaks| breaks.viewport_height != current_viewport_height)
    }

    /// Breaks for `viewport_height`, rebuilding them when the height changed.
    pub fn breaks_for(&mut self, viewport_height: u32) -> Result<&PageBreaks, PaginationError> {
        if self.needs_recalculation(viewport_height) {
            self.breaks = Some(PageBreaks::calculate(self.content_height, viewport_height)?);
        }
        self.breaks.as_ref().ok_or(PaginationError::NotCalculated)
    }

    pub fn current(&self) -> Option<&PageBreaks> {
        self.breaks.as_ref()
    }

    pub fn page_for_offset(&self, offset: u32) -> Result<u32, PaginationError> {
        self.current()
            .map(|breaks| breaks.page_for_offset(offset))
            .ok_or(PaginationError::NotCalculated)
    }

    pub fn offset_for_page(&self, page: u32) -> Result<u32, PaginationError> {
        self.current().ok_or(PaginationError::NotCalculated)?.offset_for_page(page)
    }

    /// Recompute for `new_viewport_height` and carry `current_page` over.
    ///
    /// With [`ResizeAnchor::Fraction`] the page keeps its position relative to the page count;
    /// with [`ResizeAnchor::Offset`] the new page is the one containing the old page's start.
    /// If nothing was calculated before, the result is page 0.
    pub fn resize(
        &mut self,
        new_viewport_height: u32,
        current_page: u32,
        anchor: ResizeAnchor,
    ) -> Result<u32, PaginationError> {
        let previous = self.breaks.as_ref().map(|old| {
            let page = current_page.min(old.page_count() - 1);
            let fraction = page as f64 / old.page_count() as f64;
            let offset = old.offsets()[page as usize];
            (fraction, offset)
        });

        let breaks = self.breaks_for(new_viewport_height)?;
        let Some((fraction, offset)) = previous else {
            return Ok(0);
        };

        let last_page = breaks.page_count() - 1;
        let page = match anchor {
            ResizeAnchor::Fraction => {
                ((fraction * breaks.page_count() as f64).round() as u32).min(last_page)
            }
            ResizeAnchor::Offset => breaks.page_for_offset(offset),
        };
        Ok(page)
    }
}
