//! Display list of classified messages with a category filter.
//!
//! Filtering only toggles visibility. Nothing is re-fetched or reclassified
//! when the filter changes.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::models::{Category, CategoryFilter, ClassifiedMessage, PipelineEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub item: ClassifiedMessage,
    pub visible: bool,
}

impl FeedEntry {
    pub fn category(&self) -> Category {
        self.item.category
    }
}

/// Turns an entry into something displayable. Must not depend on anything
/// but the entry.
pub trait CardRenderer {
    type Output;

    fn render(&self, entry: &FeedEntry) -> Self::Output;
}

#[derive(Debug, Default)]
pub struct Feed {
    entries: VecDeque<FeedEntry>,
    filter: CategoryFilter,
}

impl Feed {
    pub fn new(filter: CategoryFilter) -> Self {
        Self {
            entries: VecDeque::new(),
            filter,
        }
    }

    pub fn filter(&self) -> CategoryFilter {
        self.filter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a pipeline event. Returns the entries it inserted, newest first.
    pub fn apply_event(&mut self, event: &PipelineEvent) -> Vec<&FeedEntry> {
        match event {
            PipelineEvent::Results(items) => {
                let inserted = self.apply_results(items.iter().cloned());
                self.entries.iter().take(inserted).collect()
            }
            PipelineEvent::Status(_) => Vec::new(),
        }
    }

    /// Prepends each item in turn, so the last item of a batch ends up on top.
    /// Items outside the active filter are inserted hidden.
    pub fn apply_results(&mut self, items: impl IntoIterator<Item = ClassifiedMessage>) -> usize {
        let mut inserted = 0;
        for item in items {
            let visible = self.filter.matches(item.category);
            self.entries.push_front(FeedEntry { item, visible });
            inserted += 1;
        }
        inserted
    }

    /// Switches the filter and recomputes visibility. Returns the visible count.
    pub fn set_filter(&mut self, filter: CategoryFilter) -> usize {
        self.filter = filter;
        for entry in self.entries.iter_mut() {
            entry.visible = filter.matches(entry.item.category);
        }
        let visible = self.visible_count();
        debug!(filter = %filter, visible, total = self.entries.len(), "Feed filter changed");
        visible
    }

    /// All entries, most recent first.
    pub fn entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter()
    }

    pub fn visible_entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter().filter(|e| e.visible)
    }

    pub fn visible_count(&self) -> usize {
        self.visible_entries().count()
    }

    pub fn render_visible<R: CardRenderer>(&self, renderer: &R) -> Vec<R::Output> {
        self.visible_entries().map(|e| renderer.render(e)).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
