use super::replacer::{FrameId, Replacer};
use crate::storage::page::Page;

/// Least-recently-used policy over the recency counters the pool stamps on
/// each page. The victim is the frame with the minimum counter. The pool
/// never stamps the same counter twice, so the minimum is unique.
#[derive(Debug, Default)]
pub struct LruReplacer;

impl LruReplacer {
    pub fn new() -> Self {
        Self
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self, frames: &[Page]) -> Option<FrameId> {
        frames
            .iter()
            .enumerate()
            .min_by_key(|(_, page)| page.recency())
            .map(|(frame_id, _)| frame_id)
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;
    use crate::storage::page::PageId;
    use crate::storage::PAGE_SIZE;

    fn page(page_id: u32, recency: u64) -> Page {
        let mut page = Page::new(TableId(1), PageId(page_id), Box::new([0u8; PAGE_SIZE]));
        page.stamp(recency);
        page
    }

    #[test]
    fn test_empty_has_no_victim() {
        let mut replacer = LruReplacer::new();
        assert_eq!(replacer.victim(&[]), None);
    }

    #[test]
    fn test_picks_minimum_recency() {
        let mut replacer = LruReplacer::new();
        let frames = vec![page(1, 7), page(2, 3), page(3, 9)];
        assert_eq!(replacer.victim(&frames), Some(1));
    }


    #[test]
    fn test_single_frame() {
        let mut replacer = LruReplacer::new();
        let frames = vec![page(8, 100)];
        assert_eq!(replacer.victim(&frames), Some(0));
    }
}
