use crate::storage::page::Page;
use std::fmt::Debug;

pub type FrameId = usize;

pub trait Replacer: Debug {
    /// Select the frame to evict among the resident pages. Returns None if
    /// no frame can be evicted.
    fn victim(&mut self, frames: &[Page]) -> Option<FrameId>;

    /// Name used in log output.
    fn name(&self) -> &'static str;
}
