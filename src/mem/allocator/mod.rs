pub mod bitmap_allocator;

use super::frame::Frame;

pub use bitmap_allocator::BitMapAllocator;

// Physical frames are shared between address spaces, so every mapping holds a
// reference. A frame goes back to the free pool when its last reference is gone.
pub trait FrameAllocator {
    fn allocate_frame(&mut self) -> Option<Frame>;
    fn deallocate_frame(&mut self, frame: Frame);

    fn incref(&mut self, frame: Frame);
    // frees the frame once the count reaches zero
    fn decref(&mut self, frame: Frame);
    fn refcount(&self, frame: Frame) -> u32;
}
