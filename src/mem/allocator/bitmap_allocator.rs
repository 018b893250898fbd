use super::FrameAllocator;
use crate::mem::{frame::Frame, PAGE_SIZE};
use alloc::{boxed::Box, vec::Vec};
use hashbrown::HashMap;
use log::trace;

pub type PageBytes = [u8; PAGE_SIZE as usize];

// Hosted stand-in for physical memory: one bit per frame, a reference count
// for every frame in use and the frame's bytes.
#[derive(Debug)]
pub struct BitMapAllocator {
    inner: Vec<u8>,
    frames: usize,
    used_frames: usize,
    refcounts: HashMap<Frame, u32>,
    contents: HashMap<Frame, Box<PageBytes>>,
}

impl BitMapAllocator {
    pub fn new(frames: usize) -> Self {
        Self {
            inner: vec![0; (frames + 7) / 8],
            frames,
            used_frames: 0,
            refcounts: HashMap::new(),
            contents: HashMap::new(),
        }
    }

    pub fn free_frames(&self) -> usize {
        self.frames - self.used_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn contents(&self, frame: Frame) -> Option<&PageBytes> {
        self.contents.get(&frame).map(|page| &**page)
    }

    pub fn contents_mut(&mut self, frame: Frame) -> Option<&mut PageBytes> {
        self.contents.get_mut(&frame).map(|page| &mut **page)
    }

    fn get_free_frame(&self) -> Option<usize> {
        (0..self.frames).find(|&index| !self.present(index))
    }

    #[inline]
    fn present(&self, frame: usize) -> bool {
        self.inner[frame / 8] & (1 << (frame % 8)) != 0
    }

    #[inline]
    fn set(&mut self, frame: usize) {
        self.inner[frame / 8] |= 1 << (frame % 8);
    }

    #[inline]
    fn reset(&mut self, frame: usize) {
        self.inner[frame / 8] &= !(1 << (frame % 8));
    }
}

impl FrameAllocator for BitMapAllocator {
    fn allocate_frame(&mut self) -> Option<Frame> {
        let index = self.get_free_frame()?;
        self.set(index);
        self.used_frames += 1;

        let frame = Frame::new(index as u32);
        self.contents.insert(frame, Box::new([0; PAGE_SIZE as usize]));
        trace!("bitmap allocated frame {:#x}", frame.number);
        Some(frame)
    }

    fn deallocate_frame(&mut self, frame: Frame) {
        let index = frame.number as usize;
        assert!(
            index < self.frames && self.present(index),
            "freeing unallocated frame {:#x}",
            frame.number
        );
        self.reset(index);
        self.used_frames -= 1;
        self.refcounts.remove(&frame);
        self.contents.remove(&frame);
        trace!("bitmap freed frame {:#x}", frame.number);
    }

    fn incref(&mut self, frame: Frame) {
        *self.refcounts.entry(frame).or_insert(0) += 1;
    }

    fn decref(&mut self, frame: Frame) {
        let Some(count) = self.refcounts.get_mut(&frame) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.deallocate_frame(frame);
        }
    }

    fn refcount(&self, frame: Frame) -> u32 {
        self.refcounts.get(&frame).copied().unwrap_or(0)
    }
}
