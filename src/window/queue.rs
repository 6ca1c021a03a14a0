//! FIFO buffer of keyframe records.

use std::collections::VecDeque;

use super::keyframe::KeyframeRecord;
use super::types::FrameId;

/// Append-at-tail, remove-at-head buffer of keyframe records.
#[derive(Debug, Default)]
pub struct KeyframeQueue {
    records: VecDeque<KeyframeRecord>,
}

impl KeyframeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, record: KeyframeRecord) {
        self.records.push_back(record);
    }

    pub fn pop_front(&mut self) -> Option<KeyframeRecord> {
        self.records.pop_front()
    }

    pub fn front(&self) -> Option<&KeyframeRecord> {
        self.records.front()
    }

    pub fn back(&self) -> Option<&KeyframeRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyframeRecord> {
        self.records.iter()
    }

    /// All records as one slice, oldest first.
    pub fn make_contiguous(&mut self) -> &[KeyframeRecord] {
        self.records.make_contiguous()
    }

    pub fn contains_frame(&self, frame_id: FrameId) -> bool {
        self.records.iter().any(|r| r.frame_id == frame_id)
    }

    pub fn frame_ids(&self) -> Vec<FrameId> {
        self.records.iter().map(|r| r.frame_id).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
