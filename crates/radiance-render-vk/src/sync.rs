//! Per-slot semaphores and fences for the render-ahead ring.

use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::{RenderResult, VkContext};

#[derive(Clone, Copy, Debug)]
pub struct SlotSync {
    pub acquire: vk::Semaphore,
    pub render: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns at once.
    pub in_flight: vk::Fence,
}

pub struct FrameSync {
    device: Arc<Device>,
    slots: Vec<SlotSync>,
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        for s in self.slots.drain(..) {
            self.device.destroy_semaphore(s.acquire);
            self.device.destroy_semaphore(s.render);
            self.device.destroy_fence(s.in_flight);
        }
    }
}

impl FrameSync {
    pub fn create(device: &Arc<Device>, render_ahead: usize) -> RenderResult<Self> {
        let mut sync = FrameSync {
            device: Arc::clone(device),
            slots: Vec::with_capacity(render_ahead),
        };
        for _ in 0..render_ahead {
            let acquire = device.create_semaphore()?;
            let render = match device.create_semaphore() {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(acquire);
                    return Err(e);
                }
            };
            let in_flight = match device.create_fence(true) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(acquire);
                    device.destroy_semaphore(render);
                    return Err(e);
                }
            };
            sync.slots.push(SlotSync {
                acquire,
                render,
                in_flight,
            });
        }
        Ok(sync)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, i: usize) -> &SlotSync {
        &self.slots[i]
    }

    /// Blocks until the GPU has finished the last submission from slot `i`.
    pub fn wait(&self, i: usize) -> RenderResult<()> {
        unsafe {
            self.device
                .raw
                .wait_for_fences(&[self.slots[i].in_flight], true, u64::MAX)
                .ctx("wait_for_fences")
        }
    }

    pub fn reset(&self, i: usize) -> RenderResult<()> {
        unsafe {
            self.device
                .raw
                .reset_fences(&[self.slots[i].in_flight])
                .ctx("reset_fences")
        }
    }
}

pub fn next_slot(current: usize, render_ahead: usize) -> usize {
    (current + 1) % render_ahead.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_wrap_around() {
        let seq: Vec<_> = std::iter::successors(Some(0), |&i| Some(next_slot(i, 2)))
            .take(5)
            .collect();
        assert_eq!(seq, [0, 1, 0, 1, 0]);
        assert_eq!(next_slot(0, 1), 0);
        assert_eq!(next_slot(2, 3), 0);
    }
}
