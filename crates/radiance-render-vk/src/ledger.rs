//! Live-handle bookkeeping for every object the device creates.

use std::sync::atomic::{AtomicIsize, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    Framebuffer,
    Swapchain,
    RenderPass,
    Pipeline,
    PipelineLayout,
    DescriptorPool,
    DescriptorSetLayout,
    ShaderModule,
    Semaphore,
    Fence,
}

impl HandleKind {
    pub const ALL: [HandleKind; 15] = [
        HandleKind::Buffer,
        HandleKind::Memory,
        HandleKind::Image,
        HandleKind::ImageView,
        HandleKind::Sampler,
        HandleKind::Framebuffer,
        HandleKind::Swapchain,
        HandleKind::RenderPass,
        HandleKind::Pipeline,
        HandleKind::PipelineLayout,
        HandleKind::DescriptorPool,
        HandleKind::DescriptorSetLayout,
        HandleKind::ShaderModule,
        HandleKind::Semaphore,
        HandleKind::Fence,
    ];
}

#[derive(Debug, Default)]
pub struct HandleLedger {
    counts: [AtomicIsize; 15],
}

impl HandleLedger {
    fn slot(&self, kind: HandleKind) -> &AtomicIsize {
        &self.counts[kind as usize]
    }

    pub fn created(&self, kind: HandleKind) {
        self.created_n(kind, 1);
    }

    pub fn created_n(&self, kind: HandleKind, n: usize) {
        self.slot(kind).fetch_add(n as isize, Ordering::Relaxed);
    }

    pub fn destroyed(&self, kind: HandleKind) {
        self.destroyed_n(kind, 1);
    }

    pub fn destroyed_n(&self, kind: HandleKind, n: usize) {
        self.slot(kind).fetch_sub(n as isize, Ordering::Relaxed);
    }

    /// Negative values mean a double destroy was recorded.
    pub fn live(&self, kind: HandleKind) -> isize {
        self.slot(kind).load(Ordering::Relaxed)
    }

    pub fn total_live(&self) -> isize {
        HandleKind::ALL.iter().map(|&k| self.live(k)).sum()
    }

    pub fn leaks(&self) -> Vec<(HandleKind, isize)> {
        HandleKind::ALL
            .iter()
            .map(|&k| (k, self.live(k)))
            .filter(|&(_, n)| n != 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_counts_report_no_leaks() {
        let ledger = HandleLedger::default();
        ledger.created(HandleKind::Image);
        ledger.created_n(HandleKind::Semaphore, 4);
        ledger.destroyed(HandleKind::Image);
        assert_eq!(ledger.total_live(), 4);
        assert_eq!(ledger.leaks(), vec![(HandleKind::Semaphore, 4)]);
        ledger.destroyed_n(HandleKind::Semaphore, 4);
        assert!(ledger.leaks().is_empty());
        assert_eq!(ledger.total_live(), 0);
    }

    #[test]
    fn kinds_index_distinct_slots() {
        let ledger = HandleLedger::default();
        for (i, &k) in HandleKind::ALL.iter().enumerate() {
            ledger.created_n(k, i + 1);
        }
        for (i, &k) in HandleKind::ALL.iter().enumerate() {
            assert_eq!(ledger.live(k), i as isize + 1);
        }
    }
}
