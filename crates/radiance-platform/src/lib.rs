// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

pub use winit;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use winit::window::Window;

/// Set by the windowing side on every resize, consumed by the renderer.
#[derive(Clone, Debug, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether the flag was set and clears it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Current drawable size in physical pixels. Zero while minimized.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    if window.is_minimized().unwrap_or(false) {
        tracing::debug!("window minimized, reporting 0x0");
        return (0, 0);
    }
    let size = window.inner_size();
    (size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_flag() {
        let flag = ResizeFlag::new();
        assert!(!flag.take());
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.is_raised());
    }

    #[test]
    fn clones_share_state() {
        let a = ResizeFlag::new();
        let b = a.clone();
        b.raise();
        assert!(a.take());
        assert!(!b.is_raised());
    }
}
