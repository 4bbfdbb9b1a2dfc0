//! Per-frame state machine, independent of the Vulkan objects it drives.

use radiance_render::{DrawPasses, FrameInput, RenderSize, SceneUbo};
use tracing::{debug, info};

use crate::error::RenderResult;
use crate::sync::next_slot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable this frame; the swapchain is rebuilt before the next one.
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameReport {
    Rendered,
    /// The swapchain was rebuilt and nothing was drawn.
    Recreated,
    /// The surface has no area.
    Paused,
}

/// The GPU side of one frame, in the order the loop calls it.
pub trait FrameBackend {
    /// Current drawable size; 0x0 while minimized. A surface query failure is
    /// an error, never an empty size.
    fn framebuffer_size(&self) -> RenderResult<RenderSize>;
    /// Blocks until slot `slot`'s previous submission has retired.
    fn wait_slot(&mut self, slot: usize) -> RenderResult<()>;
    fn acquire(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;
    fn write_uniforms(&mut self, slot: usize, ubo: &SceneUbo) -> RenderResult<()>;
    fn reset_slot(&mut self, slot: usize) -> RenderResult<()>;
    fn record(&mut self, slot: usize, image: u32, passes: DrawPasses) -> RenderResult<()>;
    fn submit(&mut self, slot: usize) -> RenderResult<()>;
    fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentOutcome>;
    /// Device idle, then swapchain-sized resources rebuilt for `size`.
    fn recreate(&mut self, size: RenderSize) -> RenderResult<()>;
}

#[derive(Debug)]
pub struct FrameLoop {
    slot: usize,
    render_ahead: usize,
    needs_recreate: bool,
    resized: bool,
    paused: bool,
    pub passes: DrawPasses,
}

impl FrameLoop {
    pub fn new(render_ahead: usize, passes: DrawPasses) -> Self {
        FrameLoop {
            slot: 0,
            render_ahead: render_ahead.max(1),
            needs_recreate: false,
            resized: false,
            paused: false,
            passes,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn render_ahead(&self) -> usize {
        self.render_ahead
    }

    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    pub fn recreate_pending(&self) -> bool {
        self.needs_recreate || self.resized
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait on this slot's fence (nothing below touches slot memory before it)
    // 2) recreate if a resize or suboptimal/out-of-date present is pending
    // 3) acquire (signals this slot's acquire semaphore)
    // 4) uniforms, fence reset, record, submit (waits acquire, signals render)
    // 5) present (waits render), then advance the slot
    // The fence is reset only after a successful acquire, so an out-of-date
    // acquire leaves it signaled for the retry.
    pub fn run_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        input: &FrameInput,
    ) -> RenderResult<FrameReport> {
        let size = backend.framebuffer_size()?;
        if size.is_empty() {
            if !self.paused {
                info!("vk: framebuffer is 0x0 → paused");
                self.paused = true;
            }
            self.needs_recreate = true;
            return Ok(FrameReport::Paused);
        }
        if self.paused {
            info!("vk: framebuffer {}x{} → resumed", size.width, size.height);
            self.paused = false;
        }

        let slot = self.slot;
        backend.wait_slot(slot)?;

        if std::mem::take(&mut self.resized) {
            self.needs_recreate = true;
        }
        if self.needs_recreate {
            backend.recreate(size)?;
            self.needs_recreate = false;
        }

        let image = match backend.acquire(slot)? {
            AcquireOutcome::Ready(i) => i,
            AcquireOutcome::Suboptimal(i) => {
                self.needs_recreate = true;
                i
            }
            AcquireOutcome::OutOfDate => {
                debug!("acquire out of date; rebuilding");
                backend.recreate(size)?;
                return Ok(FrameReport::Recreated);
            }
        };

        backend.write_uniforms(slot, &SceneUbo::new(input.view, input.proj))?;
        backend.reset_slot(slot)?;
        backend.record(slot, image, self.passes)?;
        backend.submit(slot)?;

        match backend.present(slot, image)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                self.needs_recreate = true;
            }
        }
        self.slot = next_slot(slot, self.render_ahead);
        Ok(FrameReport::Rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Write(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate(RenderSize),
    }

    #[derive(Default)]
    struct MockBackend {
        size: Option<RenderSize>,
        surface_error: Option<vk::Result>,
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        next_image: u32,
        // Per slot: fence signaled?
        fences: Vec<bool>,
        fence_violations: usize,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            MockBackend {
                size: Some(RenderSize {
                    width: 1200,
                    height: 720,
                }),
                fences: vec![true; slots],
                ..Default::default()
            }
        }

        fn recreates(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Recreate(_)))
                .count()
        }
    }

    impl FrameBackend for MockBackend {
        fn framebuffer_size(&self) -> RenderResult<RenderSize> {
            if let Some(r) = self.surface_error {
                return Err(RenderError::vk("surface capabilities", r));
            }
            Ok(self.size.unwrap_or(RenderSize {
                width: 0,
                height: 0,
            }))
        }

        fn wait_slot(&mut self, slot: usize) -> RenderResult<()> {
            // The mock GPU retires work instantly.
            self.fences[slot] = true;
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            let out = self
                .acquires
                .pop_front()
                .unwrap_or(AcquireOutcome::Ready(self.next_image));
            self.next_image = (self.next_image + 1) % 3;
            Ok(out)
        }

        fn write_uniforms(&mut self, slot: usize, ubo: &SceneUbo) -> RenderResult<()> {
            if !self.fences[slot] {
                self.fence_violations += 1;
            }
            assert_eq!(ubo.model, glam::Mat4::IDENTITY);
            self.calls.push(Call::Write(slot));
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
            self.fences[slot] = false;
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image: u32, _passes: DrawPasses) -> RenderResult<()> {
            self.calls.push(Call::Record(slot, image));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate(&mut self, size: RenderSize) -> RenderResult<()> {
            self.calls.push(Call::Recreate(size));
            Ok(())
        }
    }

    fn frame(lp: &mut FrameLoop, b: &mut MockBackend) -> FrameReport {
        lp.run_frame(b, &FrameInput::default()).unwrap()
    }

    #[test]
    fn steady_state_order_and_slot_rotation() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        for _ in 0..3 {
            assert_eq!(frame(&mut lp, &mut b), FrameReport::Rendered);
        }
        assert_eq!(
            &b.calls[..7],
            &[
                Call::Wait(0),
                Call::Acquire(0),
                Call::Write(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(b.calls[7], Call::Wait(1));
        assert_eq!(b.calls[14], Call::Wait(0));
        assert_eq!(lp.slot(), 1);
    }

    #[test]
    fn uniforms_written_only_after_fence_wait() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        b.presents = [PresentOutcome::Suboptimal].into();
        b.acquires = [AcquireOutcome::OutOfDate].into();
        for _ in 0..20 {
            frame(&mut lp, &mut b);
        }
        assert_eq!(b.fence_violations, 0);
        for (i, call) in b.calls.iter().enumerate() {
            if let Call::Write(slot) = call {
                let last_wait = b.calls[..i]
                    .iter()
                    .rev()
                    .find_map(|c| match c {
                        Call::Wait(s) => Some(*s),
                        _ => None,
                    });
                assert_eq!(last_wait, Some(*slot));
            }
        }
    }

    #[test]
    fn minimize_then_restore_recreates_once_before_acquire() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        frame(&mut lp, &mut b);

        b.size = None;
        for _ in 0..5 {
            assert_eq!(frame(&mut lp, &mut b), FrameReport::Paused);
        }
        b.calls.clear();

        b.size = Some(RenderSize {
            width: 800,
            height: 600,
        });
        assert_eq!(frame(&mut lp, &mut b), FrameReport::Rendered);
        assert_eq!(b.recreates(), 1);
        assert_eq!(b.calls[0], Call::Wait(1));
        assert!(matches!(b.calls[1], Call::Recreate(s) if s.width == 800));
        assert_eq!(b.calls[2], Call::Acquire(1));

        frame(&mut lp, &mut b);
        assert_eq!(b.recreates(), 1);
    }

    #[test]
    fn suboptimal_present_recreates_before_next_acquire() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        b.presents = [PresentOutcome::Suboptimal].into();

        assert_eq!(frame(&mut lp, &mut b), FrameReport::Rendered);
        assert!(matches!(b.calls.last(), Some(Call::Present(0, _))));
        assert_eq!(b.recreates(), 0);
        assert!(lp.recreate_pending());

        b.calls.clear();
        frame(&mut lp, &mut b);
        assert_eq!(b.calls[0], Call::Wait(1));
        assert!(matches!(b.calls[1], Call::Recreate(_)));
        assert_eq!(b.calls[2], Call::Acquire(1));
        assert!(!lp.recreate_pending());
    }

    #[test]
    fn out_of_date_acquire_skips_frame_without_resetting_fence() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        b.acquires = [AcquireOutcome::OutOfDate].into();

        assert_eq!(frame(&mut lp, &mut b), FrameReport::Recreated);
        assert!(!b.calls.contains(&Call::Reset(0)));
        assert_eq!(lp.slot(), 0);
        assert_eq!(frame(&mut lp, &mut b), FrameReport::Rendered);
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        b.acquires = [AcquireOutcome::Suboptimal(2)].into();
        assert_eq!(frame(&mut lp, &mut b), FrameReport::Rendered);
        assert!(b.calls.contains(&Call::Present(0, 2)));
        assert!(lp.recreate_pending());
    }

    #[test]
    fn resize_toggles_recreate_each_time() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        let sizes = [(800, 600), (1200, 720)];
        for i in 0..6 {
            let (w, h) = sizes[i % 2];
            b.size = Some(RenderSize {
                width: w,
                height: h,
            });
            lp.notify_resized();
            frame(&mut lp, &mut b);
        }
        assert_eq!(b.recreates(), 6);
        let recreated: Vec<_> = b
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Recreate(s) => Some((s.width, s.height)),
                _ => None,
            })
            .collect();
        assert_eq!(recreated[0], recreated[2]);
        assert_eq!(recreated[1], recreated[3]);
    }

    #[test]
    fn surface_query_failure_is_returned_not_paused() {
        let mut lp = FrameLoop::new(2, DrawPasses::all());
        let mut b = MockBackend::new(2);
        frame(&mut lp, &mut b);
        b.calls.clear();

        b.surface_error = Some(vk::Result::ERROR_SURFACE_LOST_KHR);
        for _ in 0..3 {
            let err = lp.run_frame(&mut b, &FrameInput::default()).unwrap_err();
            assert!(matches!(
                err,
                RenderError::Resource {
                    result: vk::Result::ERROR_SURFACE_LOST_KHR,
                    ..
                }
            ));
        }
        assert!(b.calls.is_empty());
        assert!(!lp.recreate_pending());
    }
}
