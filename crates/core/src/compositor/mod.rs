use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::blend::{check_compatibility, composite_frames, BlendMode};
use crate::config::CompositorConfig;
use crate::events::{EventBus, Subscription};
use crate::frame::{DeviceId, LedFrame, ModuleId};
use crate::{LightdeskError, Result};

/// Observability events emitted by the compositor. All are fire-and-forget;
/// `CompositedFrame` is the actual output path, consumed by virtual preview
/// displays and by the physical device transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    FrameSubmitted {
        module_id: ModuleId,
        device_id: DeviceId,
    },
    CompositedFrame {
        device_id: DeviceId,
        pixels: Vec<u8>,
    },
    /// Frames sharing a device could not be blended; the compositor fell back
    /// to toggle mode and sent only the most recent frame.
    IncompatibilityDetected {
        device_id: DeviceId,
        modules: Vec<ModuleId>,
        reason: String,
    },
    BlendModeChanged {
        mode: BlendMode,
    },
}

/// Buffers the latest frame per `(device, module)` pair, rate-limits output,
/// and emits one composited frame per device per tick.
///
/// Frames are never queued: a frame arriving inside the minimum send interval
/// is dropped and the buffer simply holds the last value until the next
/// submission gets through the gate. Subscribers run synchronously under the
/// compositor lock and must not call back into the compositor.
#[derive(Debug)]
pub struct FrameCompositor {
    inner: Mutex<CompositorInner>,
}

#[derive(Debug)]
struct CompositorInner {
    /// Per-module frames keyed by device. The inner map is ordered so toggle
    /// fallback and event payloads list modules deterministically.
    buffers: HashMap<DeviceId, BTreeMap<ModuleId, LedFrame>>,
    last_send: HashMap<DeviceId, Instant>,
    min_send_interval: Duration,
    blend_mode: BlendMode,
    events: EventBus<CompositorEvent>,
}

impl FrameCompositor {
    pub fn new(config: &CompositorConfig) -> Self {
        let min_send_interval = if config.max_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1_000 / u64::from(config.max_fps))
        };

        Self {
            inner: Mutex::new(CompositorInner {
                buffers: HashMap::new(),
                last_send: HashMap::new(),
                min_send_interval,
                blend_mode: config.blend_mode,
                events: EventBus::new(),
            }),
        }
    }

    /// Accepts a frame from a module. Malformed frames (empty buffer or a
    /// length that is not a whole number of RGB triples) are logged and
    /// dropped without erroring; valid frames replace the previous one from
    /// the same producer for the same device and trigger a device tick.
    pub fn submit_frame(&self, frame: LedFrame) -> Result<()> {
        if !frame.is_well_formed() {
            tracing::warn!(
                module = %frame.producer_id,
                device = %frame.device_id,
                len = frame.pixels.len(),
                "rejecting malformed frame"
            );
            return Ok(());
        }

        let mut inner = self.lock()?;
        let device_id = frame.device_id.clone();
        inner.events.emit(&CompositorEvent::FrameSubmitted {
            module_id: frame.producer_id.clone(),
            device_id: device_id.clone(),
        });
        inner
            .buffers
            .entry(device_id.clone())
            .or_default()
            .insert(frame.producer_id.clone(), frame);
        inner.process_device(&device_id, false);
        Ok(())
    }

    /// Removes a module's frame for one device, pruning the device entry when
    /// the last frame goes away.
    pub fn clear_frame(&self, module_id: &str, device_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let now_empty = match inner.buffers.get_mut(device_id) {
            Some(frames) => {
                frames.remove(module_id);
                frames.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.buffers.remove(device_id);
        }
        Ok(())
    }

    /// Removes a module's frames on every device. Used when the module
    /// unregisters so no further composition involves it.
    pub fn clear_module(&self, module_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.buffers.retain(|_, frames| {
            frames.remove(module_id);
            !frames.is_empty()
        });
        Ok(())
    }

    /// Switches the process-wide default blend mode and reprocesses every
    /// buffered device so visible output reflects the new mode immediately,
    /// bypassing the rate gate.
    pub fn set_blend_mode(&self, mode: BlendMode) -> Result<()> {
        let mut inner = self.lock()?;
        inner.blend_mode = mode;
        inner.events.emit(&CompositorEvent::BlendModeChanged { mode });

        let device_ids: Vec<DeviceId> = inner.buffers.keys().cloned().collect();
        for device_id in device_ids {
            inner.process_device(&device_id, true);
        }
        Ok(())
    }

    pub fn blend_mode(&self) -> Result<BlendMode> {
        Ok(self.lock()?.blend_mode)
    }

    /// Read-only accessor for polling consumers. Returns `None` when fewer
    /// than two frames are buffered (nothing to composite); otherwise the
    /// pixels the next send would carry, including the toggle-mode winner
    /// when the buffered frames are incompatible.
    pub fn composited_frame(&self, device_id: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.lock()?;
        let Some(frames) = inner.buffers.get(device_id) else {
            return Ok(None);
        };
        if frames.len() < 2 {
            return Ok(None);
        }

        let frames: Vec<&LedFrame> = frames.values().collect();
        match check_compatibility(&frames) {
            None => Ok(Some(composite_frames(&frames, inner.blend_mode))),
            Some(_) => Ok(most_recent(&frames).map(|frame| frame.pixels.clone())),
        }
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&CompositorEvent) + Send + 'static,
    ) -> Result<Subscription> {
        Ok(self.lock()?.events.subscribe(callback))
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        self.lock()?.events.unsubscribe(subscription);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CompositorInner>> {
        self.inner
            .lock()
            .map_err(|_| LightdeskError::msg("frame compositor has been poisoned"))
    }
}

impl CompositorInner {
    /// Composites and sends one device's buffered frames. `force` bypasses
    /// the rate gate (blend-mode changes must become visible immediately).
    fn process_device(&mut self, device_id: &str, force: bool) {
        if !force {
            if let Some(last) = self.last_send.get(device_id) {
                if last.elapsed() < self.min_send_interval {
                    // Last-value-wins: the buffer already holds this frame,
                    // the send is simply skipped until the interval elapses.
                    tracing::trace!(device = device_id, "rate limited, dropping send");
                    return;
                }
            }
        }

        let Some(frames) = self.buffers.get(device_id) else {
            return;
        };
        let frames: Vec<&LedFrame> = frames.values().collect();

        let pixels = if frames.len() == 1 {
            frames[0].pixels.clone()
        } else {
            match check_compatibility(&frames) {
                None => composite_frames(&frames, self.blend_mode),
                Some(reason) => {
                    // Toggle mode: show only the most recent frame rather
                    // than refusing output for the device.
                    let modules: Vec<ModuleId> =
                        frames.iter().map(|f| f.producer_id.clone()).collect();
                    tracing::debug!(
                        device = device_id,
                        %reason,
                        "incompatible frames, falling back to toggle mode"
                    );
                    self.events.emit(&CompositorEvent::IncompatibilityDetected {
                        device_id: device_id.to_string(),
                        modules,
                        reason: reason.to_string(),
                    });
                    match most_recent(&frames) {
                        Some(frame) => frame.pixels.clone(),
                        None => return,
                    }
                }
            }
        };

        self.last_send.insert(device_id.to_string(), Instant::now());
        self.events.emit(&CompositorEvent::CompositedFrame {
            device_id: device_id.to_string(),
            pixels,
        });
    }
}

/// Picks the frame with the latest timestamp; ties break towards the larger
/// module id so the choice is deterministic.
fn most_recent<'a>(frames: &[&'a LedFrame]) -> Option<&'a LedFrame> {
    frames
        .iter()
        .max_by_key(|frame| (frame.timestamp_ms, frame.producer_id.clone()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VisualizationMode;
    use std::sync::{Arc, Mutex};

    fn unlimited() -> FrameCompositor {
        FrameCompositor::new(&CompositorConfig {
            max_fps: 0,
            blend_mode: BlendMode::Additive,
        })
    }

    fn frame(module: &str, device: &str, timestamp_ms: u64, pixels: Vec<u8>) -> LedFrame {
        LedFrame {
            producer_id: module.to_string(),
            device_id: device.to_string(),
            timestamp_ms,
            pixels,
            mode: VisualizationMode::GenericColorArray,
        }
    }

    fn collect_events(compositor: &FrameCompositor) -> Arc<Mutex<Vec<CompositorEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        compositor
            .subscribe(move |event| sink.lock().unwrap().push(event.clone()))
            .unwrap();
        seen
    }

    fn sent_frames(events: &[CompositorEvent]) -> Vec<Vec<u8>> {
        events
            .iter()
            .filter_map(|event| match event {
                CompositorEvent::CompositedFrame { pixels, .. } => Some(pixels.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn malformed_frames_never_enter_the_buffer() {
        let compositor = unlimited();
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("synth", "strip", 1, vec![0; 5]))
            .unwrap();
        compositor
            .submit_frame(frame("synth", "strip", 2, Vec::new()))
            .unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(compositor.composited_frame("strip").unwrap(), None);
    }

    #[test]
    fn single_frame_is_sent_unchanged() {
        let compositor = unlimited();
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("synth", "strip", 1, vec![10, 20, 30]))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(sent_frames(&events), vec![vec![10, 20, 30]]);
    }

    #[test]
    fn compatible_frames_blend_with_the_current_mode() {
        let compositor = unlimited();
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("a", "strip", 1, vec![10, 20, 30]))
            .unwrap();
        compositor
            .submit_frame(frame("b", "strip", 2, vec![1, 2, 3]))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            sent_frames(&events),
            vec![vec![10, 20, 30], vec![11, 22, 33]]
        );
    }

    #[test]
    fn rate_limit_drops_the_second_send() {
        let compositor = FrameCompositor::new(&CompositorConfig::default());
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("a", "strip", 1, vec![1, 1, 1]))
            .unwrap();
        compositor
            .submit_frame(frame("a", "strip", 2, vec![2, 2, 2]))
            .unwrap();

        // Both submissions land inside the 33 ms window, so only the first
        // produces a send. The second frame still replaced the buffered one.
        let events = events.lock().unwrap();
        assert_eq!(sent_frames(&events), vec![vec![1, 1, 1]]);
    }

    #[test]
    fn buffered_frame_goes_out_once_the_interval_elapses() {
        let compositor = FrameCompositor::new(&CompositorConfig::default());
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("a", "strip", 1, vec![1, 1, 1]))
            .unwrap();
        compositor
            .submit_frame(frame("a", "strip", 2, vec![2, 2, 2]))
            .unwrap();

        // Past the 33 ms gate the next submission sends again, carrying the
        // latest buffered value rather than the dropped intermediate one.
        std::thread::sleep(Duration::from_millis(50));
        compositor
            .submit_frame(frame("a", "strip", 3, vec![3, 3, 3]))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(sent_frames(&events), vec![vec![1, 1, 1], vec![3, 3, 3]]);
    }

    #[test]
    fn rate_limit_is_per_device() {
        let compositor = FrameCompositor::new(&CompositorConfig::default());
        let events = collect_events(&compositor);

        compositor
            .submit_frame(frame("a", "strip-1", 1, vec![1, 1, 1]))
            .unwrap();
        compositor
            .submit_frame(frame("a", "strip-2", 1, vec![2, 2, 2]))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(sent_frames(&events).len(), 2);
    }

    #[test]
    fn incompatible_frames_toggle_to_the_most_recent() {
        let compositor = unlimited();
        let events = collect_events(&compositor);

        let mut older = frame("a", "grid", 10, vec![1, 1, 1]);
        older.mode = VisualizationMode::StepSequencerGrid;
        let mut newer = frame("b", "grid", 20, vec![9, 9, 9]);
        newer.mode = VisualizationMode::WaveformScroll;

        compositor.submit_frame(older).unwrap();
        compositor.submit_frame(newer).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            sent_frames(&events),
            vec![vec![1, 1, 1], vec![9, 9, 9]]
        );
        assert!(events.iter().any(|event| matches!(
            event,
            CompositorEvent::IncompatibilityDetected { device_id, modules, .. }
                if device_id == "grid" && modules == &["a", "b"]
        )));
    }

    #[test]
    fn set_blend_mode_reprocesses_buffered_devices() {
        let compositor = unlimited();

        compositor
            .submit_frame(frame("a", "strip", 1, vec![100, 100, 100]))
            .unwrap();
        compositor
            .submit_frame(frame("b", "strip", 2, vec![100, 100, 100]))
            .unwrap();

        let events = collect_events(&compositor);
        compositor.set_blend_mode(BlendMode::Multiply).unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(
            events[0],
            CompositorEvent::BlendModeChanged {
                mode: BlendMode::Multiply
            }
        ));
        // 100 * 100 / 255 = 39 per channel.
        assert_eq!(sent_frames(&events), vec![vec![39, 39, 39]]);
    }

    #[test]
    fn composited_frame_is_none_until_two_frames_buffer() {
        let compositor = unlimited();
        assert_eq!(compositor.composited_frame("strip").unwrap(), None);

        compositor
            .submit_frame(frame("a", "strip", 1, vec![1, 2, 3]))
            .unwrap();
        assert_eq!(compositor.composited_frame("strip").unwrap(), None);

        compositor
            .submit_frame(frame("b", "strip", 2, vec![1, 2, 3]))
            .unwrap();
        assert_eq!(
            compositor.composited_frame("strip").unwrap(),
            Some(vec![2, 4, 6])
        );
    }

    #[test]
    fn clear_frame_prunes_empty_device_entries() {
        let compositor = unlimited();

        compositor
            .submit_frame(frame("a", "strip", 1, vec![1, 2, 3]))
            .unwrap();
        compositor
            .submit_frame(frame("b", "strip", 2, vec![4, 5, 6]))
            .unwrap();

        compositor.clear_frame("a", "strip").unwrap();
        assert_eq!(compositor.composited_frame("strip").unwrap(), None);

        compositor.clear_frame("b", "strip").unwrap();
        // Removing the last frame drops the device entry entirely; clearing
        // again is harmless.
        compositor.clear_frame("b", "strip").unwrap();
    }

    #[test]
    fn clear_module_removes_frames_across_devices() {
        let compositor = unlimited();

        compositor
            .submit_frame(frame("a", "strip-1", 1, vec![1, 2, 3]))
            .unwrap();
        compositor
            .submit_frame(frame("a", "strip-2", 1, vec![1, 2, 3]))
            .unwrap();
        compositor
            .submit_frame(frame("b", "strip-1", 2, vec![4, 5, 6]))
            .unwrap();

        compositor.clear_module("a").unwrap();
        assert_eq!(compositor.composited_frame("strip-1").unwrap(), None);
        assert_eq!(compositor.composited_frame("strip-2").unwrap(), None);
    }
}
