//! LED frame rendering
//!
//! The render task runs on its own thread, independent of network calls. Each
//! service tick it reads the latest directive from the [`DirectiveSlot`],
//! computes one frame for the strip and pushes it to a [`PixelSink`]. A new
//! directive generation restarts the animation from its first frame.

use heapless::Vec;

use crate::animator::{Directive, DirectiveSlot, Pattern, Rgb, BLACK};
use crate::clock::Instant;

/// Frame buffer capacity
pub const MAX_LEDS: usize = 500;

/// Lowest brightness of the breath cycle, so the strip never goes fully dark
const BREATH_FLOOR: u8 = 12;

/// Theater-chase and wipe steps per animation cycle
const CHASE_STEPS_PER_CYCLE: u64 = 20;

/// Output for finished frames (the strip driver)
pub trait PixelSink {
    fn write(&mut self, pixels: &[Rgb]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Active {
    directive: Directive,
    generation: u16,
    started_at: Instant,
}

pub struct Renderer<P> {
    sink: P,
    frame: Vec<Rgb, MAX_LEDS>,
    active: Option<Active>,
}

impl<P: PixelSink> Renderer<P> {
    /// `num_leds` is clamped to [`MAX_LEDS`]
    pub fn new(sink: P, num_leds: usize) -> Self {
        let mut frame = Vec::new();
        frame.extend(core::iter::repeat(BLACK).take(num_leds.clamp(1, MAX_LEDS)));
        Self {
            sink,
            frame,
            active: None,
        }
    }

    /// Render and push one frame; does nothing until a directive arrives
    pub fn service(&mut self, slot: &DirectiveSlot, now: Instant) -> anyhow::Result<()> {
        if let Some((directive, generation)) = slot.load() {
            if self.active.map_or(true, |active| active.generation != generation) {
                self.active = Some(Active {
                    directive,
                    generation,
                    started_at: now,
                });
            }
        }
        let Some(active) = self.active else {
            return Ok(());
        };

        render_frame(&mut self.frame, active.directive, now.saturating_sub(active.started_at));
        self.sink.write(&self.frame)
    }
}

/// Fill `frame` with the animation state `elapsed_ms` into the directive
pub fn render_frame(frame: &mut [Rgb], directive: Directive, elapsed_ms: u64) {
    let n = frame.len();
    if n == 0 {
        return;
    }
    let color = directive.color;
    let cycle = u64::from(directive.speed_ms.max(1));

    match directive.pattern {
        Pattern::Static => frame.fill(color),
        Pattern::Breath => {
            let phase = elapsed_ms % cycle;
            let half = (cycle / 2).max(1);
            let ramp = if phase < half { phase } else { cycle - phase };
            let level = (ramp * 255 / half).min(255) as u8;
            frame.fill(color.scale(level.max(BREATH_FLOOR)));
        }
        Pattern::Scan => {
            let steps = (2 * (n as u64 - 1)).max(1);
            let step_ms = (cycle / steps).max(1);
            let index = (elapsed_ms / step_ms) % steps;
            let position = (if index < n as u64 { index } else { steps - index }) as usize;
            frame.fill(BLACK);
            frame[position.min(n - 1)] = color;
        }
        Pattern::ColorWipe => {
            let steps = 2 * n as u64;
            let step_ms = (cycle / n as u64).max(1);
            let index = ((elapsed_ms / step_ms) % steps) as usize;
            for (i, pixel) in frame.iter_mut().enumerate() {
                let lit = if index < n { i <= index } else { i > index - n };
                *pixel = if lit { color } else { BLACK };
            }
        }
        Pattern::TheaterChase => {
            let step_ms = (cycle / CHASE_STEPS_PER_CYCLE).max(1);
            let offset = ((elapsed_ms / step_ms) % 3) as usize;
            for (i, pixel) in frame.iter_mut().enumerate() {
                *pixel = if i % 3 == offset { color } else { BLACK };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animator::{StatusLight, GREEN, RED, WHITE};

    #[derive(Default)]
    struct Frames(std::vec::Vec<std::vec::Vec<Rgb>>);

    impl PixelSink for &mut Frames {
        fn write(&mut self, pixels: &[Rgb]) -> anyhow::Result<()> {
            self.0.push(pixels.to_vec());
            Ok(())
        }
    }

    fn frame(directive: Directive, n: usize, elapsed: u64) -> std::vec::Vec<Rgb> {
        let mut pixels = vec![BLACK; n];
        render_frame(&mut pixels, directive, elapsed);
        pixels
    }

    #[test]
    fn test_static_fills_strip() {
        let pixels = frame(Directive::new(Pattern::Static, GREEN), 4, 12_345);
        assert!(pixels.iter().all(|p| *p == GREEN));
    }

    #[test]
    fn test_breath_peaks_mid_cycle() {
        let directive = Directive::new(Pattern::Breath, WHITE);
        assert_eq!(frame(directive, 2, 1500)[0], WHITE);
        assert_eq!(frame(directive, 2, 0)[0], WHITE.scale(BREATH_FLOOR));
    }

    #[test]
    fn test_theater_chase_marches() {
        let directive = StatusLight::WifiConnected.directive();
        let first = frame(directive, 6, 0);
        assert_eq!(first, vec![GREEN, BLACK, BLACK, GREEN, BLACK, BLACK]);
        let next = frame(directive, 6, 150);
        assert_eq!(next, vec![BLACK, GREEN, BLACK, BLACK, GREEN, BLACK]);
    }

    #[test]
    fn test_scan_bounces() {
        let directive = Directive::with_speed(Pattern::Scan, RED, 600);
        // 4 pixels: 6 steps of 100ms, positions 0 1 2 3 2 1
        let positions: std::vec::Vec<usize> = (0..6)
            .map(|step| {
                frame(directive, 4, step * 100)
                    .iter()
                    .position(|p| *p == RED)
                    .unwrap()
            })
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 2, 1]);
    }

    #[test]
    fn test_color_wipe_fills_then_clears() {
        let directive = Directive::with_speed(Pattern::ColorWipe, RED, 300);
        assert_eq!(frame(directive, 3, 0), vec![RED, BLACK, BLACK]);
        assert_eq!(frame(directive, 3, 200), vec![RED, RED, RED]);
        assert_eq!(frame(directive, 3, 300), vec![BLACK, RED, RED]);
        assert_eq!(frame(directive, 3, 400), vec![BLACK, BLACK, RED]);
    }

    #[test]
    fn test_service_waits_for_directive_and_restarts_on_new_one() {
        let slot = DirectiveSlot::new();
        let mut frames = Frames::default();
        {
            let mut renderer = Renderer::new(&mut frames, 3);
            renderer.service(&slot, 0).unwrap();

            let chase = StatusLight::RefreshToken.directive();
            slot.store(chase);
            renderer.service(&slot, 1_000).unwrap();
            renderer.service(&slot, 1_150).unwrap();
            // re-stored directive starts over at its first frame
            slot.store(chase);
            renderer.service(&slot, 1_300).unwrap();
        }
        assert_eq!(frames.0.len(), 3);
        assert_eq!(frames.0[0], vec![RED, BLACK, BLACK]);
        assert_eq!(frames.0[1], vec![BLACK, RED, BLACK]);
        assert_eq!(frames.0[2], vec![RED, BLACK, BLACK]);
    }
}
