//! Presence to LED animation mapping
//!
//! Every activity the presence service documents maps to one
//! (pattern, color, speed) [`Directive`]; values the service adds later fall
//! back to a fixed "unknown" directive. Session milestones (connecting,
//! device login, token refresh) have their own status directives.
//!
//! Directives reach the render task through a [`DirectiveSlot`]: a single
//! atomic word the state machine overwrites and the render loop reads, so a
//! directive is never observed half-written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::presence::Activity;

/// Default animation cycle length
pub const DEFAULT_SPEED_MS: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_u32(rgb: u32) -> Self {
        Self::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }

    pub const fn to_u32(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Dim by `level` / 255
    pub fn scale(self, level: u8) -> Self {
        let dim = |c: u8| ((u16::from(c) * u16::from(level)) / 255) as u8;
        Self::new(dim(self.r), dim(self.g), dim(self.b))
    }
}

pub const BLACK: Rgb = Rgb::from_u32(0x000000);
pub const WHITE: Rgb = Rgb::from_u32(0xFFFFFF);
pub const RED: Rgb = Rgb::from_u32(0xFF0000);
pub const GREEN: Rgb = Rgb::from_u32(0x00FF00);
pub const BLUE: Rgb = Rgb::from_u32(0x0000FF);
pub const YELLOW: Rgb = Rgb::from_u32(0xFFFF00);
pub const ORANGE: Rgb = Rgb::from_u32(0xFF3000);
pub const PURPLE: Rgb = Rgb::from_u32(0x400080);
pub const PINK: Rgb = Rgb::from_u32(0xFF1493);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pattern {
    Static = 0,
    /// Whole strip fades in and out
    Breath = 1,
    /// A single pixel sweeps back and forth
    Scan = 2,
    /// Strip fills pixel by pixel, then clears
    ColorWipe = 3,
    /// Every third pixel lit, marching
    TheaterChase = 4,
}

impl Pattern {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Static),
            1 => Some(Self::Breath),
            2 => Some(Self::Scan),
            3 => Some(Self::ColorWipe),
            4 => Some(Self::TheaterChase),
            _ => None,
        }
    }
}

/// What the strip should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub pattern: Pattern,
    pub color: Rgb,
    pub speed_ms: u16,
}

impl Directive {
    pub const fn new(pattern: Pattern, color: Rgb) -> Self {
        Self::with_speed(pattern, color, DEFAULT_SPEED_MS)
    }

    pub const fn with_speed(pattern: Pattern, color: Rgb, speed_ms: u16) -> Self {
        Self {
            pattern,
            color,
            speed_ms,
        }
    }
}

/// Shown for activity values this firmware does not know
pub const UNKNOWN_DIRECTIVE: Directive = Directive::new(Pattern::Static, WHITE);

/// Directive for an activity
pub fn directive_for(activity: Activity) -> Directive {
    match activity {
        Activity::Available => Directive::new(Pattern::Static, GREEN),
        Activity::Away => Directive::new(Pattern::Static, YELLOW),
        Activity::BeRightBack => Directive::new(Pattern::Static, ORANGE),
        Activity::Busy => Directive::new(Pattern::Static, PURPLE),
        Activity::DoNotDisturb | Activity::UrgentInterruptionsOnly => Directive::new(Pattern::Static, PINK),
        Activity::InACall => Directive::new(Pattern::Breath, RED),
        Activity::InAConferenceCall => Directive::with_speed(Pattern::Breath, RED, 9000),
        Activity::Inactive => Directive::new(Pattern::Breath, WHITE),
        Activity::InAMeeting => Directive::new(Pattern::Scan, RED),
        Activity::Offline | Activity::OffWork | Activity::OutOfOffice | Activity::PresenceUnknown => {
            Directive::new(Pattern::Static, BLACK)
        }
        Activity::Presenting => Directive::new(Pattern::ColorWipe, RED),
        Activity::Unrecognized => UNKNOWN_DIRECTIVE,
    }
}

/// Session milestones with their own look
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLight {
    Boot,
    WifiConnecting,
    WifiConnected,
    DeviceLogin,
    RefreshToken,
}

impl StatusLight {
    pub fn directive(self) -> Directive {
        match self {
            StatusLight::Boot => Directive::new(Pattern::Static, WHITE),
            StatusLight::WifiConnecting => Directive::new(Pattern::TheaterChase, BLUE),
            StatusLight::WifiConnected => Directive::new(Pattern::TheaterChase, GREEN),
            StatusLight::DeviceLogin => Directive::new(Pattern::TheaterChase, PURPLE),
            StatusLight::RefreshToken => Directive::new(Pattern::TheaterChase, RED),
        }
    }
}

/// Receiver of animation directives (the render task's input)
pub trait AnimationSink {
    fn show(&mut self, directive: Directive);
}

/// Forwards directives to a sink, skipping repeats so a running animation is
/// not restarted by an unchanged presence
pub struct PresenceAnimator<A> {
    sink: A,
    current: Option<Directive>,
}

impl<A: AnimationSink> PresenceAnimator<A> {
    pub fn new(sink: A) -> Self {
        Self { sink, current: None }
    }

    pub fn apply(&mut self, activity: Activity) -> Directive {
        let directive = directive_for(activity);
        debug!("Activity {:?} -> {:?}", activity, directive);
        self.show(directive);
        directive
    }

    pub fn show_status(&mut self, status: StatusLight) {
        self.show(status.directive());
    }

    fn show(&mut self, directive: Directive) {
        if self.current != Some(directive) {
            self.sink.show(directive);
            self.current = Some(directive);
        }
    }
}

const PRESENT_BIT: u64 = 1 << 63;
const GENERATION_MASK: u64 = 0x7FFF;

/// Latest directive, replaced atomically
///
/// Layout: bit 63 set once written, bits 48..63 generation, 32..48 speed,
/// 24..32 pattern, 0..24 color. The generation changes on every store so the
/// reader can restart an animation even when the value repeats.
#[derive(Debug, Default)]
pub struct DirectiveSlot {
    packed: AtomicU64,
}

impl DirectiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single writer: the state machine
    pub fn store(&self, directive: Directive) {
        let previous = self.packed.load(Ordering::Acquire);
        let generation = ((previous >> 48) + 1) & GENERATION_MASK;
        let packed = PRESENT_BIT
            | generation << 48
            | u64::from(directive.speed_ms) << 32
            | u64::from(directive.pattern as u8) << 24
            | u64::from(directive.color.to_u32() & 0xFF_FFFF);
        self.packed.store(packed, Ordering::Release);
    }

    /// Directive and its generation, if one was ever stored
    pub fn load(&self) -> Option<(Directive, u16)> {
        let packed = self.packed.load(Ordering::Acquire);
        if packed & PRESENT_BIT == 0 {
            return None;
        }
        let pattern = Pattern::from_u8((packed >> 24) as u8)?;
        let directive = Directive::with_speed(
            pattern,
            Rgb::from_u32(packed as u32 & 0xFF_FFFF),
            (packed >> 32) as u16,
        );
        Some((directive, ((packed >> 48) & GENERATION_MASK) as u16))
    }
}

impl AnimationSink for Arc<DirectiveSlot> {
    fn show(&mut self, directive: Directive) {
        self.store(directive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    const ALL_ACTIVITIES: [Activity; 16] = [
        Activity::Available,
        Activity::Away,
        Activity::BeRightBack,
        Activity::Busy,
        Activity::DoNotDisturb,
        Activity::UrgentInterruptionsOnly,
        Activity::InACall,
        Activity::InAConferenceCall,
        Activity::Inactive,
        Activity::InAMeeting,
        Activity::Offline,
        Activity::OffWork,
        Activity::OutOfOffice,
        Activity::PresenceUnknown,
        Activity::Presenting,
        Activity::Unrecognized,
    ];

    #[test]
    fn test_busy_is_static_purple() {
        let sink = RecordingSink::default();
        let mut animator = PresenceAnimator::new(sink.clone());

        let first = animator.apply(Activity::Busy);
        let second = animator.apply(Activity::Busy);
        assert_eq!(first, Directive::new(Pattern::Static, PURPLE));
        assert_eq!(first, second);
        // repeat is not forwarded again
        assert_eq!(sink.shown(), vec![first]);
    }

    #[test]
    fn test_mapping_details() {
        assert_eq!(directive_for(Activity::InAConferenceCall).speed_ms, 9000);
        assert_eq!(directive_for(Activity::InAMeeting).pattern, Pattern::Scan);
        assert_eq!(directive_for(Activity::Presenting).pattern, Pattern::ColorWipe);
        assert_eq!(
            directive_for(Activity::UrgentInterruptionsOnly),
            directive_for(Activity::DoNotDisturb)
        );
        assert_eq!(directive_for(Activity::OutOfOffice).color, BLACK);
        assert_eq!(directive_for(Activity::Unrecognized), UNKNOWN_DIRECTIVE);
    }

    #[test]
    fn test_slot_preserves_every_directive() {
        let slot = DirectiveSlot::new();
        assert!(slot.load().is_none());
        for activity in ALL_ACTIVITIES {
            let directive = directive_for(activity);
            slot.store(directive);
            assert_eq!(slot.load().map(|(d, _)| d), Some(directive));
        }
    }

    #[test]
    fn test_slot_generation_advances() {
        let slot = DirectiveSlot::new();
        let directive = StatusLight::WifiConnected.directive();
        slot.store(directive);
        let (_, first) = slot.load().unwrap();
        slot.store(directive);
        let (_, second) = slot.load().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rgb_scale() {
        assert_eq!(WHITE.scale(255), WHITE);
        assert_eq!(WHITE.scale(0), BLACK);
        assert_eq!(Rgb::new(200, 100, 0).scale(128), Rgb::new(100, 50, 0));
    }
}
