use std::time::{Duration, Instant};

use crate::geometry::Pos;

/// How long a touch must stay put to count as a selection instead of a drag.
pub const LONG_PRESS: Duration = Duration::from_millis(500);

// ── Unified pointer model ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Start,
    Move,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerSample {
    pub pos: Pos,
    pub phase: PointerPhase,
}

/// What the engine consumes: drag phases plus a device-independent
/// selection trigger (right click on a mouse, long-press on touch).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    Drag(PointerSample),
    Select(Pos),
}

// ── Unifier ─────────────────────────────────────────────────────────────────

struct ArmedPress {
    deadline: Instant,
    pos: Pos,
}

/// Folds mouse and touch input into the unified model. Mouse samples pass
/// straight through; touch samples additionally run the long-press
/// disambiguation: a touch held in place for [`LONG_PRESS`] becomes a
/// selection and swallows its own `End`, anything that moves first stays a
/// drag. Time comes in as a parameter so tests control the clock.
#[derive(Default)]
pub struct InputUnifier {
    armed: Option<ArmedPress>,
    fired: bool,
}

impl InputUnifier {
    pub fn new() -> Self {
        Self {
            armed: None,
            fired: false,
        }
    }

    /// Primary-button mouse phases need no disambiguation.
    pub fn on_mouse(&mut self, sample: PointerSample) -> Option<InputEvent> {
        Some(InputEvent::Drag(sample))
    }

    /// Secondary-button gesture: a selection trigger, independent of any
    /// drag cycle.
    pub fn on_secondary(&mut self, pos: Pos) -> InputEvent {
        InputEvent::Select(pos)
    }

    pub fn on_touch(&mut self, sample: PointerSample, now: Instant) -> Option<InputEvent> {
        match sample.phase {
            PointerPhase::Start => {
                self.fired = false;
                self.armed = Some(ArmedPress {
                    deadline: now + LONG_PRESS,
                    pos: sample.pos,
                });
                Some(InputEvent::Drag(sample))
            }
            PointerPhase::Move => {
                // Movement means drag; a stale timer must not fire later.
                self.armed = None;
                Some(InputEvent::Drag(sample))
            }
            PointerPhase::End => {
                self.armed = None;
                if std::mem::take(&mut self.fired) {
                    // The long-press already consumed this cycle.
                    None
                } else {
                    Some(InputEvent::Drag(sample))
                }
            }
        }
    }

    /// Pump the long-press timer. Emits at most one selection per touch
    /// cycle, at the position the touch started.
    pub fn poll(&mut self, now: Instant) -> Option<InputEvent> {
        match &self.armed {
            Some(armed) if now >= armed.deadline => {
                let pos = armed.pos;
                self.armed = None;
                self.fired = true;
                Some(InputEvent::Select(pos))
            }
            _ => None,
        }
    }

    /// When the armed timer will fire, if one is armed. Lets the render
    /// loop schedule a wakeup instead of spinning.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|a| a.deadline)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, y: f32, phase: PointerPhase) -> PointerSample {
        PointerSample {
            pos: Pos::new(x, y),
            phase,
        }
    }

    #[test]
    fn mouse_phases_pass_through() {
        let mut unifier = InputUnifier::new();
        let s = sample(5.0, 5.0, PointerPhase::Start);
        assert_eq!(unifier.on_mouse(s), Some(InputEvent::Drag(s)));
        assert_eq!(
            unifier.on_secondary(Pos::new(1.0, 2.0)),
            InputEvent::Select(Pos::new(1.0, 2.0))
        );
    }

    #[test]
    fn held_touch_becomes_a_selection_and_swallows_end() {
        let mut unifier = InputUnifier::new();
        let t0 = Instant::now();
        unifier.on_touch(sample(20.0, 20.0, PointerPhase::Start), t0);

        // Not yet due.
        assert_eq!(unifier.poll(t0 + Duration::from_millis(499)), None);
        // Due: selection at the armed position.
        assert_eq!(
            unifier.poll(t0 + LONG_PRESS),
            Some(InputEvent::Select(Pos::new(20.0, 20.0)))
        );
        // Only once.
        assert_eq!(unifier.poll(t0 + Duration::from_secs(2)), None);
        // The End of this cycle must not finalize a drag.
        assert_eq!(
            unifier.on_touch(sample(20.0, 20.0, PointerPhase::End), t0 + Duration::from_secs(2)),
            None
        );
    }

    #[test]
    fn movement_cancels_the_long_press() {
        let mut unifier = InputUnifier::new();
        let t0 = Instant::now();
        unifier.on_touch(sample(20.0, 20.0, PointerPhase::Start), t0);
        let moved = unifier.on_touch(
            sample(25.0, 20.0, PointerPhase::Move),
            t0 + Duration::from_millis(100),
        );
        assert_eq!(
            moved,
            Some(InputEvent::Drag(sample(25.0, 20.0, PointerPhase::Move)))
        );
        // Even well past the deadline, nothing fires.
        assert_eq!(unifier.poll(t0 + Duration::from_secs(1)), None);
        // And the End finalizes the drag normally.
        assert_eq!(
            unifier.on_touch(sample(30.0, 20.0, PointerPhase::End), t0 + Duration::from_secs(1)),
            Some(InputEvent::Drag(sample(30.0, 20.0, PointerPhase::End)))
        );
    }

    #[test]
    fn quick_tap_finalizes_a_drag() {
        let mut unifier = InputUnifier::new();
        let t0 = Instant::now();
        unifier.on_touch(sample(20.0, 20.0, PointerPhase::Start), t0);
        let end = unifier.on_touch(
            sample(20.0, 20.0, PointerPhase::End),
            t0 + Duration::from_millis(80),
        );
        assert_eq!(
            end,
            Some(InputEvent::Drag(sample(20.0, 20.0, PointerPhase::End)))
        );
        // The released timer must not fire afterwards.
        assert_eq!(unifier.poll(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn a_new_touch_rearms_after_a_fired_press() {
        let mut unifier = InputUnifier::new();
        let t0 = Instant::now();
        unifier.on_touch(sample(10.0, 10.0, PointerPhase::Start), t0);
        assert!(unifier.poll(t0 + LONG_PRESS).is_some());
        unifier.on_touch(sample(10.0, 10.0, PointerPhase::End), t0 + LONG_PRESS);

        let t1 = t0 + Duration::from_secs(5);
        unifier.on_touch(sample(40.0, 40.0, PointerPhase::Start), t1);
        assert_eq!(unifier.next_deadline(), Some(t1 + LONG_PRESS));
        assert_eq!(
            unifier.poll(t1 + LONG_PRESS),
            Some(InputEvent::Select(Pos::new(40.0, 40.0)))
        );
    }
}
