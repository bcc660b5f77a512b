use std::sync::mpsc::TryRecvError;

use log::{error, info, warn};
use thiserror::Error;

use crate::geometry::{ImageFrame, Pos, Rect};
use crate::input::{InputEvent, PointerPhase, PointerSample};
use crate::store::{RectKey, RectStore};
use crate::workflow::{ActionReceiver, ActionWorkflow, RelativeRect, WorkflowError};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Input-driven rejections. All of them leave the engine idle with the
/// store untouched; none are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("the selection extends outside the image")]
    OutsideImage,
    #[error("the selection overlaps an existing region")]
    Overlaps,
    #[error("another action is already in progress")]
    ActionPending,
}

// ── Drag state ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum DragState {
    Idle,
    Drawing { anchor: Pos, candidate: Rect },
}

struct PendingAction {
    key: RectKey,
    rx: ActionReceiver,
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// The annotation engine: image frame, committed rectangles, the drag in
/// progress, and the one action handshake that may be in flight. All drag
/// and store state lives here; the app layer only feeds unified input
/// events in and draws what the accessors expose.
pub struct Engine {
    frame: ImageFrame,
    store: RectStore,
    drag: DragState,
    pending: Option<PendingAction>,
    workflow: Box<dyn ActionWorkflow>,
}

impl Engine {
    pub fn new(frame: ImageFrame, workflow: Box<dyn ActionWorkflow>) -> Self {
        Self {
            frame,
            store: RectStore::new(),
            drag: DragState::Idle,
            pending: None,
            workflow,
        }
    }

    pub fn frame(&self) -> &ImageFrame {
        &self.frame
    }

    pub fn store(&self) -> &RectStore {
        &self.store
    }

    /// The rectangle being drawn right now, if any.
    pub fn candidate(&self) -> Option<&Rect> {
        match &self.drag {
            DragState::Drawing { candidate, .. } => Some(candidate),
            DragState::Idle => None,
        }
    }

    pub fn action_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Seed rectangles registered in an earlier session, in relative
    /// coordinates as the external collaborator stores them.
    pub fn load_rects(&mut self, rects: Vec<RelativeRect>) {
        self.store.load(rects, &self.frame);
        info!("loaded {} pre-registered rectangles", self.store.len());
    }

    /// Adopt a new frame after a surface resize or image reload. Committed
    /// rectangles keep their absolute coordinates and are not rescaled.
    pub fn set_frame(&mut self, frame: ImageFrame) {
        self.frame = frame;
        let adrift = self
            .store
            .iter()
            .filter(|r| !frame.contains_rect(&r.rect))
            .count();
        if adrift > 0 {
            warn!("{adrift} rectangle(s) now fall outside the resized image frame");
        }
    }

    /// Feed one unified input event through the state machine.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<(), EngineError> {
        match event {
            InputEvent::Drag(PointerSample { pos, phase }) => match phase {
                PointerPhase::Start => {
                    self.begin_drag(pos);
                    Ok(())
                }
                PointerPhase::Move => {
                    self.update_drag(pos);
                    Ok(())
                }
                PointerPhase::End => self.finish_drag(pos).map(|_| ()),
            },
            InputEvent::Select(pos) => self.select_at(pos).map(|_| ()),
        }
    }

    fn begin_drag(&mut self, pos: Pos) {
        self.drag = DragState::Drawing {
            anchor: pos,
            candidate: Rect::from_drag(pos, pos),
        };
    }

    fn update_drag(&mut self, pos: Pos) {
        if let DragState::Drawing { anchor, candidate } = &mut self.drag {
            *candidate = Rect::from_drag(*anchor, pos);
        }
    }

    /// Finalize the drag: validate the candidate and commit it, or discard
    /// it. A zero-sized candidate (a stray click) is dropped silently;
    /// the other rejections are surfaced to the user.
    fn finish_drag(&mut self, pos: Pos) -> Result<Option<RectKey>, EngineError> {
        let DragState::Drawing { anchor, .. } = self.drag else {
            return Ok(None);
        };
        // Whatever happens below, this drag is over.
        self.drag = DragState::Idle;

        let candidate = Rect::from_drag(anchor, pos);
        if candidate.is_zero_sized() {
            return Ok(None);
        }
        if !self.frame.contains_rect(&candidate) {
            return Err(EngineError::OutsideImage);
        }
        if self.store.iter().any(|r| r.rect.overlaps(&candidate)) {
            return Err(EngineError::Overlaps);
        }

        let key = self.store.append(candidate);
        info!(
            "committed rectangle at ({}, {}) {}x{}, {} total",
            candidate.x,
            candidate.y,
            candidate.width,
            candidate.height,
            self.store.len()
        );
        Ok(Some(key))
    }

    /// Selection trigger: hand the rectangle under `pos` to the action
    /// workflow. Returns whether a handshake was started. At most one
    /// handshake runs at a time; further selections are rejected until it
    /// resolves.
    fn select_at(&mut self, pos: Pos) -> Result<bool, EngineError> {
        // A selection mid-draw abandons the candidate.
        if matches!(self.drag, DragState::Drawing { .. }) {
            self.drag = DragState::Idle;
        }
        if self.pending.is_some() {
            warn!("selection ignored: an action handshake is still pending");
            return Err(EngineError::ActionPending);
        }
        let Some(target) = self.store.find_at(pos) else {
            return Ok(false);
        };

        let key = target.key;
        let rel = target.to_relative(&self.frame);
        if let Ok(payload) = serde_json::to_string(&rel) {
            info!("handing rectangle to the action workflow: {payload}");
        }
        let rx = self.workflow.begin(rel);
        self.pending = Some(PendingAction { key, rx });
        Ok(true)
    }

    /// Poll the in-flight handshake. `Some(Ok(()))` means a result was
    /// applied and a redraw is due; `Some(Err(_))` means the workflow
    /// failed and the store was left untouched.
    pub fn poll_action(&mut self) -> Option<Result<(), WorkflowError>> {
        let pending = self.pending.as_ref()?;
        let key = pending.key;
        let outcome = match pending.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(WorkflowError::Abandoned),
        };
        self.pending = None;

        match outcome {
            Ok(result) => {
                self.store.apply_result(key, &result);
                if result.deleted {
                    info!("rectangle deleted, {} remain", self.store.len());
                } else {
                    info!("rectangle updated, {} total", self.store.len());
                }
                Some(Ok(()))
            }
            Err(err) => {
                error!("action workflow failed: {err}");
                Some(Err(err))
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Sender};

    use super::*;
    use crate::workflow::ActionResult;

    type ResultSender = Sender<Result<ActionResult, WorkflowError>>;

    /// Records every handed-off rectangle and keeps the sender side of each
    /// handshake so tests can answer (or abandon) at will.
    #[derive(Clone, Default)]
    struct TestWorkflow {
        senders: Rc<RefCell<Vec<ResultSender>>>,
        seen: Rc<RefCell<Vec<RelativeRect>>>,
    }

    impl ActionWorkflow for TestWorkflow {
        fn begin(&mut self, rect: RelativeRect) -> ActionReceiver {
            let (tx, rx) = mpsc::channel();
            self.seen.borrow_mut().push(rect);
            self.senders.borrow_mut().push(tx);
            rx
        }
    }

    fn engine() -> (Engine, TestWorkflow) {
        let workflow = TestWorkflow::default();
        let frame = ImageFrame {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        };
        (Engine::new(frame, Box::new(workflow.clone())), workflow)
    }

    fn drag(engine: &mut Engine, from: (f32, f32), to: (f32, f32)) -> Result<(), EngineError> {
        engine.handle_input(InputEvent::Drag(PointerSample {
            pos: Pos::new(from.0, from.1),
            phase: PointerPhase::Start,
        }))?;
        engine.handle_input(InputEvent::Drag(PointerSample {
            pos: Pos::new(to.0, to.1),
            phase: PointerPhase::Move,
        }))?;
        engine.handle_input(InputEvent::Drag(PointerSample {
            pos: Pos::new(to.0, to.1),
            phase: PointerPhase::End,
        }))
    }

    fn select(engine: &mut Engine, x: f32, y: f32) -> Result<(), EngineError> {
        engine.handle_input(InputEvent::Select(Pos::new(x, y)))
    }

    fn assert_store_invariants(engine: &Engine) {
        let rects: Vec<_> = engine.store().iter().collect();
        for r in &rects {
            assert!(engine.frame().contains_rect(&r.rect));
        }
        for (i, a) in rects.iter().enumerate() {
            for b in rects.iter().skip(i + 1) {
                assert!(!a.rect.overlaps(&b.rect));
            }
        }
    }

    #[test]
    fn drag_commits_the_spanned_rectangle() {
        let (mut engine, _) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        assert_eq!(engine.store().len(), 1);
        let committed = engine.store().iter().next().unwrap();
        assert_eq!(committed.rect, Rect::new(10.0, 10.0, 40.0, 40.0));
        assert_eq!(committed.id, None);
        assert!(engine.candidate().is_none());
        assert_store_invariants(&engine);
    }

    #[test]
    fn overlapping_drag_is_rejected_and_store_unchanged() {
        let (mut engine, _) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        let err = drag(&mut engine, (30.0, 30.0), (60.0, 60.0)).unwrap_err();
        assert_eq!(err, EngineError::Overlaps);
        assert_eq!(engine.store().len(), 1);
        assert!(engine.candidate().is_none());
        assert_store_invariants(&engine);
    }

    #[test]
    fn zero_sized_drag_is_discarded_silently() {
        let (mut engine, _) = engine();
        drag(&mut engine, (5.0, 5.0), (5.0, 5.0)).unwrap();
        assert!(engine.store().is_empty());
        assert!(engine.candidate().is_none());
    }

    #[test]
    fn drag_outside_the_frame_is_rejected() {
        let (mut engine, _) = engine();
        engine.set_frame(ImageFrame {
            x: 10.0,
            y: 10.0,
            width: 80.0,
            height: 80.0,
        });
        let err = drag(&mut engine, (0.0, 0.0), (20.0, 20.0)).unwrap_err();
        assert_eq!(err, EngineError::OutsideImage);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn move_and_end_are_ignored_while_idle() {
        let (mut engine, _) = engine();
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(30.0, 30.0),
                phase: PointerPhase::Move,
            }))
            .unwrap();
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(60.0, 60.0),
                phase: PointerPhase::End,
            }))
            .unwrap();
        assert!(engine.store().is_empty());
    }

    #[test]
    fn candidate_tracks_the_drag() {
        let (mut engine, _) = engine();
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(40.0, 40.0),
                phase: PointerPhase::Start,
            }))
            .unwrap();
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(20.0, 70.0),
                phase: PointerPhase::Move,
            }))
            .unwrap();
        assert_eq!(engine.candidate(), Some(&Rect::new(20.0, 40.0, 20.0, 30.0)));
    }

    #[test]
    fn selection_hands_over_relative_coordinates() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 20.0), (60.0, 70.0)).unwrap();
        select(&mut engine, 30.0, 30.0).unwrap();

        assert!(engine.action_pending());
        let seen = workflow.seen.borrow();
        assert_eq!(seen.len(), 1);
        let rel = &seen[0];
        assert_eq!(rel.x, 0.1);
        assert_eq!(rel.y, 0.2);
        assert_eq!(rel.width, 0.5);
        assert_eq!(rel.height, 0.5);
        assert!(!rel.deleted);
    }

    #[test]
    fn selection_over_empty_space_starts_nothing() {
        let (mut engine, workflow) = engine();
        select(&mut engine, 50.0, 50.0).unwrap();
        assert!(!engine.action_pending());
        assert!(workflow.seen.borrow().is_empty());
    }

    #[test]
    fn applied_result_updates_the_target() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        let result = ActionResult {
            id: Some(999),
            part_number: Some("P-12".into()),
            part_number_registered: Some(true),
            ..ActionResult::default()
        };
        workflow.senders.borrow()[0].send(Ok(result)).unwrap();

        assert!(matches!(engine.poll_action(), Some(Ok(()))));
        assert!(!engine.action_pending());
        let rect = engine.store().iter().next().unwrap();
        assert_eq!(rect.id, Some(999));
        assert!(rect.part_number_registered);
        assert!(!rect.transition_image_registered);
        assert_store_invariants(&engine);
    }

    #[test]
    fn deletion_result_removes_only_the_target() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (40.0, 40.0)).unwrap();
        drag(&mut engine, (60.0, 60.0), (90.0, 90.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        workflow.senders.borrow()[0]
            .send(Ok(ActionResult::deletion()))
            .unwrap();
        assert!(matches!(engine.poll_action(), Some(Ok(()))));
        assert_eq!(engine.store().len(), 1);
        let survivor = engine.store().iter().next().unwrap();
        assert_eq!(survivor.rect, Rect::new(60.0, 60.0, 30.0, 30.0));
    }

    #[test]
    fn second_selection_while_pending_is_rejected() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (40.0, 40.0)).unwrap();
        drag(&mut engine, (60.0, 60.0), (90.0, 90.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        let err = select(&mut engine, 70.0, 70.0).unwrap_err();
        assert_eq!(err, EngineError::ActionPending);
        assert_eq!(workflow.seen.borrow().len(), 1);

        // Once the first handshake resolves, selection works again.
        workflow.senders.borrow()[0]
            .send(Ok(ActionResult::default()))
            .unwrap();
        assert!(matches!(engine.poll_action(), Some(Ok(()))));
        select(&mut engine, 70.0, 70.0).unwrap();
        assert_eq!(workflow.seen.borrow().len(), 2);
    }

    #[test]
    fn failed_handshake_leaves_the_store_untouched() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        workflow.senders.borrow()[0]
            .send(Err(WorkflowError::Failed("registration api down".into())))
            .unwrap();
        assert!(matches!(engine.poll_action(), Some(Err(_))));
        assert!(!engine.action_pending());
        let rect = engine.store().iter().next().unwrap();
        assert_eq!(rect.id, None);
        assert!(!rect.part_number_registered);
    }

    #[test]
    fn dropped_workflow_counts_as_abandoned() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        workflow.senders.borrow_mut().clear();
        assert!(matches!(
            engine.poll_action(),
            Some(Err(WorkflowError::Abandoned))
        ));
        assert!(!engine.action_pending());
        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn selection_mid_draw_abandons_the_candidate() {
        let (mut engine, _) = engine();
        drag(&mut engine, (10.0, 10.0), (40.0, 40.0)).unwrap();
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(60.0, 60.0),
                phase: PointerPhase::Start,
            }))
            .unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();
        assert!(engine.candidate().is_none());
        // The following End no longer belongs to a drag.
        engine
            .handle_input(InputEvent::Drag(PointerSample {
                pos: Pos::new(90.0, 90.0),
                phase: PointerPhase::End,
            }))
            .unwrap();
        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn long_press_over_a_rect_selects_it_and_suppresses_finalize() {
        use std::time::Instant;

        use crate::input::{InputUnifier, LONG_PRESS};

        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();

        let mut unifier = InputUnifier::new();
        let t0 = Instant::now();
        let held = PointerSample {
            pos: Pos::new(20.0, 20.0),
            phase: PointerPhase::Start,
        };
        if let Some(ev) = unifier.on_touch(held, t0) {
            engine.handle_input(ev).unwrap();
        }
        if let Some(ev) = unifier.poll(t0 + LONG_PRESS) {
            engine.handle_input(ev).unwrap();
        }
        let lifted = PointerSample {
            pos: Pos::new(20.0, 20.0),
            phase: PointerPhase::End,
        };
        if let Some(ev) = unifier.on_touch(lifted, t0 + LONG_PRESS) {
            engine.handle_input(ev).unwrap();
        }

        // The held touch became a selection, not a second commit.
        assert!(engine.action_pending());
        assert_eq!(engine.store().len(), 1);
        assert!(engine.candidate().is_none());
        let seen = workflow.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].x, 0.1);
        assert_eq!(seen[0].y, 0.1);
    }

    #[test]
    fn resize_keeps_absolute_coordinates() {
        let (mut engine, _) = engine();
        drag(&mut engine, (10.0, 10.0), (50.0, 50.0)).unwrap();
        engine.set_frame(ImageFrame {
            x: 0.0,
            y: 0.0,
            width: 40.0,
            height: 40.0,
        });
        // Known limitation: the rectangle is not rescaled to the new frame.
        let rect = engine.store().iter().next().unwrap();
        assert_eq!(rect.rect, Rect::new(10.0, 10.0, 40.0, 40.0));
    }

    #[test]
    fn drags_are_still_accepted_while_a_handshake_is_pending() {
        let (mut engine, workflow) = engine();
        drag(&mut engine, (10.0, 10.0), (40.0, 40.0)).unwrap();
        select(&mut engine, 20.0, 20.0).unwrap();

        drag(&mut engine, (60.0, 60.0), (90.0, 90.0)).unwrap();
        assert_eq!(engine.store().len(), 2);

        workflow.senders.borrow()[0]
            .send(Ok(ActionResult::default()))
            .unwrap();
        assert!(matches!(engine.poll_action(), Some(Ok(()))));
        assert_store_invariants(&engine);
    }
}
