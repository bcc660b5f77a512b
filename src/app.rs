use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};

use eframe::egui;
use image::DynamicImage;
use log::{error, warn};

use crate::engine::Engine;
use crate::geometry::{ImageFrame, Pos};
use crate::input::{InputEvent, InputUnifier, PointerPhase, PointerSample};
use crate::render;
use crate::workflow::{ActionReceiver, ActionResult, ActionWorkflow, RelativeRect, WorkflowError};

// ── Modal action workflow ───────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum ActionChoice {
    PartNumber,
    TransitionImage,
    Delete,
}

enum ModalStage {
    SelectAction { choice: Option<ActionChoice> },
    PartNumber { input: String },
    TransitionImage { input: String },
}

struct OpenAction {
    rect: RelativeRect,
    tx: Sender<Result<ActionResult, WorkflowError>>,
    stage: ModalStage,
}

/// The injected action workflow: opens the three-stage modal flow and
/// answers the engine's handshake when the user finishes or cancels. The
/// app holds a clone of the same shared state to draw the modal.
#[derive(Clone)]
pub struct ModalWorkflow {
    open: Rc<RefCell<Option<OpenAction>>>,
    next_id: Rc<Cell<u64>>,
}

impl Default for ModalWorkflow {
    fn default() -> Self {
        Self {
            open: Rc::new(RefCell::new(None)),
            next_id: Rc::new(Cell::new(1)),
        }
    }
}

impl ModalWorkflow {
    /// Stand-in for the id a real registration backend would return.
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl ActionWorkflow for ModalWorkflow {
    fn begin(&mut self, rect: RelativeRect) -> ActionReceiver {
        let (tx, rx) = mpsc::channel();
        *self.open.borrow_mut() = Some(OpenAction {
            rect,
            tx,
            stage: ModalStage::SelectAction { choice: None },
        });
        rx
    }
}

// ── Seed regions ────────────────────────────────────────────────────────────

/// Sidecar file with regions registered elsewhere, in relative coordinates.
#[derive(serde::Deserialize)]
struct RegionFile {
    regions: Vec<RelativeRect>,
}

fn regions_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(format!(
        "{}.regions.json",
        image_path
            .extension()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("")
    ))
}

fn load_seed_regions(image_path: &Path) -> Vec<RelativeRect> {
    let path = regions_path(image_path);
    if path.exists() {
        if let Ok(data) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<RegionFile>(&data) {
                Ok(file) => return file.regions,
                Err(err) => error!("ignoring malformed {}: {err}", path.display()),
            }
        }
    }
    Vec::new()
}

// ── App ─────────────────────────────────────────────────────────────────────

struct Toast {
    message: String,
    until: Instant,
}

pub struct AnnotateApp {
    raw_image: Option<DynamicImage>,
    image_size: (f32, f32),
    texture: Option<egui::TextureHandle>,

    engine: Option<Engine>,
    seed: Vec<RelativeRect>,
    unifier: InputUnifier,
    modal: ModalWorkflow,

    active_touch: Option<egui::TouchId>,
    last_pointer: Pos,
    toast: Option<Toast>,
}

impl AnnotateApp {
    pub fn new(image_path: PathBuf) -> Self {
        let raw_image = image::open(&image_path).ok();
        if raw_image.is_none() {
            error!("could not load image {}", image_path.display());
        }
        let image_size = raw_image
            .as_ref()
            .map(|img| (img.width() as f32, img.height() as f32))
            .unwrap_or((800.0, 600.0));

        Self {
            seed: load_seed_regions(&image_path),
            raw_image,
            image_size,
            texture: None,
            engine: None,
            unifier: InputUnifier::new(),
            modal: ModalWorkflow::default(),
            active_touch: None,
            last_pointer: Pos::new(0.0, 0.0),
            toast: None,
        }
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(ref img) = self.raw_image {
            let rgba = img.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            let pixels = rgba.as_flat_samples();
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
            self.texture =
                Some(ctx.load_texture("image", color_image, egui::TextureOptions::LINEAR));
        }
    }

    /// Create the engine on the first frame and track surface resizes
    /// afterwards.
    fn sync_frame(&mut self, canvas: egui::Rect) {
        let frame = ImageFrame::fit(
            canvas.width(),
            canvas.height(),
            self.image_size.0,
            self.image_size.1,
        );
        match &mut self.engine {
            None => {
                let mut engine = Engine::new(frame, Box::new(self.modal.clone()));
                engine.load_rects(std::mem::take(&mut self.seed));
                self.engine = Some(engine);
            }
            Some(engine) if *engine.frame() != frame => engine.set_frame(frame),
            Some(_) => {}
        }
    }

    fn show_toast(&mut self, message: String, now: Instant) {
        warn!("{message}");
        self.toast = Some(Toast {
            message,
            until: now + Duration::from_secs(4),
        });
    }

    /// Translate this frame's raw device input into the unified pointer
    /// model. Touch is handled from the raw event stream; mouse input is
    /// read off the canvas response, but only when no touch interaction is
    /// in progress (egui mirrors touches as pointer events).
    fn gather_input(
        &mut self,
        ctx: &egui::Context,
        response: &egui::Response,
        origin: egui::Pos2,
        now: Instant,
    ) -> Vec<InputEvent> {
        let mut events = Vec::new();

        let touches: Vec<(egui::TouchId, egui::TouchPhase, egui::Pos2)> = ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|e| match e {
                    egui::Event::Touch { id, phase, pos, .. } => Some((*id, *phase, *pos)),
                    _ => None,
                })
                .collect()
        });
        let saw_touch = !touches.is_empty();

        for (id, phase, pos) in touches {
            // First touch point only; further fingers are ignored.
            let phase = match phase {
                egui::TouchPhase::Start => {
                    if self.active_touch.is_some() {
                        continue;
                    }
                    self.active_touch = Some(id);
                    PointerPhase::Start
                }
                egui::TouchPhase::Move => {
                    if self.active_touch != Some(id) {
                        continue;
                    }
                    PointerPhase::Move
                }
                egui::TouchPhase::End | egui::TouchPhase::Cancel => {
                    if self.active_touch != Some(id) {
                        continue;
                    }
                    self.active_touch = None;
                    PointerPhase::End
                }
            };
            let pos = Pos::new(pos.x - origin.x, pos.y - origin.y);
            self.last_pointer = pos;
            events.extend(
                self.unifier
                    .on_touch(PointerSample { pos, phase }, now),
            );
        }

        if !saw_touch && self.active_touch.is_none() {
            let pointer_pos = response
                .interact_pointer_pos()
                .or_else(|| response.hover_pos())
                .map(|p| Pos::new(p.x - origin.x, p.y - origin.y));
            if let Some(pos) = pointer_pos {
                self.last_pointer = pos;
            }

            if response.drag_started_by(egui::PointerButton::Primary) {
                events.extend(self.unifier.on_mouse(PointerSample {
                    pos: self.last_pointer,
                    phase: PointerPhase::Start,
                }));
            }
            if response.dragged_by(egui::PointerButton::Primary) {
                events.extend(self.unifier.on_mouse(PointerSample {
                    pos: self.last_pointer,
                    phase: PointerPhase::Move,
                }));
            }
            if response.drag_stopped_by(egui::PointerButton::Primary) {
                events.extend(self.unifier.on_mouse(PointerSample {
                    pos: self.last_pointer,
                    phase: PointerPhase::End,
                }));
            }
            if response.secondary_clicked() {
                events.push(self.unifier.on_secondary(self.last_pointer));
            }
        }

        // Pump the long-press timer.
        events.extend(self.unifier.poll(now));
        events
    }

    fn show_action_modal(&mut self, ctx: &egui::Context) {
        let modal = self.modal.clone();
        let mut decision: Option<ActionResult> = None;

        {
            let mut open = modal.open.borrow_mut();
            let Some(action) = open.as_mut() else { return };

            egui::Window::new("Rectangle action")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                .show(ctx, |ui| {
                    let mut next_stage = None;
                    match &mut action.stage {
                        ModalStage::SelectAction { choice } => {
                            match action.rect.id {
                                Some(id) => ui.label(format!("Rectangle #{id}")),
                                None => ui.label("Unregistered rectangle"),
                            };
                            ui.separator();
                            ui.radio_value(
                                choice,
                                Some(ActionChoice::PartNumber),
                                "Register part number",
                            );
                            ui.radio_value(
                                choice,
                                Some(ActionChoice::TransitionImage),
                                "Register transition image",
                            );
                            ui.radio_value(choice, Some(ActionChoice::Delete), "Delete");
                            ui.horizontal(|ui| {
                                if ui.button("Cancel").clicked() {
                                    decision = Some(ActionResult::default());
                                }
                                let next = ui
                                    .add_enabled(choice.is_some(), egui::Button::new("Next"));
                                if next.clicked() {
                                    match choice {
                                        Some(ActionChoice::PartNumber) => {
                                            next_stage = Some(ModalStage::PartNumber {
                                                input: String::new(),
                                            });
                                        }
                                        Some(ActionChoice::TransitionImage) => {
                                            next_stage = Some(ModalStage::TransitionImage {
                                                input: String::new(),
                                            });
                                        }
                                        Some(ActionChoice::Delete) => {
                                            decision = Some(ActionResult::deletion());
                                        }
                                        None => {}
                                    }
                                }
                            });
                        }
                        ModalStage::PartNumber { input } => {
                            ui.label("Part number:");
                            ui.text_edit_singleline(input);
                            ui.horizontal(|ui| {
                                if ui.button("Back").clicked() {
                                    next_stage =
                                        Some(ModalStage::SelectAction { choice: None });
                                }
                                let ready = !input.trim().is_empty();
                                let register =
                                    ui.add_enabled(ready, egui::Button::new("Register"));
                                if register.clicked() {
                                    decision = Some(ActionResult {
                                        id: action.rect.id.is_none().then(|| modal.alloc_id()),
                                        part_number: Some(input.trim().to_string()),
                                        part_number_registered: Some(true),
                                        ..ActionResult::default()
                                    });
                                }
                            });
                        }
                        ModalStage::TransitionImage { input } => {
                            ui.label("Transition image path:");
                            ui.text_edit_singleline(input);
                            ui.horizontal(|ui| {
                                if ui.button("Back").clicked() {
                                    next_stage =
                                        Some(ModalStage::SelectAction { choice: None });
                                }
                                let ready = !input.trim().is_empty();
                                let register =
                                    ui.add_enabled(ready, egui::Button::new("Register"));
                                if register.clicked() {
                                    decision = Some(ActionResult {
                                        id: action.rect.id.is_none().then(|| modal.alloc_id()),
                                        transition_image_path: Some(input.trim().to_string()),
                                        transition_image_registered: Some(true),
                                        ..ActionResult::default()
                                    });
                                }
                            });
                        }
                    }
                    if let Some(stage) = next_stage {
                        action.stage = stage;
                    }
                });
        }

        if let Some(result) = decision {
            if let Some(action) = modal.open.borrow_mut().take() {
                // The engine may have been torn down; nothing to do then.
                let _ = action.tx.send(Ok(result));
            }
        }
    }

    fn show_toast_overlay(&mut self, ctx: &egui::Context, now: Instant) {
        if self.toast.as_ref().is_some_and(|t| now >= t.until) {
            self.toast = None;
        }
        if let Some(toast) = &self.toast {
            egui::Area::new(egui::Id::new("error_toast"))
                .anchor(egui::Align2::CENTER_BOTTOM, [0.0, -24.0])
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        ui.colored_label(render::COLOR_IN_PROGRESS, &toast.message);
                    });
                });
            ctx.request_repaint_after(toast.until.saturating_duration_since(now));
        }
    }
}

impl eframe::App for AnnotateApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ensure_texture(ctx);
        let now = Instant::now();

        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) =
                ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas_rect = response.rect;
            self.sync_frame(canvas_rect);

            painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

            let events = self.gather_input(ctx, &response, canvas_rect.min, now);
            let mut errors = Vec::new();
            if let Some(engine) = self.engine.as_mut() {
                for event in events {
                    if let Err(err) = engine.handle_input(event) {
                        errors.push(err.to_string());
                    }
                }
                if let Some(Err(err)) = engine.poll_action() {
                    errors.push(err.to_string());
                }
            }
            for message in errors {
                self.show_toast(message, now);
            }

            if let Some(engine) = self.engine.as_ref() {
                render::draw_scene(
                    &painter,
                    canvas_rect.min,
                    self.texture.as_ref(),
                    engine.frame(),
                    engine.store(),
                    engine.candidate(),
                );
            }
        });

        self.show_action_modal(ctx);
        self.show_toast_overlay(ctx, now);

        // Wake up in time for the long-press trigger and to keep polling
        // a pending handshake.
        if let Some(deadline) = self.unifier.next_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        }
        if self.engine.as_ref().is_some_and(|e| e.action_pending()) {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}
