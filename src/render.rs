use eframe::egui;

use crate::geometry::{ImageFrame, Rect};
use crate::store::{PartRect, RectStore};

// Two-state color policy: fully registered regions vs everything else.
pub const COLOR_REGISTERED: egui::Color32 = egui::Color32::from_rgb(0, 168, 72);
pub const COLOR_IN_PROGRESS: egui::Color32 = egui::Color32::from_rgb(224, 49, 49);

const STROKE_WIDTH: f32 = 4.0;
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_MARGIN: f32 = 5.0;

pub fn rect_color(rect: &PartRect) -> egui::Color32 {
    if rect.is_complete() {
        COLOR_REGISTERED
    } else {
        COLOR_IN_PROGRESS
    }
}

/// Surface-local rectangle to screen coordinates.
fn to_screen(origin: egui::Pos2, rect: &Rect) -> egui::Rect {
    egui::Rect::from_min_size(
        origin + egui::vec2(rect.x, rect.y),
        egui::vec2(rect.width, rect.height),
    )
}

/// Redraw everything: the image inside its frame, every committed
/// rectangle, and the in-progress candidate. Pure presentation; all
/// decisions were made before this runs.
pub fn draw_scene(
    painter: &egui::Painter,
    origin: egui::Pos2,
    texture: Option<&egui::TextureHandle>,
    frame: &ImageFrame,
    store: &RectStore,
    candidate: Option<&Rect>,
) {
    if let Some(tex) = texture {
        let frame_rect = Rect::new(frame.x, frame.y, frame.width, frame.height);
        painter.image(
            tex.id(),
            to_screen(origin, &frame_rect),
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    for part in store.iter() {
        draw_part(painter, origin, part);
    }

    if let Some(candidate) = candidate {
        painter.rect_stroke(
            to_screen(origin, candidate),
            0.0,
            egui::Stroke::new(STROKE_WIDTH, COLOR_IN_PROGRESS),
            egui::StrokeKind::Middle,
        );
    }
}

fn draw_part(painter: &egui::Painter, origin: egui::Pos2, part: &PartRect) {
    let color = rect_color(part);
    let screen = to_screen(origin, &part.rect);
    painter.rect_stroke(
        screen,
        0.0,
        egui::Stroke::new(STROKE_WIDTH, color),
        egui::StrokeKind::Middle,
    );
    if let Some(id) = part.id {
        draw_id_label(painter, screen.min, id, color);
    }
}

/// The external id as a white label on a filled badge at the rectangle's
/// top-left corner.
fn draw_id_label(painter: &egui::Painter, corner: egui::Pos2, id: u64, bg: egui::Color32) {
    let galley = painter.layout_no_wrap(
        id.to_string(),
        egui::FontId::proportional(LABEL_FONT_SIZE),
        egui::Color32::WHITE,
    );
    let badge = egui::Rect::from_min_size(
        corner,
        egui::vec2(
            galley.size().x + LABEL_MARGIN * 2.0,
            galley.size().y + LABEL_MARGIN,
        ),
    );
    painter.rect_filled(badge, 0.0, bg);
    painter.galley(
        corner + egui::vec2(LABEL_MARGIN, LABEL_MARGIN * 0.5),
        galley,
        egui::Color32::WHITE,
    );
}
