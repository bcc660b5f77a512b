use serde::{Deserialize, Serialize};

// ── Primitives ──────────────────────────────────────────────────────────────

/// A point in surface-absolute coordinates (canvas pixels).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pos {
    pub x: f32,
    pub y: f32,
}

impl Pos {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle. Surface-absolute while committed; the same
/// shape doubles as the frame-relative form at the workflow boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by a drag anchor and the current cursor position.
    /// Origin is the componentwise minimum, size the absolute difference.
    pub fn from_drag(anchor: Pos, cur: Pos) -> Self {
        Self {
            x: anchor.x.min(cur.x),
            y: anchor.y.min(cur.y),
            width: (cur.x - anchor.x).abs(),
            height: (cur.y - anchor.y).abs(),
        }
    }

    pub fn is_zero_sized(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    /// Inclusive point containment, used for selection hit-testing.
    pub fn contains_pos(&self, pos: Pos) -> bool {
        pos.x >= self.x
            && pos.x <= self.x + self.width
            && pos.y >= self.y
            && pos.y <= self.y + self.height
    }

    /// True unless `other` lies strictly outside `self` on at least one
    /// axis. Rectangles that merely share an edge still count as
    /// overlapping under this predicate.
    pub fn overlaps(&self, other: &Rect) -> bool {
        !(other.x > self.x + self.width
            || other.x + other.width < self.x
            || other.y > self.y + self.height
            || other.y + other.height < self.y)
    }
}

// ── Image frame ─────────────────────────────────────────────────────────────

/// Placement of the reference image within the drawing surface: scaled to
/// fit, aspect preserved, centered. Invariant: width > 0 and height > 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageFrame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ImageFrame {
    /// Compute the frame for an image of intrinsic size `image_w`×`image_h`
    /// displayed on a surface of `surface_w`×`surface_h`. All inputs must be
    /// positive.
    pub fn fit(surface_w: f32, surface_h: f32, image_w: f32, image_h: f32) -> Self {
        let ratio = (surface_w / image_w).min(surface_h / image_h);
        let width = (image_w * ratio).round();
        let height = (image_h * ratio).round();
        Self {
            x: ((surface_w - width) / 2.0).round(),
            y: ((surface_h - height) / 2.0).round(),
            width,
            height,
        }
    }

    /// All four edges of `rect` inside the frame, inclusive.
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        rect.x >= self.x
            && rect.x + rect.width <= self.x + self.width
            && rect.y >= self.y
            && rect.y + rect.height <= self.y + self.height
    }

    /// Express a surface-absolute rectangle as fractions of the frame.
    pub fn to_relative(&self, rect: &Rect) -> Rect {
        Rect {
            x: (rect.x - self.x) / self.width,
            y: (rect.y - self.y) / self.height,
            width: rect.width / self.width,
            height: rect.height / self.height,
        }
    }

    /// Inverse of [`to_relative`](Self::to_relative).
    pub fn to_absolute(&self, rect: &Rect) -> Rect {
        Rect {
            x: self.x + rect.x * self.width,
            y: self.y + rect.y * self.height,
            width: rect.width * self.width,
            height: rect.height * self.height,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
