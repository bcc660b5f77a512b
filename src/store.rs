use crate::geometry::{ImageFrame, Pos, Rect};
use crate::workflow::{ActionResult, RelativeRect};

// ── Committed rectangles ────────────────────────────────────────────────────

/// Engine-local identity for a committed rectangle. Assigned at insertion
/// and never reused, so update/delete paths can name their target without
/// relying on reference equality. Distinct from the external registration
/// `id`, which only exists once a workflow has assigned one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RectKey(u64);

/// A committed part region in surface-absolute coordinates.
#[derive(Clone, Debug)]
pub struct PartRect {
    pub key: RectKey,
    pub id: Option<u64>,
    pub rect: Rect,
    pub part_number: Option<String>,
    pub transition_image_path: Option<String>,
    pub part_number_registered: bool,
    pub transition_image_registered: bool,
}

impl PartRect {
    /// Both registrations done; drives the two-state color policy.
    pub fn is_complete(&self) -> bool {
        self.part_number_registered && self.transition_image_registered
    }

    /// Wire form handed to the action workflow.
    pub fn to_relative(&self, frame: &ImageFrame) -> RelativeRect {
        let rel = frame.to_relative(&self.rect);
        RelativeRect {
            x: rel.x,
            y: rel.y,
            width: rel.width,
            height: rel.height,
            id: self.id,
            part_number: self.part_number.clone(),
            transition_image_path: self.transition_image_path.clone(),
            part_number_registered: self.part_number_registered,
            transition_image_registered: self.transition_image_registered,
            deleted: false,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────────────

/// Ordered collection of committed rectangles. Insertion order is z-order:
/// later entries draw on top. Entries enter only through `append`/`load` and
/// leave only through a deleting `apply_result`.
#[derive(Default)]
pub struct RectStore {
    rects: Vec<PartRect>,
    next_key: u64,
}

impl RectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartRect> {
        self.rects.iter()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn get(&self, key: RectKey) -> Option<&PartRect> {
        self.rects.iter().find(|r| r.key == key)
    }

    /// Insert a freshly committed rectangle: no external id, nothing
    /// registered yet.
    pub fn append(&mut self, rect: Rect) -> RectKey {
        let key = self.fresh_key();
        self.rects.push(PartRect {
            key,
            id: None,
            rect,
            part_number: None,
            transition_image_path: None,
            part_number_registered: false,
            transition_image_registered: false,
        });
        key
    }

    /// Seed rectangles already registered elsewhere, converting their
    /// relative geometry into the current frame.
    pub fn load(&mut self, rects: Vec<RelativeRect>, frame: &ImageFrame) {
        for rel in rects {
            let key = self.fresh_key();
            self.rects.push(PartRect {
                key,
                id: rel.id,
                rect: frame.to_absolute(&Rect::new(rel.x, rel.y, rel.width, rel.height)),
                part_number: rel.part_number,
                transition_image_path: rel.transition_image_path,
                part_number_registered: rel.part_number_registered,
                transition_image_registered: rel.transition_image_registered,
            });
        }
    }

    /// Topmost rectangle under `pos`: reverse insertion order, so on a
    /// shared edge the most recently drawn one wins.
    pub fn find_at(&self, pos: Pos) -> Option<&PartRect> {
        self.rects.iter().rev().find(|r| r.rect.contains_pos(pos))
    }

    /// Apply a workflow result to the rectangle named by `key`. Deleting
    /// results remove it; anything else merges the fields the result
    /// actually carries. Returns false if the key is gone (the rectangle
    /// was deleted while the workflow ran).
    pub fn apply_result(&mut self, key: RectKey, result: &ActionResult) -> bool {
        if result.deleted {
            let before = self.rects.len();
            self.rects.retain(|r| r.key != key);
            return self.rects.len() != before;
        }
        let Some(target) = self.rects.iter_mut().find(|r| r.key == key) else {
            return false;
        };
        if let Some(id) = result.id {
            target.id = Some(id);
        }
        if let Some(part_number) = &result.part_number {
            target.part_number = Some(part_number.clone());
        }
        if let Some(path) = &result.transition_image_path {
            target.transition_image_path = Some(path.clone());
        }
        if let Some(flag) = result.part_number_registered {
            target.part_number_registered = flag;
        }
        if let Some(flag) = result.transition_image_registered {
            target.transition_image_registered = flag;
        }
        true
    }

    fn fresh_key(&mut self) -> RectKey {
        let key = RectKey(self.next_key);
        self.next_key += 1;
        key
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
