use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 2.0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self { Self { x, y } }
}

impl From<egui::Pos2> for Point {
    fn from(p: egui::Pos2) -> Self { Point::new(p.x, p.y) }
}

impl From<Point> for egui::Pos2 {
    fn from(p: Point) -> Self { egui::pos2(p.x, p.y) }
}

/// Terminal event of a gesture, in screen coordinates.
///
/// Touch gestures carry the list of changed touch points; mouse gestures do
/// not. Either way [`PointerEvent::client_position`] yields one point.
#[derive(Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub client: Point,
    pub changed_touches: Option<Vec<Point>>,
}

impl PointerEvent {
    pub fn mouse(client: Point) -> Self {
        Self { client, changed_touches: None }
    }

    pub fn touch(touches: Vec<Point>) -> Self {
        let client = touches.first().copied().unwrap_or_default();
        Self { client, changed_touches: Some(touches) }
    }

    pub fn client_position(&self) -> Point {
        match &self.changed_touches {
            Some(touches) => touches.first().copied().unwrap_or(self.client),
            None => self.client,
        }
    }
}

/// Pan/zoom state of the canvas.
///
/// Zoom scales around the center of the canvas rect and pan is applied after
/// scaling, so `screen = (canvas - center) * zoom + center + pan`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub center: Point,
    pub pan: Point,
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { center: Point::default(), pan: Point::default(), zoom: 1.0 }
    }
}

impl ViewTransform {
    /// Non-finite zoom (a corrupt snapshot, say) falls back to 1.0.
    pub fn new(center: Point, pan: Point, zoom: f32) -> Self {
        let zoom = if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 };
        let pan = if pan.x.is_finite() && pan.y.is_finite() { pan } else { Point::default() };
        Self { center, pan, zoom }
    }

    pub fn to_screen_position(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.center.x) * self.zoom + self.center.x + self.pan.x,
            (p.y - self.center.y) * self.zoom + self.center.y + self.pan.y,
        )
    }

    pub fn to_canvas_position(&self, p: Point) -> Point {
        Point::new(
            ((p.x - self.pan.x) - self.center.x) / self.zoom + self.center.x,
            ((p.y - self.pan.y) - self.center.y) / self.zoom + self.center.y,
        )
    }

    /// Canvas position of a gesture's terminal event.
    pub fn event_to_canvas(&self, event: &PointerEvent) -> Point {
        self.to_canvas_position(event.client_position())
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan.x += dx;
        self.pan.y += dy;
    }

    /// Pan so that canvas point `p` lands on the canvas center.
    pub fn center_on(&mut self, p: Point) {
        self.pan = Point::new(-(p.x - self.center.x) * self.zoom, -(p.y - self.center.y) * self.zoom);
    }

    pub fn zoom_by(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        }
    }
}
