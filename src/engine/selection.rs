//! Lasso and rectangle selection over the 2D category layout

use crate::structs::LayoutPoint;
use std::collections::BTreeSet;

/// Ray-casting point-in-polygon test. The polygon is implicitly closed.
#[must_use]
pub fn point_in_polygon(px: f64, py: f64, polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Keys of points inside the polygon; fewer than 3 vertices selects nothing
#[must_use]
pub fn select_lasso(points: &[LayoutPoint], polygon: &[(f64, f64)]) -> BTreeSet<String> {
    if polygon.len() < 3 {
        return BTreeSet::new();
    }
    points
        .iter()
        .filter(|p| point_in_polygon(p.x, p.y, polygon))
        .map(|p| p.key.clone())
        .collect()
}

/// Keys of points inside the rectangle, bounds inclusive and in any order
#[must_use]
pub fn select_rect(points: &[LayoutPoint], x0: f64, x1: f64, y0: f64, y1: f64) -> BTreeSet<String> {
    let (min_x, max_x) = (x0.min(x1), x0.max(x1));
    let (min_y, max_y) = (y0.min(y1), y0.max(y1));
    points
        .iter()
        .filter(|p| p.x >= min_x && p.x <= max_x && p.y >= min_y && p.y <= max_y)
        .map(|p| p.key.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Lasso,
    Rect,
}

#[derive(Debug, Clone, PartialEq)]
enum GestureState {
    Idle,
    Drawing { kind: GestureKind, path: Vec<(f64, f64)> },
}

/// Pointer gesture: the selection is computed once, when the pointer is released
#[derive(Debug, Clone, PartialEq)]
pub struct Gesture {
    state: GestureState,
}

impl Default for Gesture {
    fn default() -> Self {
        Self {
            state: GestureState::Idle,
        }
    }
}

impl Gesture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer down; restarts any gesture in progress
    pub fn begin(&mut self, kind: GestureKind, x: f64, y: f64) {
        self.state = GestureState::Drawing {
            kind,
            path: vec![(x, y)],
        };
    }

    /// Pointer move. A lasso accumulates its path, a rectangle only tracks the
    /// moving corner. No selection is computed.
    pub fn extend(&mut self, x: f64, y: f64) {
        if let GestureState::Drawing { kind, path } = &mut self.state {
            match kind {
                GestureKind::Lasso => path.push((x, y)),
                GestureKind::Rect => {
                    path.truncate(1);
                    path.push((x, y));
                }
            }
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, GestureState::Drawing { .. })
    }

    /// Path drawn so far, for the preview overlay
    #[must_use]
    pub fn preview(&self) -> &[(f64, f64)] {
        match &self.state {
            GestureState::Drawing { path, .. } => path,
            GestureState::Idle => &[],
        }
    }

    /// Preview rectangle as `(x0, x1, y0, y1)` while drawing a rectangle
    #[must_use]
    pub fn preview_rect(&self) -> Option<(f64, f64, f64, f64)> {
        match &self.state {
            GestureState::Drawing {
                kind: GestureKind::Rect,
                path,
            } => {
                let (x0, y0) = *path.first()?;
                let (x1, y1) = *path.last()?;
                Some((x0, x1, y0, y1))
            }
            _ => None,
        }
    }

    /// Pointer up. Released off the plot area aborts with no selection.
    pub fn finish(&mut self, points: &[LayoutPoint], released_on_target: bool) -> Option<BTreeSet<String>> {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        let GestureState::Drawing { kind, path } = state else {
            return None;
        };
        if !released_on_target {
            tracing::debug!("gesture released off target, selection aborted");
            return None;
        }
        let selected = match kind {
            GestureKind::Lasso => select_lasso(points, &path),
            GestureKind::Rect => {
                let (x0, y0) = path.first().copied()?;
                let (x1, y1) = path.last().copied()?;
                select_rect(points, x0, x1, y0, y1)
            }
        };
        tracing::debug!(selected = selected.len(), "gesture finished");
        Some(selected)
    }

    pub fn cancel(&mut self) {
        self.state = GestureState::Idle;
    }
}
