//! Anchor projection: fixed proportional offsets from a face box to named
//! anatomical points.

use crate::types::{AnchorSet, Point, SkinRegion};

// Offsets as fractions of face width (x) and face height (y), measured from the box center.
const EAR_X: f32 = 0.42;
const EAR_Y: f32 = -0.10;
const NOSE_Y: f32 = 0.02;
const CHIN_Y: f32 = 0.38;
const FOREHEAD_Y: f32 = -0.32;
const CHEEK_X: f32 = 0.25;
const CHEEK_Y: f32 = 0.06;
const TEMPLE_X: f32 = 0.38;
const TEMPLE_Y: f32 = -0.22;
const EYE_X: f32 = 0.18;
const EYE_Y: f32 = -0.12;

/// Project a face box onto the anchor set.
///
/// Pure: the same region always yields the same anchors. Every pair is built
/// from a single `±offset` around `center.x`, so left and right are exact mirrors.
pub fn project(region: &SkinRegion) -> AnchorSet {
    let center = region.center();
    let w = region.width;
    let h = region.height;

    let at = |dx: f32, dy: f32| Point::new(center.x + dx * w, center.y + dy * h);

    AnchorSet {
        left_ear: at(-EAR_X, EAR_Y),
        right_ear: at(EAR_X, EAR_Y),
        nose: at(0.0, NOSE_Y),
        chin: at(0.0, CHIN_Y),
        forehead: at(0.0, FOREHEAD_Y),
        left_cheek: at(-CHEEK_X, CHEEK_Y),
        right_cheek: at(CHEEK_X, CHEEK_Y),
        left_temple: at(-TEMPLE_X, TEMPLE_Y),
        right_temple: at(TEMPLE_X, TEMPLE_Y),
        left_eye: at(-EYE_X, EYE_Y),
        right_eye: at(EYE_X, EYE_Y),
        center,
        face_width: w,
        face_height: h,
    }
}
