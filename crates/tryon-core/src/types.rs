use serde::{Deserialize, Serialize};

/// A 2-D point in frame pixel coordinates (natural, un-mirrored orientation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Heuristic face bounding box for one frame.
///
/// Recomputed every tick and never persisted. `confidence` is always in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkinRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl SkinRegion {
    /// Center of the bounding box.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether `p` lies inside the box grown by `margin` pixels on every side.
    pub fn contains_with_margin(&self, p: Point, margin: f32) -> bool {
        p.x >= self.x - margin
            && p.x <= self.x + self.width + margin
            && p.y >= self.y - margin
            && p.y <= self.y + self.height + margin
    }
}

/// Named anatomical reference points derived from a [`SkinRegion`].
///
/// "Left" and "right" refer to image-left and image-right in the natural
/// camera orientation. Left/right pairs are mirror-symmetric about
/// `center.x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorSet {
    pub left_ear: Point,
    pub right_ear: Point,
    pub nose: Point,
    pub chin: Point,
    pub forehead: Point,
    pub left_cheek: Point,
    pub right_cheek: Point,
    pub left_temple: Point,
    pub right_temple: Point,
    pub left_eye: Point,
    pub right_eye: Point,
    /// Center of the face box the anchors were projected from.
    pub center: Point,
    /// Face box width in pixels; drives overlay scale.
    pub face_width: f32,
    /// Face box height in pixels.
    pub face_height: f32,
}

impl AnchorSet {
    /// All named anchors with their labels, in a fixed order.
    pub fn named(&self) -> [(&'static str, Point); 11] {
        [
            ("leftEar", self.left_ear),
            ("rightEar", self.right_ear),
            ("nose", self.nose),
            ("chin", self.chin),
            ("forehead", self.forehead),
            ("leftCheek", self.left_cheek),
            ("rightCheek", self.right_cheek),
            ("leftTemple", self.left_temple),
            ("rightTemple", self.right_temple),
            ("leftEye", self.left_eye),
            ("rightEye", self.right_eye),
        ]
    }
}

/// Placement category for a jewelry product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Earrings,
    Necklace,
    Ring,
}

impl ProductKind {
    /// Infer the placement category from product name and category text.
    ///
    /// Earring keywords are checked first since "earring" contains "ring".
    /// Anything unrecognised is treated as earrings.
    pub fn classify(name: &str, category: &str) -> Self {
        let text = format!("{} {}", name, category).to_lowercase();
        if text.contains("earring") || text.contains("chandbali") {
            ProductKind::Earrings
        } else if text.contains("necklace") || text.contains("chain") {
            ProductKind::Necklace
        } else if text.contains("ring") {
            ProductKind::Ring
        } else {
            ProductKind::Earrings
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Earrings => "earrings",
            ProductKind::Necklace => "necklace",
            ProductKind::Ring => "ring",
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_center() {
        let r = SkinRegion { x: 10.0, y: 20.0, width: 100.0, height: 130.0, confidence: 0.5 };
        let c = r.center();
        assert!((c.x - 60.0).abs() < 1e-6);
        assert!((c.y - 85.0).abs() < 1e-6);
    }

    #[test]
    fn test_contains_with_margin() {
        let r = SkinRegion { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        assert!(r.contains_with_margin(Point::new(5.0, 5.0), 0.0));
        assert!(!r.contains_with_margin(Point::new(11.0, 5.0), 0.0));
        assert!(r.contains_with_margin(Point::new(11.0, 5.0), 2.0));
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(ProductKind::classify("Gold Hoop Earrings", ""), ProductKind::Earrings);
        assert_eq!(ProductKind::classify("Kundan Chandbali", "ethnic"), ProductKind::Earrings);
        assert_eq!(ProductKind::classify("Pearl Strand", "Necklace"), ProductKind::Necklace);
        assert_eq!(ProductKind::classify("Box chain 18in", ""), ProductKind::Necklace);
        assert_eq!(ProductKind::classify("Solitaire", "Rings"), ProductKind::Ring);
    }

    #[test]
    fn test_classify_earring_beats_ring() {
        // "earring" contains the substring "ring"
        assert_eq!(ProductKind::classify("Drop earring", "ring"), ProductKind::Earrings);
    }

    #[test]
    fn test_classify_default_is_earrings() {
        assert_eq!(ProductKind::classify("Brooch", "pins"), ProductKind::Earrings);
        assert_eq!(ProductKind::classify("", ""), ProductKind::Earrings);
    }
}
