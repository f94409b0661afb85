//! Jewelry overlay rendering.
//!
//! Lays out the product image against an [`AnchorSet`] with per-category
//! rules, then draws it onto a transparent RGBA surface the size of the
//! video frame. The renderer keeps the last good anchors of the session so a
//! missed detection re-renders at the previous position instead of blanking.

use crate::asset::ProductAsset;
use crate::types::{AnchorSet, Point, ProductKind};
use image::{Rgba, RgbaImage};

// --- Earrings ---
const EARRING_WIDTH_RATIO: f32 = 0.13;
/// Earrings never shrink below this many pixels wide, so far faces still show them.
const EARRING_MIN_WIDTH: f32 = 24.0;
/// Fraction of the earring height drawn above the ear anchor; the rest hangs below.
const EARRING_HANG_RATIO: f32 = 0.1;
const EARRING_OPACITY: f32 = 0.88;

// --- Necklace ---
const NECKLACE_WIDTH_RATIO: f32 = 0.75;
const NECKLACE_HEIGHT_SQUASH: f32 = 0.55;
const NECKLACE_DROP_RATIO: f32 = 0.12;
const NECKLACE_OPACITY: f32 = 0.9;

// --- Ring ---
// No hand tracking: the ring sits beside the jaw, outward and below the right cheek.
const RING_SIZE_RATIO: f32 = 0.10;
const RING_OUTWARD_RATIO: f32 = 0.15;
const RING_DOWNWARD_RATIO: f32 = 0.30;
const RING_OPACITY: f32 = 0.9;

const DEFAULT_SHADOW: Shadow = Shadow {
    offset_x: 2.0,
    offset_y: 3.0,
    blur: 2.0,
    opacity: 0.35,
};

const MARKER_BOX: Rgba<u8> = Rgba([0, 255, 0, 204]);
const MARKER_DOT: Rgba<u8> = Rgba([255, 0, 0, 230]);
const MARKER_DOT_RADIUS: f32 = 4.0;

/// Transparent drawing layer aligned with the video frame.
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    pixels: RgbaImage,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { pixels: RgbaImage::new(width, height) }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Match the frame size. Reallocates (and so clears) only when the size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.pixels.width() != width || self.pixels.height() != height {
            tracing::debug!(width, height, "overlay surface resized");
            self.pixels = RgbaImage::new(width, height);
        }
    }

    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    /// True when nothing has been drawn since the last clear.
    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p[3] == 0)
    }
}

/// Where and how one copy of the product image lands on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Draw with a horizontal mirror transform.
    pub mirrored: bool,
    pub opacity: f32,
}

impl Placement {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Soft drop shadow drawn beneath each placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub offset_x: f32,
    pub offset_y: f32,
    pub blur: f32,
    pub opacity: f32,
}

/// Compute the placements for a product category.
///
/// `aspect` is the asset's natural height over width.
pub fn layout(kind: ProductKind, anchors: &AnchorSet, aspect: f32) -> Vec<Placement> {
    match kind {
        ProductKind::Earrings => {
            let width = (anchors.face_width * EARRING_WIDTH_RATIO).max(EARRING_MIN_WIDTH);
            let height = width * aspect;
            let at = |ear: Point, mirrored: bool| Placement {
                x: ear.x - width / 2.0,
                y: ear.y - height * EARRING_HANG_RATIO,
                width,
                height,
                mirrored,
                opacity: EARRING_OPACITY,
            };
            vec![at(anchors.left_ear, false), at(anchors.right_ear, true)]
        }
        ProductKind::Necklace => {
            let width = anchors.face_width * NECKLACE_WIDTH_RATIO;
            let height = width * aspect * NECKLACE_HEIGHT_SQUASH;
            vec![Placement {
                x: anchors.chin.x - width / 2.0,
                y: anchors.chin.y + anchors.face_height * NECKLACE_DROP_RATIO,
                width,
                height,
                mirrored: false,
                opacity: NECKLACE_OPACITY,
            }]
        }
        ProductKind::Ring => {
            let size = anchors.face_width * RING_SIZE_RATIO;
            let cx = anchors.right_cheek.x + anchors.face_width * RING_OUTWARD_RATIO;
            let cy = anchors.right_cheek.y + anchors.face_height * RING_DOWNWARD_RATIO;
            vec![Placement {
                x: cx - size / 2.0,
                y: cy - size / 2.0,
                width: size,
                height: size,
                mirrored: false,
                opacity: RING_OPACITY,
            }]
        }
    }
}

/// Which anchors a render used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSource {
    /// Anchors from this frame's detection.
    Fresh,
    /// Last good anchors of the session, reused after a miss.
    Stale,
}

/// Outcome of one successful render.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub source: AnchorSource,
    pub kind: ProductKind,
    pub placements: Vec<Placement>,
}

/// Session-scoped overlay renderer.
#[derive(Debug, Default)]
pub struct OverlayRenderer {
    last_anchors: Option<AnchorSet>,
    active: bool,
    debug_markers: bool,
}

impl OverlayRenderer {
    pub fn new(debug_markers: bool) -> Self {
        Self { last_anchors: None, active: false, debug_markers }
    }

    /// Whether the last render call drew anything.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_anchors(&self) -> Option<&AnchorSet> {
        self.last_anchors.as_ref()
    }

    /// Forget the session's anchors.
    pub fn reset(&mut self) {
        self.last_anchors = None;
        self.active = false;
    }

    /// Clear the surface and draw the product for this tick.
    ///
    /// `anchors` is `None` on a detection miss; the last good anchors are
    /// used instead when available. Returns `None` (and goes inactive) when
    /// there is no asset or no anchors at all.
    pub fn render(
        &mut self,
        surface: &mut OverlaySurface,
        anchors: Option<&AnchorSet>,
        asset: Option<&ProductAsset>,
    ) -> Option<RenderReport> {
        surface.clear();

        if let Some(fresh) = anchors {
            self.last_anchors = Some(*fresh);
        }
        let source = if anchors.is_some() {
            AnchorSource::Fresh
        } else {
            AnchorSource::Stale
        };

        let (Some(anchors), Some(asset)) = (self.last_anchors, asset) else {
            if self.active {
                tracing::debug!("overlay rendering suspended");
            }
            self.active = false;
            return None;
        };

        let placements = layout(asset.kind(), &anchors, asset.aspect());
        for p in &placements {
            draw_shadow(surface, asset.image(), p, &DEFAULT_SHADOW);
            draw_image(surface, asset.image(), p);
        }
        if self.debug_markers {
            draw_debug_markers(surface, &anchors);
        }

        if source == AnchorSource::Stale {
            tracing::trace!("rendered with stale anchors");
        }
        self.active = true;

        Some(RenderReport { source, kind: asset.kind(), placements })
    }
}

/// Draw `image` into the placement rectangle with bilinear sampling.
pub fn draw_image(surface: &mut OverlaySurface, image: &RgbaImage, p: &Placement) {
    if p.width <= 0.0 || p.height <= 0.0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    let (iw, ih) = (image.width() as f32, image.height() as f32);
    let Some((x0, y0, x1, y1)) = clip_rect(surface, p.x, p.y, p.width, p.height, 0.0) else {
        return;
    };

    for dy in y0..y1 {
        for dx in x0..x1 {
            let u = (dx as f32 + 0.5 - p.x) / p.width;
            let v = (dy as f32 + 0.5 - p.y) / p.height;
            if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
                continue;
            }
            let u = if p.mirrored { 1.0 - u } else { u };
            let src = sample_premultiplied(image, u * iw, v * ih);
            blend(surface.pixels.get_pixel_mut(dx, dy), src, p.opacity);
        }
    }
}

/// Draw a blurred, offset silhouette of `image` in black.
fn draw_shadow(surface: &mut OverlaySurface, image: &RgbaImage, p: &Placement, shadow: &Shadow) {
    if p.width <= 0.0 || p.height <= 0.0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    let (iw, ih) = (image.width() as f32, image.height() as f32);
    let sx = p.x + shadow.offset_x;
    let sy = p.y + shadow.offset_y;
    let Some((x0, y0, x1, y1)) = clip_rect(surface, sx, sy, p.width, p.height, shadow.blur) else {
        return;
    };

    let alpha_at = |px: f32, py: f32| -> f32 {
        let u = (px - sx) / p.width;
        let v = (py - sy) / p.height;
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return 0.0;
        }
        let u = if p.mirrored { 1.0 - u } else { u };
        sample_premultiplied(image, u * iw, v * ih)[3]
    };

    for dy in y0..y1 {
        for dx in x0..x1 {
            let cx = dx as f32 + 0.5;
            let cy = dy as f32 + 0.5;
            // 3x3 box kernel with taps `blur` pixels apart
            let mut sum = 0.0;
            for ty in [-1.0f32, 0.0, 1.0] {
                for tx in [-1.0f32, 0.0, 1.0] {
                    sum += alpha_at(cx + tx * shadow.blur, cy + ty * shadow.blur);
                }
            }
            let a = sum / 9.0;
            if a > 0.0 {
                blend(
                    surface.pixels.get_pixel_mut(dx, dy),
                    [0.0, 0.0, 0.0, a],
                    shadow.opacity * p.opacity,
                );
            }
        }
    }
}

/// Face box outline and anchor dots, for tuning the heuristics.
fn draw_debug_markers(surface: &mut OverlaySurface, anchors: &AnchorSet) {
    let left = anchors.center.x - anchors.face_width / 2.0;
    let top = anchors.center.y - anchors.face_height / 2.0;
    let right = left + anchors.face_width;
    let bottom = top + anchors.face_height;

    let (w, h) = (surface.width() as i64, surface.height() as i64);
    let mut put = |x: i64, y: i64, color: Rgba<u8>| {
        if x >= 0 && y >= 0 && x < w && y < h {
            let c = [
                color[0] as f32 * color[3] as f32 / 255.0,
                color[1] as f32 * color[3] as f32 / 255.0,
                color[2] as f32 * color[3] as f32 / 255.0,
                color[3] as f32 / 255.0,
            ];
            blend(surface.pixels.get_pixel_mut(x as u32, y as u32), c, 1.0);
        }
    };

    let (l, r) = (left.round() as i64, right.round() as i64);
    let (t, b) = (top.round() as i64, bottom.round() as i64);
    for thickness in 0..2 {
        for x in l..=r {
            put(x, t + thickness, MARKER_BOX);
            put(x, b - thickness, MARKER_BOX);
        }
        for y in t..=b {
            put(l + thickness, y, MARKER_BOX);
            put(r - thickness, y, MARKER_BOX);
        }
    }

    let rad = MARKER_DOT_RADIUS;
    for (_, p) in anchors.named() {
        let (x0, x1) = ((p.x - rad).floor() as i64, (p.x + rad).ceil() as i64);
        let (y0, y1) = ((p.y - rad).floor() as i64, (p.y + rad).ceil() as i64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let ddx = x as f32 + 0.5 - p.x;
                let ddy = y as f32 + 0.5 - p.y;
                if ddx * ddx + ddy * ddy <= rad * rad {
                    put(x, y, MARKER_DOT);
                }
            }
        }
    }
}

/// Integer pixel bounds of a rectangle grown by `margin`, clipped to the surface.
fn clip_rect(
    surface: &OverlaySurface,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    margin: f32,
) -> Option<(u32, u32, u32, u32)> {
    let x0 = ((x - margin).floor() as i64).max(0);
    let y0 = ((y - margin).floor() as i64).max(0);
    let x1 = ((x + width + margin).ceil() as i64).min(surface.width() as i64);
    let y1 = ((y + height + margin).ceil() as i64).min(surface.height() as i64);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

/// Bilinear sample at continuous source coordinates (pixel centers at +0.5).
///
/// Returns premultiplied RGB in 0–255 and alpha in 0–1. Coordinates are
/// clamped to the image edge.
fn sample_premultiplied(image: &RgbaImage, sx: f32, sy: f32) -> [f32; 4] {
    let w = image.width() as i32;
    let h = image.height() as i32;
    let fx_src = sx - 0.5;
    let fy_src = sy - 0.5;
    let x0 = fx_src.floor() as i32;
    let y0 = fy_src.floor() as i32;
    let fx = fx_src - x0 as f32;
    let fy = fy_src - y0 as f32;

    let fetch = |x: i32, y: i32| -> [f32; 4] {
        let p = image.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32);
        let a = p[3] as f32 / 255.0;
        [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, a]
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Source-over composite of a premultiplied sample onto a straight-alpha pixel.
pub(crate) fn blend(dst: &mut Rgba<u8>, src: [f32; 4], opacity: f32) {
    let sa = (src[3] * opacity).clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let s = src[c] * opacity;
        let d = dst[c] as f32 * da;
        let v = (s + d * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::project;
    use crate::types::SkinRegion;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn region() -> SkinRegion {
        SkinRegion { x: 220.0, y: 100.0, width: 200.0, height: 260.0, confidence: 0.8 }
    }

    /// Left half red, right half blue, twice as tall as wide.
    fn split_asset(kind: ProductKind) -> ProductAsset {
        let img = RgbaImage::from_fn(20, 40, |x, _| if x < 10 { RED } else { BLUE });
        ProductAsset::from_image("split", kind, img).unwrap()
    }

    #[test]
    fn test_earring_layout_symmetric() {
        let anchors = project(&region());
        let cx = region().x + region().width / 2.0;
        let ps = layout(ProductKind::Earrings, &anchors, 2.0);
        assert_eq!(ps.len(), 2);

        let (l, r) = (ps[0], ps[1]);
        let distance = r.center().x - l.center().x;
        let expected = 2.0 * (anchors.left_ear.x - cx).abs();
        assert!((distance - expected).abs() < 1e-3, "{distance} vs {expected}");
        assert_eq!(l.width, r.width);
        assert_eq!(l.height, r.height);
        assert!(!l.mirrored);
        assert!(r.mirrored);
    }

    #[test]
    fn test_earrings_hang_below_ear() {
        let anchors = project(&region());
        let ps = layout(ProductKind::Earrings, &anchors, 2.0);
        let p = ps[0];
        assert!(p.y < anchors.left_ear.y);
        assert!(p.center().y > anchors.left_ear.y);
        assert!((p.height - p.width * 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_earring_width_floor() {
        let tiny = SkinRegion { x: 0.0, y: 0.0, width: 40.0, height: 52.0, confidence: 0.5 };
        let ps = layout(ProductKind::Earrings, &project(&tiny), 1.0);
        assert_eq!(ps[0].width, EARRING_MIN_WIDTH);
    }

    #[test]
    fn test_necklace_layout_below_chin() {
        let anchors = project(&region());
        let ps = layout(ProductKind::Necklace, &anchors, 0.5);
        assert_eq!(ps.len(), 1);
        let p = ps[0];
        assert!((p.width - 150.0).abs() < 1e-3);
        assert!((p.height - 150.0 * 0.5 * NECKLACE_HEIGHT_SQUASH).abs() < 1e-3);
        assert!(p.y > anchors.chin.y);
        assert!((p.center().x - anchors.chin.x).abs() < 1e-3);
    }

    #[test]
    fn test_ring_layout_square_near_jaw() {
        let anchors = project(&region());
        let ps = layout(ProductKind::Ring, &anchors, 3.0);
        assert_eq!(ps.len(), 1);
        let p = ps[0];
        assert_eq!(p.width, p.height);
        assert!(p.center().x > anchors.right_cheek.x);
        assert!(p.center().y > anchors.right_cheek.y);
    }

    #[test]
    fn test_render_draws_mirrored_pair() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(640, 480);
        let mut renderer = OverlayRenderer::default();

        let report = renderer.render(&mut surface, Some(&anchors), Some(&asset)).unwrap();
        assert_eq!(report.source, AnchorSource::Fresh);
        assert!(renderer.is_active());

        let (l, r) = (report.placements[0], report.placements[1]);
        let pixel_at = |p: &Placement| {
            let x = (p.x + p.width * 0.2) as u32;
            let y = p.center().y as u32;
            *surface.image().get_pixel(x, y)
        };

        // Left copy: red on its left side. Mirrored right copy: blue on its left side.
        let left_px = pixel_at(&l);
        let right_px = pixel_at(&r);
        assert!(left_px[0] > 200 && left_px[2] < 50, "left {left_px:?}");
        assert!(right_px[2] > 200 && right_px[0] < 50, "right {right_px:?}");
    }

    #[test]
    fn test_render_partial_opacity() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Necklace);
        let mut surface = OverlaySurface::new(640, 480);
        let report = OverlayRenderer::default()
            .render(&mut surface, Some(&anchors), Some(&asset))
            .unwrap();
        let c = report.placements[0].center();
        let a = surface.image().get_pixel(c.x as u32, c.y as u32)[3];
        assert!(a > 200 && a < 255, "alpha {a}");
    }

    #[test]
    fn test_hold_last_good_anchors() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(640, 480);
        let mut renderer = OverlayRenderer::default();

        let fresh = renderer.render(&mut surface, Some(&anchors), Some(&asset)).unwrap();
        let stale = renderer.render(&mut surface, None, Some(&asset)).unwrap();
        assert_eq!(stale.source, AnchorSource::Stale);
        assert_eq!(fresh.placements, stale.placements);
        assert!(!surface.is_blank());
        assert!(renderer.is_active());
    }

    #[test]
    fn test_no_anchors_ever_is_inactive() {
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(64, 48);
        let mut renderer = OverlayRenderer::default();
        assert!(renderer.render(&mut surface, None, Some(&asset)).is_none());
        assert!(!renderer.is_active());
        assert!(surface.is_blank());
    }

    #[test]
    fn test_missing_asset_suspends_and_clears() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(640, 480);
        let mut renderer = OverlayRenderer::default();

        renderer.render(&mut surface, Some(&anchors), Some(&asset)).unwrap();
        assert!(renderer.render(&mut surface, Some(&anchors), None).is_none());
        assert!(!renderer.is_active());
        assert!(surface.is_blank());
        // Anchors survive so rendering resumes once an asset loads.
        assert!(renderer.last_anchors().is_some());
    }

    #[test]
    fn test_reset_forgets_anchors() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Ring);
        let mut surface = OverlaySurface::new(640, 480);
        let mut renderer = OverlayRenderer::default();
        renderer.render(&mut surface, Some(&anchors), Some(&asset));
        renderer.reset();
        assert!(renderer.render(&mut surface, None, Some(&asset)).is_none());
    }

    #[test]
    fn test_offscreen_placement_is_clipped() {
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(32, 32);
        let p = Placement { x: -100.0, y: -100.0, width: 10.0, height: 10.0, mirrored: false, opacity: 1.0 };
        draw_image(&mut surface, asset.image(), &p);
        assert!(surface.is_blank());

        let p = Placement { x: 28.0, y: 28.0, width: 10.0, height: 10.0, mirrored: true, opacity: 1.0 };
        draw_image(&mut surface, asset.image(), &p);
        assert!(!surface.is_blank());
    }

    #[test]
    fn test_debug_markers_draw_on_surface() {
        let anchors = project(&region());
        let asset = split_asset(ProductKind::Earrings);
        let mut surface = OverlaySurface::new(640, 480);
        OverlayRenderer::new(true).render(&mut surface, Some(&anchors), Some(&asset));
        let nose = anchors.nose;
        let px = surface.image().get_pixel(nose.x as u32, nose.y as u32);
        assert!(px[0] > 200 && px[1] < 50, "nose marker {px:?}");
    }

    #[test]
    fn test_blend_over_transparent_keeps_color() {
        let mut dst = Rgba([0, 0, 0, 0]);
        blend(&mut dst, [255.0, 0.0, 0.0, 1.0], 0.5);
        assert_eq!(dst[0], 255);
        assert_eq!(dst[3], 128);
    }

    #[test]
    fn test_surface_resize_only_on_change() {
        let mut surface = OverlaySurface::new(4, 4);
        blend(surface.pixels.get_pixel_mut(0, 0), [255.0, 0.0, 0.0, 1.0], 1.0);
        surface.resize(4, 4);
        assert!(!surface.is_blank());
        surface.resize(8, 6);
        assert_eq!((surface.width(), surface.height()), (8, 6));
        assert!(surface.is_blank());
    }
}
