/// 2D coordinate in points, origin at the top-left corner of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// 2D size representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// Axis-aligned rectangle passed to the device drawing calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }

    pub fn bottom(&self) -> f32 {
        self.origin.y + self.size.height
    }

    /// Largest rectangle with the aspect ratio of a `width_px` × `height_px`
    /// bitmap that fits inside `self`, anchored at the top-left corner.
    pub fn fit_aspect(&self, width_px: u32, height_px: u32) -> Rect {
        if width_px == 0 || height_px == 0 {
            return Rect {
                origin: self.origin,
                size: Size {
                    width: 0.0,
                    height: 0.0,
                },
            };
        }
        let scale = (self.size.width / width_px as f32).min(self.size.height / height_px as f32);
        Rect {
            origin: self.origin,
            size: Size {
                width: width_px as f32 * scale,
                height: height_px as f32 * scale,
            },
        }
    }
}

/// Horizontal alignment of a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Layout flags for `draw_text`, mirroring what a GDI-style `DrawText` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFlags {
    pub align: TextAlign,
    pub word_break: bool,
    pub external_leading: bool,
    /// When `false`, `&` is drawn literally instead of underlining the next glyph.
    pub expand_prefix: bool,
}

impl TextFlags {
    /// Fixed formatting used for every text page.
    pub const PAGE_BODY: TextFlags = TextFlags {
        align: TextAlign::Left,
        word_break: true,
        external_leading: true,
        expand_prefix: false,
    };
}

/// Font and flags selected for a `draw_text` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size_pt: f32,
    pub flags: TextFlags,
}

impl TextStyle {
    pub fn page_body(font_size_pt: f32) -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size_pt,
            flags: TextFlags::PAGE_BODY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_limited_by_width() {
        let area = Rect::new(36.0, 36.0, 500.0, 700.0);
        let fitted = area.fit_aspect(2000, 1000);
        assert_eq!(fitted.origin, area.origin);
        assert_eq!(fitted.size.width, 500.0);
        assert_eq!(fitted.size.height, 250.0);
    }

    #[test]
    fn tall_image_is_limited_by_height() {
        let area = Rect::new(0.0, 0.0, 500.0, 700.0);
        let fitted = area.fit_aspect(100, 1400);
        assert_eq!(fitted.size.height, 700.0);
        assert_eq!(fitted.size.width, 50.0);
    }

    #[test]
    fn small_image_is_scaled_up() {
        let area = Rect::new(0.0, 0.0, 400.0, 400.0);
        let fitted = area.fit_aspect(20, 10);
        assert_eq!(fitted.size.width, 400.0);
        assert_eq!(fitted.size.height, 200.0);
    }

    #[test]
    fn degenerate_bitmap_collapses() {
        let area = Rect::new(10.0, 10.0, 400.0, 400.0);
        let fitted = area.fit_aspect(0, 10);
        assert_eq!(fitted.size.width, 0.0);
        assert_eq!(area.bottom(), 410.0);
    }
}
