// CPU framebuffer and triangle rasterizer for the software driver
//
// Window coordinates follow the driver convention: origin at the bottom-left
// corner, pixel centers at half-integers.

use glam::{Vec2, Vec4};

/// Drawing region in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    /// Map a clip-space position to window coordinates.
    ///
    /// Returns `None` when the vertex is behind the eye (`w <= 0`); the
    /// software driver does not clip.
    pub fn to_window(&self, clip: Vec4) -> Option<Vec2> {
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate().truncate() / clip.w;
        Some(Vec2::new(
            self.x as f32 + (ndc.x + 1.0) * 0.5 * self.width as f32,
            self.y as f32 + (ndc.y + 1.0) * 0.5 * self.height as f32,
        ))
    }
}

pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec4::ZERO; width as usize * height as usize],
        }
    }

    #[cfg(test)]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clear(&mut self, color: Vec4) {
        self.pixels.fill(color);
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Vec4> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Fill one triangle, either winding. Returns the number of pixels written.
    pub fn fill_triangle(&mut self, viewport: &Viewport, clip: [Vec4; 3], color: Vec4) -> usize {
        let (Some(a), Some(b), Some(c)) = (
            viewport.to_window(clip[0]),
            viewport.to_window(clip[1]),
            viewport.to_window(clip[2]),
        ) else {
            return 0;
        };

        let area = edge(a, b, c);
        if area == 0.0 {
            return 0;
        }

        // Bounding box, limited to the viewport and the framebuffer
        let min_x = a.x.min(b.x).min(c.x).floor().max(viewport.x as f32).max(0.0) as i64;
        let min_y = a.y.min(b.y).min(c.y).floor().max(viewport.y as f32).max(0.0) as i64;
        let right = (viewport.x + viewport.width) as f32;
        let top = (viewport.y + viewport.height) as f32;
        let max_x = a.x.max(b.x).max(c.x).ceil().min(right).min(self.width as f32) as i64;
        let max_y = a.y.max(b.y).max(c.y).ceil().min(top).min(self.height as f32) as i64;

        let mut written = 0;
        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b, c, p);
                let w1 = edge(c, a, p);
                let w2 = edge(a, b, p);

                let inside = if area > 0.0 {
                    w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0
                } else {
                    w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0
                };

                if inside {
                    self.pixels[y as usize * self.width as usize + x as usize] = color;
                    written += 1;
                }
            }
        }

        written
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: Vec4 = Vec4::new(0.0, 1.0, 0.0, 1.0);

    #[test]
    fn viewport_maps_ndc_corners() {
        let viewport = Viewport { x: 0, y: 0, width: 400, height: 300 };
        let bottom_left = viewport.to_window(Vec4::new(-1.0, -1.0, 0.0, 1.0));
        let top_right = viewport.to_window(Vec4::new(1.0, 1.0, 0.0, 1.0));
        assert_eq!(bottom_left, Some(Vec2::new(0.0, 0.0)));
        assert_eq!(top_right, Some(Vec2::new(400.0, 300.0)));
        assert_eq!(viewport.to_window(Vec4::new(0.0, 0.0, 0.0, 0.0)), None);
    }

    #[test]
    fn triangle_covers_centroid_not_corners() {
        let mut fb = Framebuffer::new(16, 16);
        let viewport = Viewport { x: 0, y: 0, width: 16, height: 16 };
        let written = fb.fill_triangle(
            &viewport,
            [
                Vec4::new(0.0, 0.5, 0.0, 1.0),
                Vec4::new(-0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.5, -0.5, 0.0, 1.0),
            ],
            GREEN,
        );

        assert!(written > 0);
        assert_eq!(fb.pixel(8, 6), Some(GREEN));
        assert_eq!(fb.pixel(0, 0), Some(Vec4::ZERO));
        assert_eq!(fb.pixel(15, 15), Some(Vec4::ZERO));
    }

    #[test]
    fn winding_does_not_cull() {
        let mut fb = Framebuffer::new(8, 8);
        let viewport = Viewport { x: 0, y: 0, width: 8, height: 8 };
        let clockwise = [
            Vec4::new(0.0, 0.5, 0.0, 1.0),
            Vec4::new(0.5, -0.5, 0.0, 1.0),
            Vec4::new(-0.5, -0.5, 0.0, 1.0),
        ];
        assert!(fb.fill_triangle(&viewport, clockwise, GREEN) > 0);
    }

    #[test]
    fn degenerate_triangle_writes_nothing() {
        let mut fb = Framebuffer::new(8, 8);
        let viewport = Viewport { x: 0, y: 0, width: 8, height: 8 };
        let line = [Vec4::new(0.0, 0.0, 0.0, 1.0); 3];
        assert_eq!(fb.fill_triangle(&viewport, line, GREEN), 0);
    }

    #[test]
    fn out_of_range_pixels_are_none() {
        let fb = Framebuffer::new(4, 4);
        assert_eq!(fb.pixel(4, 0), None);
        assert_eq!(fb.pixel(0, 4), None);
    }
}
