use glam::{IVec2, UVec3, Vec2, Vec3, Vec3A};

/// An axis-aligned bounding box in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box.
    pub min: Vec3,
    /// The maximum corner of the box.
    pub max: Vec3,
}

impl Aabb3d {
    /// Creates a new AABB from its minimum and maximum corners.
    #[inline]
    pub fn new(min: impl Into<Vec3>, max: impl Into<Vec3>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the smallest AABB that contains all of `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts<T: Copy + Into<Vec3>>(verts: &[T]) -> Option<Self> {
        let mut iter = verts.iter().map(|v| (*v).into());
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), point| {
            (point.min(min), point.max(max))
        });
        Some(Self { min, max })
    }

    /// The size of the box along every axis.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Returns `true` if the two boxes overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Returns `true` if every component of the box is a finite number.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }
}

/// An axis-aligned bounding box on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb2d {
    /// The minimum corner of the box.
    pub min: Vec2,
    /// The maximum corner of the box.
    pub max: Vec2,
}

impl Aabb2d {
    /// Computes the smallest AABB that contains all of `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec2]) -> Option<Self> {
        let mut iter = verts.iter().copied();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), point| {
            (point.min(min), point.max(max))
        });
        Some(Self { min, max })
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z should be 0.
/// Returns `None` for offsets that do not correspond to a cardinal direction.
#[inline]
pub(crate) fn dir_offset(offset_x: i32, offset_z: i32) -> Option<u8> {
    const DIRS: [u8; 5] = [3, 0, 0xff, 2, 1];
    let index = (((offset_z + 1) << 1) + offset_x) as usize;
    DIRS.get(index).copied().filter(|dir| *dir != 0xff)
}

/// Index of the next vertex in a ring of `n` vertices.
#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

/// Index of the previous vertex in a ring of `n` vertices.
#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance from `point` to the segment `(p, q)` on the xz-plane.
pub(crate) fn distance_squared_between_point_and_line_vec2(point: Vec2, (p, q): (Vec2, Vec2)) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(point - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - point).length_squared()
}

/// Squared distance from `point` to the segment `(p, q)` in 3D.
pub(crate) fn distance_squared_between_point_and_line_vec3(
    point: Vec3A,
    (p, q): (Vec3A, Vec3A),
) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(point - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - point).length_squared()
}

/// Squared distance from `point` to the segment `(p, q)` on an integer grid, as used by contour simplification.
pub(crate) fn distance_squared_between_point_and_line_ivec2(
    point: IVec2,
    (p, q): (IVec2, IVec2),
) -> f32 {
    distance_squared_between_point_and_line_vec2(point.as_vec2(), (p.as_vec2(), q.as_vec2()))
}

/// Twice the signed area of the triangle `(a, b, c)` on the xz-plane.
/// Positive when the triangle winds counter-clockwise when viewed from above with z pointing down.
#[inline]
pub(crate) fn area2(a: IVec2, b: IVec2, c: IVec2) -> i32 {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

#[inline]
pub(crate) fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) == 0
}

/// Returns true iff `ab` properly intersects `cd`: they share a point interior to both segments.
/// The properness of the intersection is ensured by using strict leftness.
pub(crate) fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true iff `(a, b, c)` are collinear and `c` lies on the closed segment `ab`.
fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on y.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
    }
}

/// Returns true iff segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Point-in-polygon test on the xz-plane using the even-odd rule.
pub(crate) fn point_in_poly(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;
    let Some(mut j) = vertices.len().checked_sub(1) else {
        return false;
    };
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_offset_round_trips() {
        for dir in 0..4 {
            let x = dir_offset_x(dir) as i32;
            let z = dir_offset_z(dir) as i32;
            assert_eq!(dir_offset(x, z), Some(dir));
        }
        assert_eq!(dir_offset(0, 0), None);
    }

    #[test]
    fn aabb_from_unit_cube_vertices() {
        let verts = [Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), Vec3::ONE];
        let aabb = Aabb3d::from_verts(&verts).unwrap();
        assert_eq!(aabb.min, Vec3::ZERO);
        assert_eq!(aabb.max, Vec3::ONE);
        assert!(Aabb3d::from_verts::<Vec3>(&[]).is_none());
    }

    #[test]
    fn segment_intersections() {
        let a = IVec2::new(0, 0);
        let b = IVec2::new(4, 4);
        assert!(intersect(a, b, IVec2::new(0, 4), IVec2::new(4, 0)));
        assert!(!intersect(a, b, IVec2::new(5, 0), IVec2::new(9, 0)));
        // Touching at an endpoint counts.
        assert!(intersect(a, b, IVec2::new(4, 4), IVec2::new(8, 0)));
    }

    #[test]
    fn point_in_square() {
        let square = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        assert!(point_in_poly(Vec2::new(1.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::new(3.0, 1.0), &square));
        assert!(!point_in_poly(Vec2::ONE, &[]));
    }

    #[test]
    fn point_segment_distance() {
        let d = distance_squared_between_point_and_line_vec2(
            Vec2::new(1.0, 1.0),
            (Vec2::ZERO, Vec2::new(2.0, 0.0)),
        );
        assert_eq!(d, 1.0);
    }
}
