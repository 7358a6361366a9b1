//! Piecewise-linear interpolation over scattered 2-D samples.
//!
//! The samples are Delaunay-triangulated (Bowyer-Watson) and a query is
//! answered by barycentric weighting inside the triangle that contains it.
//! Queries outside the convex hull of the samples return `None`: there is no
//! extrapolation.
//!
//! Coordinates are rescaled to the unit square before triangulating so that
//! axes with very different units (Hz against dB) do not produce sliver
//! triangles.

/// Tolerance on barycentric weights when deciding containment
const CONTAINMENT_EPSILON: f64 = 1e-9;

/// Distance from the unit square to the super-triangle vertices
const SUPER_TRIANGLE_SCALE: f64 = 1.0e3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    offset: f64,
    scale: f64,
}

impl Axis {
    fn fit(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let span = max - min;
        Self {
            offset: if min.is_finite() { min } else { 0.0 },
            scale: if span.is_finite() && span > 0.0 {
                1.0 / span
            } else {
                1.0
            },
        }
    }

    fn apply(&self, value: f64) -> f64 {
        (value - self.offset) * self.scale
    }
}

/// Linear interpolator over a Delaunay triangulation of scattered points
#[derive(Debug, Clone, PartialEq)]
pub struct LinearScatterInterpolator {
    /// Normalized coordinates
    points: Vec<[f64; 2]>,
    values: Vec<f64>,
    triangles: Vec<[usize; 3]>,
    x_axis: Axis,
    y_axis: Axis,
}

impl LinearScatterInterpolator {
    /// Build from `(x, y, value)` samples
    ///
    /// Samples with a non-finite coordinate or value are dropped, as are exact
    /// duplicates of an earlier coordinate.
    pub fn new(samples: &[(f64, f64, f64)]) -> Self {
        let mut kept: Vec<(f64, f64, f64)> = Vec::with_capacity(samples.len());
        for &(x, y, v) in samples {
            if !(x.is_finite() && y.is_finite() && v.is_finite()) {
                continue;
            }
            if kept.iter().any(|&(kx, ky, _)| kx == x && ky == y) {
                log::warn!("[Interpolate] Dropping duplicate sample at ({}, {})", x, y);
                continue;
            }
            kept.push((x, y, v));
        }

        let x_axis = Axis::fit(kept.iter().map(|s| s.0));
        let y_axis = Axis::fit(kept.iter().map(|s| s.1));
        let points: Vec<[f64; 2]> = kept
            .iter()
            .map(|&(x, y, _)| [x_axis.apply(x), y_axis.apply(y)])
            .collect();
        let values = kept.iter().map(|s| s.2).collect();
        let triangles = triangulate(&points);

        Self {
            points,
            values,
            triangles,
            x_axis,
            y_axis,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Interpolated value at `(x, y)`, or `None` outside the convex hull
    pub fn query(&self, x: f64, y: f64) -> Option<f64> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let p = [self.x_axis.apply(x), self.y_axis.apply(y)];
        for tri in &self.triangles {
            let [a, b, c] = tri.map(|i| self.points[i]);
            let Some((wa, wb, wc)) = barycentric(a, b, c, p) else {
                continue;
            };
            if wa >= -CONTAINMENT_EPSILON
                && wb >= -CONTAINMENT_EPSILON
                && wc >= -CONTAINMENT_EPSILON
            {
                return Some(
                    wa * self.values[tri[0]] + wb * self.values[tri[1]] + wc * self.values[tri[2]],
                );
            }
        }
        None
    }
}

fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn barycentric(a: [f64; 2], b: [f64; 2], c: [f64; 2], p: [f64; 2]) -> Option<(f64, f64, f64)> {
    let area = orient(a, b, c);
    if area.abs() < f64::EPSILON {
        return None;
    }
    let wa = orient(b, c, p) / area;
    let wb = orient(c, a, p) / area;
    Some((wa, wb, 1.0 - wa - wb))
}

/// True if `d` lies strictly inside the circumcircle of counter-clockwise `a, b, c`
fn in_circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    let det = adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx);
    det > 1e-12
}

fn ccw(tri: [usize; 3], points: &[[f64; 2]]) -> [usize; 3] {
    if orient(points[tri[0]], points[tri[1]], points[tri[2]]) < 0.0 {
        [tri[0], tri[2], tri[1]]
    } else {
        tri
    }
}

/// Bowyer-Watson triangulation of points in the unit square
fn triangulate(points: &[[f64; 2]]) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    let mut all = points.to_vec();
    let s = SUPER_TRIANGLE_SCALE;
    all.push([0.5 - s, 0.5 - s]);
    all.push([0.5 + s, 0.5 - s]);
    all.push([0.5, 0.5 + s]);

    let mut triangles: Vec<[usize; 3]> = vec![ccw([n, n + 1, n + 2], &all)];

    for i in 0..n {
        let p = all[i];
        let (bad, good): (Vec<[usize; 3]>, Vec<[usize; 3]>) = triangles
            .into_iter()
            .partition(|t| in_circumcircle(all[t[0]], all[t[1]], all[t[2]], p));
        triangles = good;

        // Edges of the cavity are those that belong to exactly one bad triangle
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for t in &bad {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                if let Some(pos) = edges
                    .iter()
                    .position(|&(x, y)| (x == b && y == a) || (x == a && y == b))
                {
                    edges.swap_remove(pos);
                } else {
                    edges.push((a, b));
                }
            }
        }

        for (a, b) in edges {
            if orient(all[a], all[b], p).abs() < f64::EPSILON {
                continue;
            }
            triangles.push(ccw([a, b, i], &all));
        }
    }

    triangles
        .into_iter()
        .filter(|t| t.iter().all(|&v| v < n))
        .filter(|t| orient(all[t[0]], all[t[1]], all[t[2]]).abs() >= f64::EPSILON)
        .collect()
}
