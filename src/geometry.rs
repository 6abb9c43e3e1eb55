use std::{cmp::Ordering, sync::Arc};

use anyhow::{Result, bail};
use geo::{Area, BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon};
use polars::frame::DataFrame;
use shapefile as shp;

/// Decoded boundary features: one attribute row per shape, aligned by position.
#[derive(Debug, Clone)]
pub struct GeometryUnits {
    /// Attribute table; row `i` describes `shapes[i]`.
    pub data: DataFrame,
    shapes: Arc<[MultiPolygon<f64>]>,
}

impl GeometryUnits {
    pub fn new(data: DataFrame, shapes: Vec<MultiPolygon<f64>>) -> Result<Self> {
        if data.height() != shapes.len() {
            bail!("attribute rows ({}) do not match shape count ({})", data.height(), shapes.len());
        }
        Ok(Self { data, shapes: shapes.into() })
    }

    #[inline] pub fn len(&self) -> usize { self.shapes.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.shapes.is_empty() }

    #[inline] pub fn shapes(&self) -> &[MultiPolygon<f64>] { &self.shapes }

    #[inline] pub fn shape(&self, idx: usize) -> Option<&MultiPolygon<f64>> { self.shapes.get(idx) }

    /// Replace the attribute table; the shapes are shared, not copied.
    pub(crate) fn with_data(&self, data: DataFrame) -> Result<Self> {
        if data.height() != self.shapes.len() {
            bail!("attribute rows ({}) do not match shape count ({})", data.height(), self.shapes.len());
        }
        Ok(Self { data, shapes: Arc::clone(&self.shapes) })
    }
}

/// Reject shapes a union cannot be trusted on: open or degenerate rings, non-finite coordinates, zero area.
pub fn validate_multipolygon(mp: &MultiPolygon<f64>) -> Result<()> {
    fn validate_ring(ring: &LineString<f64>, what: &str) -> Result<()> {
        if ring.0.len() < 4 {
            bail!("{what} ring has {} coordinates, need at least 4", ring.0.len());
        }
        if let Some(c) = ring.0.iter().find(|c| !c.x.is_finite() || !c.y.is_finite()) {
            bail!("{what} ring has non-finite coordinate ({}, {})", c.x, c.y);
        }
        if !ring.is_closed() {
            bail!("{what} ring is not closed");
        }
        Ok(())
    }

    if mp.0.is_empty() {
        bail!("empty multipolygon");
    }
    for polygon in &mp.0 {
        validate_ring(polygon.exterior(), "exterior")?;
        for hole in polygon.interiors() {
            validate_ring(hole, "interior")?;
        }
        if polygon.unsigned_area() == 0.0 {
            bail!("polygon has zero area");
        }
    }
    Ok(())
}

/// Total order on shapes: bounding box, then ring layout, then every vertex of every ring.
///
/// Distinct shapes never compare equal, so unions see members in a fixed order.
pub(crate) fn canonical_cmp(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Ordering {
    fn bounds(mp: &MultiPolygon<f64>) -> [f64; 4] {
        mp.bounding_rect()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
            .unwrap_or([f64::NAN; 4])
    }
    /// Per polygon: exterior length, hole count, each hole's length.
    fn layout(mp: &MultiPolygon<f64>) -> Vec<usize> {
        mp.0.iter()
            .flat_map(|p| {
                [p.exterior().0.len(), p.interiors().len()].into_iter()
                    .chain(p.interiors().iter().map(|ring| ring.0.len()))
            })
            .collect()
    }
    fn vertices(mp: &MultiPolygon<f64>) -> impl Iterator<Item = &Coord<f64>> {
        mp.0.iter().flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()).flat_map(|ring| ring.0.iter()))
    }

    let (ba, bb) = (bounds(a), bounds(b));
    ba.iter().zip(bb.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| layout(a).cmp(&layout(b)))
        .then_with(|| {
            // Equal layouts have equal vertex counts, so the zip covers every vertex.
            vertices(a).zip(vertices(b))
                .map(|(c, d)| c.x.total_cmp(&d.x).then(c.y.total_cmp(&d.y)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

/// Union an ordered list of shapes.
pub(crate) fn union_all<'a>(shapes: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> MultiPolygon<f64> {
    shapes.into_iter()
        .cloned()
        .reduce(|a, b| a.union(&b))
        .unwrap_or_else(|| MultiPolygon(vec![]))
}

/// Convert a shapefile polygon into a geo MultiPolygon.
///
/// Shapefile rings are stored as an exterior (clockwise) followed by its holes (counter-clockwise).
pub fn shape_to_multipolygon(shape: shp::Shape) -> Result<MultiPolygon<f64>> {
    let rings = match shape {
        shp::Shape::Polygon(p) => p.into_inner().into_iter()
            .map(|ring| ring_coords(ring.into_inner().iter().map(|pt| (pt.x, pt.y))))
            .collect::<Vec<_>>(),
        shp::Shape::PolygonM(p) => p.into_inner().into_iter()
            .map(|ring| ring_coords(ring.into_inner().iter().map(|pt| (pt.x, pt.y))))
            .collect(),
        shp::Shape::PolygonZ(p) => p.into_inner().into_iter()
            .map(|ring| ring_coords(ring.into_inner().iter().map(|pt| (pt.x, pt.y))))
            .collect(),
        other => bail!("unsupported shape type: {}", other.shapetype()),
    };

    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();
    for ring in rings {
        // Negative signed area means clockwise, i.e. an outer ring.
        if signed_area(&ring.0) < 0.0 {
            if let Some(ext) = exterior.take() {
                polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ring);
        } else {
            holes.push(ring);
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }

    Ok(MultiPolygon(polygons))
}

/// Closed LineString from raw points.
fn ring_coords(points: impl Iterator<Item = (f64, f64)>) -> LineString<f64> {
    let mut coords = points.map(|(x, y)| Coord { x, y }).collect::<Vec<_>>();
    if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
        if first != last { coords.push(first) }
    }
    LineString(coords)
}

fn signed_area(pts: &[Coord<f64>]) -> f64 {
    pts.windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>() / 2.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;

    /// Axis-aligned unit-height box from `x0` to `x1`.
    pub(crate) fn rect(x0: f64, x1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 1.0), (x: x0, y: 1.0), (x: x0, y: 0.0),
        ]])
    }

    #[test]
    fn valid_rectangle_passes() {
        assert!(validate_multipolygon(&rect(0.0, 1.0)).is_ok());
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        let flat = MultiPolygon(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)]]);
        assert!(validate_multipolygon(&flat).is_err());

        let nan = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: f64::NAN, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0),
        ]]);
        assert!(validate_multipolygon(&nan).is_err());

        assert!(validate_multipolygon(&MultiPolygon(vec![])).is_err());
    }

    #[test]
    fn adjacent_boxes_union_to_one_polygon() {
        let merged = union_all([&rect(0.0, 1.0), &rect(1.0, 2.0)]);
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn canonical_order_sorts_left_to_right() {
        let mut shapes = vec![rect(2.0, 3.0), rect(0.0, 1.0), rect(1.0, 2.0)];
        shapes.sort_by(canonical_cmp);
        let mins = shapes.iter().map(|s| s.bounding_rect().unwrap().min().x).collect::<Vec<_>>();
        assert_eq!(mins, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn canonical_order_separates_shapes_sharing_a_vertex_prefix() {
        let square = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0),
        ]]);
        let longer = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.5), (x: 0.0, y: 0.0),
        ]]);

        assert_ne!(canonical_cmp(&square, &longer), Ordering::Equal);
        assert_eq!(canonical_cmp(&square, &longer), canonical_cmp(&longer, &square).reverse());
        assert_eq!(canonical_cmp(&square, &square.clone()), Ordering::Equal);
    }

    #[test]
    fn canonical_order_looks_at_holes() {
        let exterior = [(0.0, 0.0), (4.0, 0.0), (4.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
        let hole = |x0: f64| LineString::from(vec![(x0, 0.25), (x0 + 1.0, 0.25), (x0 + 1.0, 0.75), (x0, 0.75), (x0, 0.25)]);
        let solid = MultiPolygon(vec![Polygon::new(LineString::from(exterior.to_vec()), vec![])]);
        let left_hole = MultiPolygon(vec![Polygon::new(LineString::from(exterior.to_vec()), vec![hole(1.0)])]);
        let right_hole = MultiPolygon(vec![Polygon::new(LineString::from(exterior.to_vec()), vec![hole(2.0)])]);

        assert_eq!(canonical_cmp(&solid, &left_hole), Ordering::Less);
        assert_eq!(canonical_cmp(&left_hole, &right_hole), Ordering::Less);
        assert_eq!(canonical_cmp(&right_hole, &left_hole), Ordering::Greater);
    }

    #[test]
    fn shapefile_rings_group_into_polygons() {
        // Clockwise outer ring with a counter-clockwise hole.
        let outer = vec![
            shp::Point::new(0.0, 0.0), shp::Point::new(0.0, 4.0), shp::Point::new(4.0, 4.0),
            shp::Point::new(4.0, 0.0), shp::Point::new(0.0, 0.0),
        ];
        let hole = vec![
            shp::Point::new(1.0, 1.0), shp::Point::new(2.0, 1.0), shp::Point::new(2.0, 2.0),
            shp::Point::new(1.0, 2.0), shp::Point::new(1.0, 1.0),
        ];
        let shape = shp::Shape::Polygon(shp::Polygon::with_rings(vec![
            shp::PolygonRing::Outer(outer),
            shp::PolygonRing::Inner(hole),
        ]));

        let mp = shape_to_multipolygon(shape).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!((mp.unsigned_area() - 15.0).abs() < 1e-9);
    }
}
