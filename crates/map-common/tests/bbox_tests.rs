//! Tests for BoundingBox and PixelBox operations.

use map_common::bbox::{BboxParseError, BoundingBox, PixelBox};

// ============================================================================
// Constructor tests
// ============================================================================

#[test]
fn test_bbox_new() {
    let bbox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
    assert_eq!(bbox.min_x, -180.0);
    assert_eq!(bbox.min_y, -90.0);
    assert_eq!(bbox.max_x, 180.0);
    assert_eq!(bbox.max_y, 90.0);
    assert_eq!(bbox.width(), 360.0);
    assert_eq!(bbox.height(), 180.0);
}

// ============================================================================
// from_csv tests
// ============================================================================

#[test]
fn test_parse_csv_floating() {
    let bbox = BoundingBox::from_csv("-125.5,24.75,-66.25,50.125").unwrap();
    assert_eq!(bbox.min_x, -125.5);
    assert_eq!(bbox.max_y, 50.125);
}

#[test]
fn test_parse_csv_wrong_count() {
    let result = BoundingBox::from_csv("0,0,100");
    assert!(matches!(result, Err(BboxParseError::InvalidFormat(_))));
}

#[test]
fn test_parse_csv_bad_number() {
    let result = BoundingBox::from_csv("0,zero,100,100");
    assert!(matches!(result, Err(BboxParseError::InvalidNumber(s)) if s == "zero"));
}

// ============================================================================
// Geometry tests
// ============================================================================

#[test]
fn test_touching_boxes_do_not_intersect() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
    assert!(!a.intersects(&b));
    assert!(a.intersection(&b).is_none());
}

#[test]
fn test_contains_point_is_inclusive() {
    let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    assert!(bbox.contains_point(0.0, 0.0));
    assert!(bbox.contains_point(10.0, 10.0));
    assert!(!bbox.contains_point(10.1, 5.0));
}

#[test]
fn test_expand() {
    let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).expand(2.0, 1.0);
    assert_eq!(bbox, BoundingBox::new(-2.0, -1.0, 12.0, 11.0));
}

// ============================================================================
// PixelBox tests
// ============================================================================

#[test]
fn test_pixel_box_round_trip() {
    let pbox = PixelBox::new(
        BoundingBox::new(-2_000_000.0, -1_000_000.0, 2_000_000.0, 1_000_000.0),
        400,
        200,
    );

    for &(x, y) in &[(0.0, 0.0), (-1_500_000.0, 750_000.0), (1_999_999.0, -999_999.0)] {
        let (px, py) = pbox.transform(x, y);
        let (wx, wy) = pbox.itransform(px, py);
        assert!((wx - x).abs() < 1e-6);
        assert!((wy - y).abs() < 1e-6);
    }

    assert_eq!(pbox.x_resolution(), 10_000.0);
    assert_eq!(pbox.y_resolution(), 10_000.0);
}

#[test]
fn test_pixel_box_y_axis_points_down() {
    let pbox = PixelBox::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10);
    let (_, top) = pbox.transform(5.0, 9.0);
    let (_, bottom) = pbox.transform(5.0, 1.0);
    assert!(top < bottom);
}
