//! Well-known text geometry parsing.
//!
//! Supports the 2D types `POINT`, `LINESTRING`, `POLYGON`, their `MULTI`
//! variants and `GEOMETRYCOLLECTION`, including the `EMPTY` forms. Z and M
//! ordinates are rejected.

use geo::{Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use map_common::{RenderError, RenderResult};

/// Parse a WKT string into a geometry.
pub fn parse_wkt(text: &str) -> RenderResult<Geometry<f64>> {
    let mut parser = Parser { text, pos: 0 };
    let geom = parser.geometry()?;
    parser.skip_whitespace();
    if parser.pos != text.len() {
        return Err(parser.error("Unexpected trailing text"));
    }
    Ok(geom)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> RenderError {
        RenderError::config(message).with_param("wkt", self.text).with_param("position", self.pos)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.text[self.pos..].chars().next()
    }

    fn expect(&mut self, c: char) -> RenderResult<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("Expected '{}'", c)))
        }
    }

    fn word(&mut self) -> &'a str {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        let len = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    /// `EMPTY` or an opening parenthesis.
    fn open(&mut self) -> RenderResult<bool> {
        if self.peek() == Some('(') {
            self.pos += 1;
            return Ok(true);
        }
        let start = self.pos;
        if self.word().eq_ignore_ascii_case("EMPTY") {
            return Ok(false);
        }
        self.pos = start;
        Err(self.error("Expected '(' or EMPTY"))
    }

    /// Comma separated items up to the closing parenthesis.
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> RenderResult<T>) -> RenderResult<Vec<T>> {
        let mut items = vec![item(self)?];
        while self.peek() == Some(',') {
            self.pos += 1;
            items.push(item(self)?);
        }
        self.expect(')')?;
        Ok(items)
    }

    fn number(&mut self) -> RenderResult<f64> {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
            .unwrap_or(rest.len());
        let value = rest[..len].parse::<f64>().map_err(|_| self.error("Invalid number"))?;
        self.pos += len;
        Ok(value)
    }

    fn coord(&mut self) -> RenderResult<Coord<f64>> {
        let x = self.number()?;
        let y = self.number()?;
        if matches!(self.peek(), Some(c) if c != ',' && c != ')') {
            return Err(self.error("Only two dimensional coordinates are supported"));
        }
        Ok(Coord { x, y })
    }

    fn line(&mut self) -> RenderResult<LineString<f64>> {
        if !self.open()? {
            return Ok(LineString::new(Vec::new()));
        }
        Ok(LineString::new(self.list(Self::coord)?))
    }

    fn polygon(&mut self) -> RenderResult<Polygon<f64>> {
        if !self.open()? {
            return Ok(Polygon::new(LineString::new(Vec::new()), Vec::new()));
        }
        let mut rings = self.list(Self::line)?.into_iter();
        let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
        Ok(Polygon::new(exterior, rings.collect()))
    }

    /// A multipoint member, with or without its own parentheses.
    fn multipoint_member(&mut self) -> RenderResult<Point<f64>> {
        if self.peek() == Some('(') {
            self.pos += 1;
            let c = self.coord()?;
            self.expect(')')?;
            Ok(c.into())
        } else {
            Ok(self.coord()?.into())
        }
    }

    fn geometry(&mut self) -> RenderResult<Geometry<f64>> {
        let name = self.word().to_ascii_uppercase();
        match name.as_str() {
            "POINT" => {
                if !self.open()? {
                    return Ok(Geometry::MultiPoint(MultiPoint::new(Vec::new())));
                }
                let c = self.coord()?;
                self.expect(')')?;
                Ok(Geometry::Point(c.into()))
            }
            "LINESTRING" => Ok(Geometry::LineString(self.line()?)),
            "POLYGON" => Ok(Geometry::Polygon(self.polygon()?)),
            "MULTIPOINT" => {
                let points = if self.open()? { self.list(Self::multipoint_member)? } else { Vec::new() };
                Ok(Geometry::MultiPoint(MultiPoint::new(points)))
            }
            "MULTILINESTRING" => {
                let lines = if self.open()? { self.list(Self::line)? } else { Vec::new() };
                Ok(Geometry::MultiLineString(MultiLineString::new(lines)))
            }
            "MULTIPOLYGON" => {
                let polygons = if self.open()? { self.list(Self::polygon)? } else { Vec::new() };
                Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
            "GEOMETRYCOLLECTION" => {
                let parts = if self.open()? { self.list(Self::geometry)? } else { Vec::new() };
                Ok(Geometry::GeometryCollection(GeometryCollection::new_from(parts)))
            }
            "" => Err(self.error("Expected a geometry type")),
            _ => Err(self.error("Unsupported geometry type").with_param("type", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_and_line() {
        assert_eq!(parse_wkt("POINT (25 60)").unwrap(), Geometry::Point(Point::new(25.0, 60.0)));
        let Geometry::LineString(line) = parse_wkt(" linestring(0 0, 1.5 -2e1 )").unwrap() else {
            panic!("not a line");
        };
        assert_eq!(line.0[1], Coord { x: 1.5, y: -20.0 });
    }

    #[test]
    fn test_polygon_with_hole() {
        let wkt = "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 3 2, 3 3, 2 2))";
        let Geometry::Polygon(p) = parse_wkt(wkt).unwrap() else {
            panic!("not a polygon");
        };
        assert_eq!(p.exterior().0.len(), 5);
        assert_eq!(p.interiors().len(), 1);
    }

    #[test]
    fn test_multi_and_collections() {
        let Geometry::MultiPoint(mp) = parse_wkt("MULTIPOINT ((1 2), 3 4)").unwrap() else {
            panic!("not a multipoint");
        };
        assert_eq!(mp.0.len(), 2);
        let Geometry::MultiPolygon(mp) = parse_wkt("MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), EMPTY)").unwrap() else {
            panic!("not a multipolygon");
        };
        assert_eq!(mp.0.len(), 2);
        let Geometry::GeometryCollection(gc) = parse_wkt("GEOMETRYCOLLECTION (POINT (1 1), LINESTRING EMPTY)").unwrap()
        else {
            panic!("not a collection");
        };
        assert_eq!(gc.0.len(), 2);
    }

    #[test]
    fn test_errors() {
        assert!(parse_wkt("").is_err());
        assert!(parse_wkt("CIRCLE (0 0, 1)").is_err());
        assert!(parse_wkt("POINT (1 2 3)").is_err());
        assert!(parse_wkt("POINT (1 2").is_err());
        assert!(parse_wkt("POINT (1 2) x").is_err());
        let err = parse_wkt("LINESTRING (0 0, a 1)").unwrap_err();
        assert!(err.param("position").is_some());
    }
}
