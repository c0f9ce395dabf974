//! Coordinate Reference System types and utilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known CRS codes supported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// NSIDC Polar Stereographic North
    Epsg3413,
    /// Arctic Polar Stereographic
    Epsg3995,
    /// Antarctic Polar Stereographic
    Epsg3031,
}

impl CrsCode {
    /// Parse a CRS name.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326"
    /// - "epsg:4326"
    /// - "WGS84" and "CRS:84" (both EPSG:4326 with lon/lat axis order)
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "EPSG:4326" | "CRS:84" | "WGS84" => Ok(CrsCode::Epsg4326),
            "EPSG:3857" | "EPSG:900913" => Ok(CrsCode::Epsg3857),
            "EPSG:3413" => Ok(CrsCode::Epsg3413),
            "EPSG:3995" => Ok(CrsCode::Epsg3995),
            "EPSG:3031" => Ok(CrsCode::Epsg3031),
            _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326)
    }

    /// Polar stereographic parameters `(latitude of true scale, central meridian)`.
    pub fn polar_parameters(&self) -> Option<(f64, f64)> {
        match self {
            CrsCode::Epsg3413 => Some((70.0, -45.0)),
            CrsCode::Epsg3995 => Some((71.0, 0.0)),
            CrsCode::Epsg3031 => Some((-71.0, 0.0)),
            _ => None,
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CrsCode::Epsg4326 => "EPSG:4326",
            CrsCode::Epsg3857 => "EPSG:3857",
            CrsCode::Epsg3413 => "EPSG:3413",
            CrsCode::Epsg3995 => "EPSG:3995",
            CrsCode::Epsg3031 => "EPSG:3031",
        };
        write!(f, "{}", code)
    }
}

impl FromStr for CrsCode {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrsCode::parse(s)
    }
}

/// A CRS as written in a product: either concrete or the `"data"` sentinel
/// meaning "whatever the data grid uses".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CrsSpec {
    Data,
    Code(CrsCode),
}

impl CrsSpec {
    pub fn is_data(&self) -> bool {
        matches!(self, CrsSpec::Data)
    }

    /// The concrete code, or `None` while the sentinel is unresolved.
    pub fn code(&self) -> Option<CrsCode> {
        match self {
            CrsSpec::Data => None,
            CrsSpec::Code(code) => Some(*code),
        }
    }
}

impl FromStr for CrsSpec {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("data") {
            Ok(CrsSpec::Data)
        } else {
            CrsCode::parse(s).map(CrsSpec::Code)
        }
    }
}

impl TryFrom<String> for CrsSpec {
    type Error = CrsParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CrsSpec> for String {
    fn from(spec: CrsSpec) -> String {
        spec.to_string()
    }
}

impl fmt::Display for CrsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsSpec::Data => f.write_str("data"),
            CrsSpec::Code(code) => code.fmt(f),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),
}
