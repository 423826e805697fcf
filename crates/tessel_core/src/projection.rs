//! Coordinate reference systems and point conversion.
//!
//! CRSs are identified as `EPSG:<code>`; `EPSG:0` is the abstract sentinel
//! used for unit-square geometry with no projection at all. Conversions go
//! through `proj4rs` using a static table of proj4 definitions.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use proj4rs::proj::Proj;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::context::ConfigError;
use crate::math::DVec2;

/// Lowest and highest EPSG codes accepted for real coordinate systems.
pub const EPSG_CODE_RANGE: std::ops::RangeInclusive<u32> = 1024..=32767;

static EPSG_DEFINITIONS: Lazy<FxHashMap<u32, &'static str>> = Lazy::new(|| {
    let mut table = FxHashMap::default();
    table.insert(4326, "+proj=longlat +datum=WGS84 +no_defs");
    table.insert(
        3857,
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
    );
    table.insert(
        2326,
        "+proj=tmerc +lat_0=22.3121333333333 +lon_0=114.178555555556 +k=1 +x_0=836694.05 +y_0=819069.8 \
         +ellps=intl +towgs84=-162.619,-276.959,-161.764,0.067753,-2.243649,-1.158827,-1.094246 +units=m +no_defs",
    );
    table.insert(
        2433,
        "+proj=tmerc +lat_0=0 +lon_0=114 +k=1 +x_0=500000 +y_0=0 \
         +ellps=intl +towgs84=-162.619,-276.959,-161.764,0.067753,-2.24365,-1.15883,-1.09425 +units=m +no_defs",
    );
    table
});

/// proj4 definition registered for an EPSG code.
pub fn definition(code: u32) -> Option<&'static str> {
    EPSG_DEFINITIONS.get(&code).copied()
}

/// Errors raised by projection setup or a single point conversion.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("no projection definition registered for {0}")]
    UnknownCrs(Crs),

    #[error("cannot convert between abstract space and {0}")]
    AbstractMismatch(Crs),

    #[error("invalid projection definition for {crs}: {message}")]
    Definition { crs: Crs, message: String },

    #[error("conversion {from} -> {to} failed: {message}")]
    Transform { from: Crs, to: Crs, message: String },

    #[error("conversion {from} -> {to} produced a non-finite coordinate")]
    NonFinite { from: Crs, to: Crs },
}

/// Coordinate reference system identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// `EPSG:0`: unit-square geometry, never projected.
    Abstract,
    Epsg(u32),
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);
    pub const WEB_MERCATOR: Crs = Crs::Epsg(3857);

    /// Builds a CRS from a bare EPSG code; 0 is the abstract sentinel.
    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        if code == 0 {
            Ok(Crs::Abstract)
        } else if EPSG_CODE_RANGE.contains(&code) {
            Ok(Crs::Epsg(code))
        } else {
            Err(ConfigError::EpsgOutOfRange { code })
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Crs::Abstract => 0,
            Crs::Epsg(code) => *code,
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, Crs::Abstract)
    }

    /// Whether coordinates in this CRS are longitude/latitude degrees.
    pub fn is_geographic(&self) -> bool {
        match self {
            Crs::Abstract => false,
            Crs::Epsg(code) => definition(*code).map_or(false, is_longlat),
        }
    }

    pub fn definition(&self) -> Option<&'static str> {
        match self {
            Crs::Abstract => None,
            Crs::Epsg(code) => definition(*code),
        }
    }
}

fn is_longlat(definition: &str) -> bool {
    definition.contains("+proj=longlat") || definition.contains("+proj=latlong")
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code())
    }
}

impl FromStr for Crs {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s
            .trim()
            .strip_prefix("EPSG:")
            .and_then(|code| code.parse::<u32>().ok())
            .ok_or_else(|| ConfigError::InvalidCrs { value: s.to_string() })?;
        Crs::from_code(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

/// Outcome of a point conversion that never fails outright.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Exact(DVec2),
    /// The conversion failed; the input coordinate is returned unchanged.
    Degraded(DVec2),
}

impl Conversion {
    pub fn point(self) -> DVec2 {
        match self {
            Conversion::Exact(p) | Conversion::Degraded(p) => p,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Conversion::Degraded(_))
    }
}

struct Endpoint {
    proj: Proj,
    geographic: bool,
}

impl Endpoint {
    fn new(crs: Crs) -> Result<Self, ProjectionError> {
        let definition = crs.definition().ok_or(ProjectionError::UnknownCrs(crs))?;
        let proj = Proj::from_proj_string(definition).map_err(|e| ProjectionError::Definition {
            crs,
            message: e.to_string(),
        })?;
        Ok(Self {
            proj,
            geographic: is_longlat(definition),
        })
    }
}

/// One-directional converter between two CRSs.
pub struct Projector {
    from: Crs,
    to: Crs,
    // None when `from == to`
    endpoints: Option<(Endpoint, Endpoint)>,
}

impl Projector {
    pub fn new(from: Crs, to: Crs) -> Result<Self, ProjectionError> {
        if from == to {
            return Ok(Self {
                from,
                to,
                endpoints: None,
            });
        }
        if from.is_abstract() {
            return Err(ProjectionError::AbstractMismatch(to));
        }
        if to.is_abstract() {
            return Err(ProjectionError::AbstractMismatch(from));
        }
        Ok(Self {
            from,
            to,
            endpoints: Some((Endpoint::new(from)?, Endpoint::new(to)?)),
        })
    }

    pub fn from_crs(&self) -> Crs {
        self.from
    }

    pub fn to_crs(&self) -> Crs {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.endpoints.is_none()
    }

    /// Converts one point, geographic coordinates in degrees.
    pub fn forward(&self, point: DVec2) -> Result<DVec2, ProjectionError> {
        let Some((src, dst)) = &self.endpoints else {
            return Ok(point);
        };

        let mut xyz = if src.geographic {
            (point.x.to_radians(), point.y.to_radians(), 0.0)
        } else {
            (point.x, point.y, 0.0)
        };
        proj4rs::transform::transform(&src.proj, &dst.proj, &mut xyz).map_err(|e| {
            ProjectionError::Transform {
                from: self.from,
                to: self.to,
                message: e.to_string(),
            }
        })?;

        let out = if dst.geographic {
            DVec2::new(xyz.0.to_degrees(), xyz.1.to_degrees())
        } else {
            DVec2::new(xyz.0, xyz.1)
        };
        if out.is_finite() {
            Ok(out)
        } else {
            Err(ProjectionError::NonFinite {
                from: self.from,
                to: self.to,
            })
        }
    }

    /// Like [`forward`](Self::forward) but falls back to the input point.
    pub fn convert(&self, point: DVec2) -> Conversion {
        match self.forward(point) {
            Ok(p) => Conversion::Exact(p),
            Err(error) => {
                warn!(%error, x = point.x, y = point.y, "projection failed, keeping source coordinate");
                Conversion::Degraded(point)
            }
        }
    }
}

/// Converter whose setup failure is deferred to each conversion, so every
/// point degrades instead of the whole operation failing.
pub struct PointConverter {
    inner: Result<Projector, ProjectionError>,
}

impl PointConverter {
    pub fn new(from: Crs, to: Crs) -> Self {
        let inner = Projector::new(from, to);
        if let Err(error) = &inner {
            warn!(%error, %from, %to, "projection unavailable, coordinates will pass through");
        }
        Self { inner }
    }

    pub fn is_identity(&self) -> bool {
        matches!(&self.inner, Ok(p) if p.is_identity())
    }

    pub fn convert(&self, point: DVec2) -> Conversion {
        match &self.inner {
            Ok(projector) => projector.convert(point),
            Err(_) => Conversion::Degraded(point),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_crs() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("EPSG:0".parse::<Crs>().unwrap(), Crs::Abstract);
        assert_eq!(Crs::Epsg(2326).to_string(), "EPSG:2326");
        assert!(matches!("EPSG:12".parse::<Crs>(), Err(ConfigError::EpsgOutOfRange { code: 12 })));
        assert!(matches!("4326".parse::<Crs>(), Err(ConfigError::InvalidCrs { .. })));
    }

    #[test]
    fn geographic_detection() {
        assert!(Crs::WGS84.is_geographic());
        assert!(!Crs::WEB_MERCATOR.is_geographic());
        assert!(!Crs::Epsg(2326).is_geographic());
        assert!(!Crs::Abstract.is_geographic());
    }

    #[test]
    fn identity_projection_is_exact() {
        let projector = Projector::new(Crs::Epsg(2326), Crs::Epsg(2326)).unwrap();
        assert!(projector.is_identity());
        let p = DVec2::new(836_694.05, 819_069.8);
        assert_eq!(projector.forward(p).unwrap(), p);
    }

    #[test]
    fn wgs84_to_web_mercator() {
        let projector = Projector::new(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        let origin = projector.forward(DVec2::ZERO).unwrap();
        assert!(origin.length() < 1e-6);

        let p = projector.forward(DVec2::new(180.0, 0.0)).unwrap();
        assert!((p.x - 20_037_508.342789244).abs() < 1e-3);

        let back = Projector::new(Crs::WEB_MERCATOR, Crs::WGS84)
            .unwrap()
            .forward(DVec2::new(1_000_000.0, 2_000_000.0))
            .unwrap();
        let again = projector.forward(back).unwrap();
        assert!((again - DVec2::new(1_000_000.0, 2_000_000.0)).length() < 1e-4);
    }

    #[test]
    fn unknown_crs_degrades() {
        assert!(matches!(
            Projector::new(Crs::Epsg(5000), Crs::WGS84),
            Err(ProjectionError::UnknownCrs(Crs::Epsg(5000)))
        ));
        let converter = PointConverter::new(Crs::Epsg(5000), Crs::WGS84);
        let p = DVec2::new(1.0, 2.0);
        assert_eq!(converter.convert(p), Conversion::Degraded(p));
        assert!(PointConverter::new(Crs::Abstract, Crs::WGS84).convert(p).is_degraded());
    }
}
