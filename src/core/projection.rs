use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::types::{StackError, StackResult};

/// Half the equatorial circumference of the Web Mercator sphere (meters)
const HALF_EARTH: f64 = 20_037_508.342_789_244;
/// Sphere radius of the MODIS sinusoidal grid (meters)
const MODIS_SPHERE_RADIUS: f64 = 6_371_007.181;
/// Slack on domain edges, in CRS units
const DOMAIN_EPS: f64 = 1e-6;

/// Coordinate reference systems supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Crs {
    /// Longitude/latitude in degrees (EPSG:4326)
    Geographic,
    /// Spherical Web Mercator (EPSG:3857)
    WebMercator,
    /// MODIS sinusoidal grid used by the land-cover product
    Sinusoidal,
    /// WGS84 / UTM (EPSG:326xx north, 327xx south)
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// Resolve an EPSG code
    pub fn from_epsg(code: u32) -> StackResult<Self> {
        match code {
            4326 => Ok(Crs::Geographic),
            3857 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => Err(StackError::Projection(format!(
                "unsupported EPSG code {}",
                code
            ))),
        }
    }

    /// EPSG code, where one exists
    pub fn epsg(&self) -> Option<u32> {
        match *self {
            Crs::Geographic => Some(4326),
            Crs::WebMercator => Some(3857),
            Crs::Sinusoidal => None,
            Crs::Utm { zone, north: true } => Some(32600 + zone as u32),
            Crs::Utm { zone, north: false } => Some(32700 + zone as u32),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic)
    }

    /// PROJ definition of this CRS.
    ///
    /// Web Mercator is listed for reference only; transforms handle it
    /// with closed-form spherical math.
    pub fn proj_string(&self) -> String {
        match *self {
            Crs::Geographic => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            Crs::WebMercator => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 \
                                 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs"
                .to_string(),
            Crs::Sinusoidal => format!(
                "+proj=sinu +lon_0=0 +x_0=0 +y_0=0 +R={} +units=m +no_defs",
                MODIS_SPHERE_RADIUS
            ),
            Crs::Utm { zone, north } => format!(
                "+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs",
                zone,
                if north { "" } else { " +south" }
            ),
        }
    }

    /// Longitude/latitude on the same ellipsoid as [`Crs::proj_string`]
    fn lon_lat_proj_string(&self) -> String {
        match *self {
            Crs::Sinusoidal => format!("+proj=longlat +R={} +no_defs", MODIS_SPHERE_RADIUS),
            _ => Crs::Geographic.proj_string(),
        }
    }

    /// Whether (x, y) lies inside the area this CRS can represent
    fn in_domain(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        match *self {
            Crs::Geographic => x.abs() <= 180.0 && y.abs() <= 90.0,
            Crs::WebMercator => {
                x.abs() <= HALF_EARTH + DOMAIN_EPS && y.abs() <= HALF_EARTH + DOMAIN_EPS
            }
            Crs::Sinusoidal => {
                let phi = y / MODIS_SPHERE_RADIUS;
                phi.abs() <= PI / 2.0
                    && x.abs() <= MODIS_SPHERE_RADIUS * PI * phi.cos() + DOMAIN_EPS
            }
            Crs::Utm { zone, .. } => (1..=60).contains(&zone),
        }
    }

    /// Reusable transformer from this CRS to `target`
    pub fn transformer_to(&self, target: Crs) -> StackResult<CoordTransformer> {
        CoordTransformer::new(*self, target)
    }

    /// Transform a single point; `None` when outside either domain.
    ///
    /// Builds a transformer per call. Loops should use [`Crs::transformer_to`].
    pub fn transform_to(&self, target: &Crs, x: f64, y: f64) -> Option<(f64, f64)> {
        self.transformer_to(*target).ok()?.transform(x, y)
    }

    /// Like [`Crs::transform_to`], reporting failures as projection errors
    pub fn try_transform_to(&self, target: &Crs, x: f64, y: f64) -> StackResult<(f64, f64)> {
        self.transformer_to(*target)?.transform(x, y).ok_or_else(|| {
            StackError::Projection(format!(
                "({}, {}) in {} has no position in {}",
                x, y, self, target
            ))
        })
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{}", code),
            None => write!(f, "MODIS-Sinusoidal"),
        }
    }
}

#[inline]
fn merc_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / HALF_EARTH;
    let lat = (2.0 * (y * PI / HALF_EARTH).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

#[inline]
fn lon_lat_to_merc(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * HALF_EARTH / 180.0;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * HALF_EARTH / PI;
    (x, y)
}

/// How one side of a transform reaches longitude/latitude.
///
/// Each CRS keeps its own ellipsoid on this leg and the two legs meet in
/// degrees, so no datum shift is ever applied between them.
enum GeoLeg {
    LonLat,
    FastMerc,
    Proj4rs { projected: Proj, geographic: Proj },
}

impl GeoLeg {
    fn new(crs: Crs) -> StackResult<Self> {
        let build = |definition: String| {
            Proj::from_proj_string(&definition).map_err(|e| {
                StackError::Projection(format!("Invalid projection {}: {:?}", crs, e))
            })
        };
        Ok(match crs {
            Crs::Geographic => GeoLeg::LonLat,
            Crs::WebMercator => GeoLeg::FastMerc,
            Crs::Sinusoidal | Crs::Utm { .. } => GeoLeg::Proj4rs {
                projected: build(crs.proj_string())?,
                geographic: build(crs.lon_lat_proj_string())?,
            },
        })
    }

    fn to_lon_lat(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            GeoLeg::LonLat => Some((x, y)),
            GeoLeg::FastMerc => Some(merc_to_lon_lat(x, y)),
            GeoLeg::Proj4rs {
                projected,
                geographic,
            } => {
                let mut point = (x, y, 0.0);
                transform(projected, geographic, &mut point).ok()?;
                Some((point.0.to_degrees(), point.1.to_degrees()))
            }
        }
    }

    fn from_lon_lat(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !Crs::Geographic.in_domain(lon, lat) {
            return None;
        }
        match self {
            GeoLeg::LonLat => Some((lon, lat)),
            GeoLeg::FastMerc => Some(lon_lat_to_merc(lon, lat)),
            GeoLeg::Proj4rs {
                projected,
                geographic,
            } => {
                let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
                transform(geographic, projected, &mut point).ok()?;
                Some((point.0, point.1))
            }
        }
    }
}

enum TransformStrategy {
    Identity,
    ViaLonLat { inverse: GeoLeg, forward: GeoLeg },
}

/// Point transformer between two CRSs, built once per grid or extent.
///
/// Web Mercator uses closed-form math; UTM and sinusoidal go through proj4rs.
pub struct CoordTransformer {
    source: Crs,
    target: Crs,
    strategy: TransformStrategy,
}

impl std::fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    pub fn new(source: Crs, target: Crs) -> StackResult<Self> {
        let strategy = if source == target {
            TransformStrategy::Identity
        } else {
            TransformStrategy::ViaLonLat {
                inverse: GeoLeg::new(source)?,
                forward: GeoLeg::new(target)?,
            }
        };
        Ok(Self {
            source,
            target,
            strategy,
        })
    }

    pub fn source(&self) -> Crs {
        self.source
    }

    pub fn target(&self) -> Crs {
        self.target
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.strategy, TransformStrategy::Identity)
    }

    /// Transform a point; `None` when it falls outside either CRS domain
    pub fn transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !self.source.in_domain(x, y) {
            return None;
        }
        match &self.strategy {
            TransformStrategy::Identity => Some((x, y)),
            TransformStrategy::ViaLonLat { inverse, forward } => {
                let (lon, lat) = inverse.to_lon_lat(x, y)?;
                let (tx, ty) = forward.from_lon_lat(lon, lat)?;
                self.target.in_domain(tx, ty).then_some((tx, ty))
            }
        }
    }
}
