use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Whether a coordinate pair lies on the planet at all.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

/// Axis-aligned latitude/longitude rectangle used to admit observations.
///
/// Bounds are inclusive on every side. The box is plain configuration data;
/// the default covers the whole world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::WORLD
    }
}

impl BoundingBox {
    pub const WORLD: BoundingBox = BoundingBox {
        min_lat: -90.0,
        min_lon: -180.0,
        max_lat: 90.0,
        max_lon: 180.0,
    };

    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self> {
        let bbox = Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Reject boxes that are inverted or reach outside world coordinates.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_coordinate(self.min_lat, self.min_lon)
            || !is_valid_coordinate(self.max_lat, self.max_lon)
        {
            bail!("bounding box {:?} lies outside world coordinates", self);
        }
        if self.min_lat > self.max_lat {
            bail!(
                "bounding box min_lat {} must not exceed max_lat {}",
                self.min_lat,
                self.max_lat
            );
        }
        if self.min_lon > self.max_lon {
            bail!(
                "bounding box min_lon {} must not exceed max_lon {}",
                self.min_lon,
                self.max_lon
            );
        }
        Ok(())
    }

    /// Inclusive containment test.
    ///
    /// Missing coordinates and coordinates outside the valid world range are
    /// rejected whatever the box says.
    pub fn contains(&self, latitude: Option<f64>, longitude: Option<f64>) -> bool {
        let (Some(lat), Some(lon)) = (latitude, longitude) else {
            return false;
        };
        if !is_valid_coordinate(lat, lon) {
            return false;
        }
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}
