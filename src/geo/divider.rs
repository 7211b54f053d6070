//! Splits a city into overlapping geo rectangles sized for the listings
//! site's zoom-12 viewport.

use crate::address_api::AddressApiClient;
use crate::error::PipelineError;

const RECTANGLE_WIDTH_KM: f64 = 17.0;
const RECTANGLE_HEIGHT_KM: f64 = 14.0;
const ZOOM_LEVEL: u8 = 12;
const OVERLAP_PERCENT: f64 = 10.0;
const KM_PER_DEGREE_LAT: f64 = 110.574;
const KM_PER_DEGREE_LON_AT_EQUATOR: f64 = 111.320;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub center_lat: f64,
    pub center_lon: f64,
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    pub zoom: u8,
}

pub struct GeoDivider {
    address_api: AddressApiClient,
    overlap_percent: f64,
}

impl GeoDivider {
    pub fn new(address_api: AddressApiClient) -> Self {
        Self {
            address_api,
            overlap_percent: OVERLAP_PERCENT,
        }
    }

    pub async fn divide_city_area(
        &self,
        city_name: &str,
        postal_code: &str,
    ) -> Result<Vec<Rectangle>, PipelineError> {
        let info = self
            .address_api
            .resolve_municipality(city_name, postal_code)
            .await?;

        let Some(info) = info else {
            // Bounding box unavailable: synthesise a square around a
            // best-effort centroid of (0, 0) is meaningless, so surface a
            // data error instead — the caller drops the city for this run.
            return Err(PipelineError::DataInvalid(format!(
                "could not resolve coordinates for {city_name} ({postal_code})"
            )));
        };

        let bounds = match info.bbox {
            Some((min_lon, min_lat, max_lon, max_lat)) => (min_lat, min_lon, max_lat, max_lon),
            None => Self::synthesize_square(info.center_lat, info.center_lon),
        };

        let (rect_width_deg, rect_height_deg) =
            Self::rectangle_dimensions_deg((bounds.0 + bounds.2) / 2.0);

        Ok(Self::divide_into_subrectangles(
            bounds,
            (rect_width_deg, rect_height_deg),
            self.overlap_percent,
        ))
    }

    /// ±1 km square around the centroid, used when the address API has no
    /// bounding box for the municipality.
    fn synthesize_square(lat: f64, lon: f64) -> (f64, f64, f64, f64) {
        let km_per_degree_lon = KM_PER_DEGREE_LON_AT_EQUATOR * lat.to_radians().cos();
        let delta_lat = 1.0 / KM_PER_DEGREE_LAT;
        let delta_lon = 1.0 / km_per_degree_lon;
        (lat - delta_lat, lon - delta_lon, lat + delta_lat, lon + delta_lon)
    }

    fn rectangle_dimensions_deg(latitude: f64) -> (f64, f64) {
        let km_per_degree_lon = KM_PER_DEGREE_LON_AT_EQUATOR * latitude.to_radians().cos();
        let width_deg = RECTANGLE_WIDTH_KM / km_per_degree_lon;
        let height_deg = RECTANGLE_HEIGHT_KM / KM_PER_DEGREE_LAT;
        (width_deg, height_deg)
    }

    fn divide_into_subrectangles(
        bounds: (f64, f64, f64, f64),
        rect_dims: (f64, f64),
        overlap_percent: f64,
    ) -> Vec<Rectangle> {
        let (min_lat, min_lon, max_lat, max_lon) = bounds;
        let (rect_width, rect_height) = rect_dims;

        let total_width = max_lon - min_lon;
        let total_height = max_lat - min_lat;

        let overlap_factor = overlap_percent / 100.0;
        let step_width = rect_width * (1.0 - overlap_factor);
        let step_height = rect_height * (1.0 - overlap_factor);

        let lon_steps = ((total_width / step_width).ceil() as i64).max(1);
        let lat_steps = ((total_height / step_height).ceil() as i64).max(1);

        if lon_steps == 1 && lat_steps == 1 {
            let center_lat = (min_lat + max_lat) / 2.0;
            let center_lon = (min_lon + max_lon) / 2.0;
            return vec![Rectangle {
                center_lat,
                center_lon,
                min_lat: center_lat - rect_height / 2.0,
                min_lon: center_lon - rect_width / 2.0,
                max_lat: center_lat + rect_height / 2.0,
                max_lon: center_lon + rect_width / 2.0,
                zoom: ZOOM_LEVEL,
            }];
        }

        let mut rectangles = Vec::with_capacity((lon_steps * lat_steps) as usize);
        for i in 0..lat_steps {
            for j in 0..lon_steps {
                let sub_min_lon = if lon_steps > 1 {
                    min_lon + (j as f64 * (total_width - rect_width) / (lon_steps - 1) as f64)
                } else {
                    min_lon
                };
                let sub_min_lat = if lat_steps > 1 {
                    min_lat + (i as f64 * (total_height - rect_height) / (lat_steps - 1) as f64)
                } else {
                    min_lat
                };
                let sub_max_lon = sub_min_lon + rect_width;
                let sub_max_lat = sub_min_lat + rect_height;
                let center_lat = (sub_min_lat + sub_max_lat) / 2.0;
                let center_lon = (sub_min_lon + sub_max_lon) / 2.0;

                rectangles.push(Rectangle {
                    center_lat,
                    center_lon,
                    min_lat: sub_min_lat,
                    min_lon: sub_min_lon,
                    max_lat: sub_max_lat,
                    max_lon: sub_max_lon,
                    zoom: ZOOM_LEVEL,
                });
            }
        }
        rectangles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rectangle_when_bbox_is_small() {
        // Bounding box smaller than one tile collapses to a single centered rectangle.
        let bounds = (48.85, 2.34, 48.86, 2.35);
        let dims = GeoDivider::rectangle_dimensions_deg(48.855);
        let rects = GeoDivider::divide_into_subrectangles(bounds, dims, OVERLAP_PERCENT);
        assert_eq!(rects.len(), 1);
        assert!((rects[0].center_lat - 48.855).abs() < 1e-6);
    }

    #[test]
    fn large_bbox_produces_grid() {
        // Paris-sized bbox should split into multiple overlapping tiles.
        let bounds = (48.80, 2.20, 48.90, 2.45);
        let dims = GeoDivider::rectangle_dimensions_deg(48.85);
        let rects = GeoDivider::divide_into_subrectangles(bounds, dims, OVERLAP_PERCENT);
        assert!(rects.len() > 1);
        for r in &rects {
            assert_eq!(r.zoom, ZOOM_LEVEL);
            assert!(r.max_lat > r.min_lat);
            assert!(r.max_lon > r.min_lon);
        }
    }

    #[test]
    fn synthesized_square_is_roughly_one_km() {
        let (min_lat, min_lon, max_lat, max_lon) = GeoDivider::synthesize_square(48.0, 2.0);
        assert!(max_lat > min_lat);
        assert!(max_lon > min_lon);
        // Roughly 2km across total (±1km each direction).
        let height_km = (max_lat - min_lat) * KM_PER_DEGREE_LAT;
        assert!((height_km - 2.0).abs() < 0.1);
    }
}
