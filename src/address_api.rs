//! Client for the national address API (api-adresse.data.gouv.fr), used by
//! the geo divider, the city resolver, and the
//! geocoder.

use crate::error::PipelineError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AddressApiClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct MunicipalityInfo {
    pub center_lat: f64,
    pub center_lon: f64,
    pub bbox: Option<(f64, f64, f64, f64)>, // (min_lon, min_lat, max_lon, max_lat)
    pub citycode: Option<String>,
    pub postcode: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GeocodeResult {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub result_label: Option<String>,
    pub result_score: Option<f64>,
    pub result_postcode: Option<String>,
    pub result_citycode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    features: Vec<SearchFeature>,
}

#[derive(Debug, Deserialize)]
struct SearchFeature {
    geometry: SearchGeometry,
    properties: SearchProperties,
}

#[derive(Debug, Deserialize)]
struct SearchGeometry {
    coordinates: (f64, f64), // [lon, lat]
}

#[derive(Debug, Deserialize)]
struct SearchProperties {
    citycode: Option<String>,
    postcode: Option<String>,
    #[serde(default)]
    bbox: Option<(f64, f64, f64, f64)>,
    /// `"<dept code>, <dept name>, <region name>"`, e.g. `"75, Paris, Île-de-France"`.
    #[serde(default)]
    context: Option<String>,
}

/// Pulls the region name out of the API's `"dept, dept_name, region"` context
/// string — the only place this API surfaces a region at all.
fn region_from_context(context: &Option<String>) -> Option<String> {
    context
        .as_deref()
        .and_then(|c| c.split(',').nth(2))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Raw row shape returned by the `/search/csv/` endpoint; column names are
/// part of the external contract.
#[derive(Debug, Deserialize)]
struct CsvGeocodeRow {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    result_label: Option<String>,
    #[serde(default)]
    result_score: Option<f64>,
    #[serde(default)]
    result_postcode: Option<String>,
    #[serde(default)]
    result_citycode: Option<String>,
}

impl AddressApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
        }
    }

    pub fn default_client() -> Self {
        Self::new("https://api-adresse.data.gouv.fr")
    }

    /// Resolves a municipality's centroid and bounding box.
    pub async fn resolve_municipality(
        &self,
        city_name: &str,
        postal_code: &str,
    ) -> Result<Option<MunicipalityInfo>, PipelineError> {
        let url = format!("{}/search/", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("q", format!("{city_name} {postal_code}")),
                ("limit", "1".to_string()),
                ("type", "municipality".to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PipelineError::Transient(format!(
                "address API search failed: {}",
                resp.status()
            )));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let Some(feature) = parsed.features.into_iter().next() else {
            return Ok(None);
        };

        let (lon, lat) = feature.geometry.coordinates;
        let region = region_from_context(&feature.properties.context);
        Ok(Some(MunicipalityInfo {
            center_lat: lat,
            center_lon: lon,
            bbox: feature.properties.bbox,
            citycode: feature.properties.citycode,
            postcode: feature.properties.postcode,
            region,
        }))
    }

    /// Batch CSV geocoding.
    /// `queries` become the `q` column of the uploaded CSV; order of the
    /// response is expected to match the order of the request by the
    /// upstream API's contract.
    pub async fn geocode_csv(
        &self,
        queries: &[String],
    ) -> Result<Vec<GeocodeResult>, PipelineError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(["q"])
            .map_err(|e| PipelineError::DataInvalid(e.to_string()))?;
        for q in queries {
            writer
                .write_record([q])
                .map_err(|e| PipelineError::DataInvalid(e.to_string()))?;
        }
        let csv_bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::DataInvalid(e.to_string()))?;

        let part = reqwest::multipart::Part::bytes(csv_bytes)
            .file_name("data.csv")
            .mime_str("text/csv")
            .map_err(|e| PipelineError::Transient(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("data", part);

        let url = format!("{}/search/csv/", self.base_url);
        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(PipelineError::Transient(format!(
                "address API CSV geocode failed: {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(body.as_bytes());

        let mut results = Vec::with_capacity(queries.len());
        for record in reader.deserialize::<CsvGeocodeRow>() {
            let row = record.map_err(|e| PipelineError::DataInvalid(e.to_string()))?;
            results.push(GeocodeResult {
                latitude: row.latitude,
                longitude: row.longitude,
                result_label: row.result_label,
                result_score: row.result_score,
                result_postcode: row.result_postcode,
                result_citycode: row.result_citycode,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_from_context_string() {
        let context = Some("75, Paris, Île-de-France".to_string());
        assert_eq!(region_from_context(&context), Some("Île-de-France".to_string()));
    }

    #[test]
    fn region_is_none_without_context() {
        assert_eq!(region_from_context(&None), None);
    }
}
