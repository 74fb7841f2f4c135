//! Client for the Rzeszów open-data portal's dataset catalog.

use anyhow::Result;
use chrono::DateTime;
use tracing::{debug, warn};

use crate::catalog::{CatalogApi, Resource, SourceDocument, VersionExtractor};
use crate::error::Error;
use crate::fetch::{HttpClient, fetch_bytes};

pub const DEFAULT_CATALOG_URL: &str =
    "https://otwartedane.erzeszow.pl/v1/datasets/slug_full_view/?format=json&slug=rozklady-jazdy-gtfs";

pub struct OpenDataClient<C, V> {
    url: String,
    http: C,
    extractor: V,
}

impl<C: HttpClient, V: VersionExtractor> OpenDataClient<C, V> {
    pub fn new(url: String, http: C, extractor: V) -> Self {
        Self {
            url,
            http,
            extractor,
        }
    }

    fn parse_resources(&self, body: &[u8]) -> Result<Vec<Resource>> {
        let json: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| Error::Catalog(format!("malformed catalog response: {e}")))?;

        let resources = json["resources"]
            .as_array()
            .ok_or_else(|| Error::Catalog("catalog response has no resources".to_string()))?;

        let parsed = resources
            .iter()
            .filter_map(|item| {
                let file = item["file"].as_str()?.to_string();
                Some(Resource {
                    name: item["name"].as_str().unwrap_or("").to_string(),
                    description: item["description"].as_str().unwrap_or("").to_string(),
                    file,
                    extension: item["extension"].as_str().unwrap_or("").to_string(),
                    modified: item["modified"]
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.to_utc()),
                })
            })
            .collect();

        Ok(parsed)
    }
}

impl<C: HttpClient, V: VersionExtractor> CatalogApi for OpenDataClient<C, V> {
    fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        let body = fetch_bytes(&self.http, &self.url)
            .map_err(|e| Error::Catalog(format!("catalog endpoint unreachable: {e}")))?;
        let resources = self.parse_resources(&body)?;

        let mut documents = Vec::new();
        for resource in &resources {
            if resource.extension != "zip" {
                warn!(name = %resource.name, extension = %resource.extension, "Skipping non-zip resource");
                continue;
            }
            let nominal_version = self.extractor.extract(resource)?;
            debug!(url = %resource.file, version = %nominal_version, "Catalog resource listed");
            documents.push(SourceDocument {
                url: resource.file.clone(),
                nominal_version,
                last_modified: resource.modified,
            });
        }

        if documents.is_empty() {
            return Err(Error::Catalog("catalog lists no zip schedule documents".to_string()).into());
        }
        Ok(documents)
    }
}
