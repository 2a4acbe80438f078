//! Publication verification against a remote FDSNWS station service.
//!
//! The check stage asks the catalog for a station's published inventory,
//! extracts the network-level element, and compares its fingerprint to the
//! one stored at submission time. Any transport problem or malformed
//! response is reported as "unavailable", never as an error: publication
//! simply has not happened yet from the daemon's point of view.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use reqwest::Client;
use tracing::debug;

use metadata_common::{MetadataError, MetadataResult, StationKey};

use crate::config::FdsnwsConfig;

/// Read access to the remote catalog service.
#[async_trait]
pub trait PublicationVerifier: Send + Sync {
    /// Fetch the published inventory document for a station.
    ///
    /// `None` means unavailable (transport failure, non-2xx, unreadable
    /// body); the caller retries on a later cycle.
    async fn fetch_station_inventory(&self, key: &StationKey) -> Option<String>;
}

/// Production verifier querying an FDSNWS station endpoint.
pub struct FdsnwsClient {
    client: Client,
    station_url: String,
}

impl FdsnwsClient {
    pub fn new(config: &FdsnwsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            station_url: config.station_url.clone(),
        })
    }
}

#[async_trait]
impl PublicationVerifier for FdsnwsClient {
    async fn fetch_station_inventory(&self, key: &StationKey) -> Option<String> {
        let request = self.client.get(&self.station_url).query(&[
            ("network", key.network.as_str()),
            ("station", key.station.as_str()),
            ("level", "response"),
        ]);

        match request.send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                debug!(key = %key, status = %response.status(), "Catalog returned non-success status");
                None
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Catalog request failed");
                None
            }
        }
    }
}

/// Extract the serialized `<Network>` element from a StationXML document.
///
/// The returned string is the element exactly as the catalog served it,
/// which is the form fingerprints are computed over.
pub fn extract_network_element(xml: &str) -> MetadataResult<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut capturing = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| MetadataError::InvalidCatalogDocument(e.to_string()))?;

        match event {
            Event::Eof => break,
            Event::Start(e) => {
                if capturing {
                    depth += 1;
                    write_event(&mut writer, Event::Start(e))?;
                } else if e.local_name().as_ref() == b"Network" {
                    capturing = true;
                    depth = 1;
                    write_event(&mut writer, Event::Start(e))?;
                }
            }
            Event::Empty(e) => {
                if capturing {
                    write_event(&mut writer, Event::Empty(e))?;
                } else if e.local_name().as_ref() == b"Network" {
                    write_event(&mut writer, Event::Empty(e))?;
                    return into_string(writer);
                }
            }
            Event::End(e) => {
                if capturing {
                    depth -= 1;
                    write_event(&mut writer, Event::End(e))?;
                    if depth == 0 {
                        return into_string(writer);
                    }
                }
            }
            other => {
                if capturing {
                    write_event(&mut writer, other)?;
                }
            }
        }
    }

    Err(MetadataError::InvalidCatalogDocument(
        "no Network element found".to_string(),
    ))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> MetadataResult<()> {
    writer
        .write_event(event)
        .map_err(|e| MetadataError::InvalidCatalogDocument(e.to_string()))
}

fn into_string(writer: Writer<Vec<u8>>) -> MetadataResult<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| MetadataError::InvalidCatalogDocument(e.to_string()))
}
