use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Settings;
use crate::domain::{
    AccountId, Coordinate, Encoding, ImageKey, SequenceFragment, TimeRange, Username,
};
use crate::error::RemoteError;

pub const PAGE_SIZE: u32 = 1000;
pub const THUMBNAIL_VARIANT: &str = "thumb-320.jpg";

/// The three Mapillary calls the session needs.
pub trait MapillaryClient: Send + Sync {
    /// Raw body of the user search for one username.
    fn search_users(&self, username: &Username) -> Result<Value, RemoteError>;
    fn list_sequences(
        &self,
        account: &AccountId,
        encoding: Encoding,
        window: &TimeRange,
    ) -> Result<String, RemoteError>;
    fn fetch_thumbnail(&self, key: &ImageKey) -> Result<Vec<u8>, RemoteError>;
}

#[derive(Clone)]
pub struct MapillaryHttpClient {
    client: Client,
    settings: Settings,
}

impl MapillaryHttpClient {
    pub fn new(settings: Settings) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("callisto-mapillary/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RemoteError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| RemoteError::Http(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn users_query(&self, username: &Username) -> Vec<(&'static str, String)> {
        vec![
            ("client_id", self.settings.client_id.clone()),
            ("usernames", username.as_str().to_string()),
        ]
    }

    pub fn sequences_query(
        &self,
        account: &AccountId,
        window: &TimeRange,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("userkeys", account.as_str().to_string()),
            ("client_id", self.settings.client_id.clone()),
            ("per_page", PAGE_SIZE.to_string()),
            ("start_time", window.start().format("%Y-%m-%d").to_string()),
            ("end_time", window.end().format("%Y-%m-%d").to_string()),
        ]
    }

    /// Sequences listing request, with the accept header the encoding asks for.
    pub fn sequences_request(
        &self,
        account: &AccountId,
        encoding: Encoding,
        window: &TimeRange,
    ) -> RequestBuilder {
        let request = self
            .client
            .get(self.settings.sequences_url())
            .query(&self.sequences_query(account, window));
        match encoding.accept_header() {
            Some(accept) => request.header(ACCEPT, accept),
            None => request,
        }
    }

    pub fn thumbnail_url(&self, key: &ImageKey) -> String {
        format!(
            "{}/{}/{}",
            self.settings.image_base_url.trim_end_matches('/'),
            key.as_str(),
            THUMBNAIL_VARIANT
        )
    }

    fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Http(err.to_string())
            }
        })?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, RemoteError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        tracing::warn!(status, url = %response.url(), "Mapillary request was unsuccessful");
        if status == 504 {
            return Err(RemoteError::Timeout);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "Mapillary request failed".to_string());
        Err(RemoteError::Status { status, message })
    }
}

impl MapillaryClient for MapillaryHttpClient {
    fn search_users(&self, username: &Username) -> Result<Value, RemoteError> {
        let url = self.settings.users_url();
        tracing::debug!(%url, username = %username, "searching user");
        let response = Self::send(self.client.get(&url).query(&self.users_query(username)))?;
        response
            .json()
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    fn list_sequences(
        &self,
        account: &AccountId,
        encoding: Encoding,
        window: &TimeRange,
    ) -> Result<String, RemoteError> {
        tracing::debug!(account = %account, %encoding, "listing sequences");
        let response = Self::send(self.sequences_request(account, encoding, window))?;
        response
            .text()
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    fn fetch_thumbnail(&self, key: &ImageKey) -> Result<Vec<u8>, RemoteError> {
        let url = self.thumbnail_url(key);
        tracing::debug!(%url, "downloading thumbnail");
        let response = Self::send(self.client.get(&url))?;
        let bytes = response
            .bytes()
            .map_err(|err| RemoteError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    properties: FeatureProperties,
    geometry: Geometry,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties {
    coordinate_properties: CoordinateProperties,
}

#[derive(Deserialize)]
struct CoordinateProperties {
    image_keys: Vec<String>,
}

#[derive(Deserialize)]
struct Geometry {
    coordinates: Vec<Coordinate>,
}

/// Decodes the fragments of a structured sequences document, in document order.
pub fn decode_fragments(body: &str) -> Result<Vec<SequenceFragment>, String> {
    let collection: FeatureCollection =
        serde_json::from_str(body).map_err(|err| err.to_string())?;
    Ok(collection
        .features
        .into_iter()
        .map(|feature| SequenceFragment {
            image_keys: feature.properties.coordinate_properties.image_keys,
            coordinates: feature.geometry.coordinates,
        })
        .collect())
}
