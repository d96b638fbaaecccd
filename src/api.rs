//! HTTP side of the backend contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::Error;
use crate::model::{Photo, Settings, Snapshot};

const PHOTOS_PATH: &str = "api/photos";
const SETTINGS_PATH: &str = "api/settings";
const UPLOADS_PATH: &str = "static/uploads/";
const THUMBNAILS_PATH: &str = "static/thumbnails/";

/// Operations the frame needs from the backend.
#[async_trait]
pub trait FrameApi: Send + Sync + 'static {
    async fn fetch_photos(&self) -> Result<Vec<Photo>, Error>;

    async fn fetch_settings(&self) -> Result<Settings, Error>;

    /// Raw bytes of the original upload for `photo`.
    async fn fetch_image(&self, photo: &Photo) -> Result<Vec<u8>, Error>;

    /// Photos and settings fetched together; fails if either request fails.
    async fn fetch_snapshot(&self) -> Result<Snapshot, Error> {
        let (photos, settings) = tokio::try_join!(self.fetch_photos(), self.fetch_settings())?;
        Ok(Snapshot { photos, settings })
    }
}

/// URL layout of the backend, rooted at the configured server URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: Url) -> Self {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let base = Url::parse(raw.trim()).map_err(|e| Error::BadUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(base))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn photos(&self) -> Result<Url, Error> {
        self.join(PHOTOS_PATH)
    }

    pub fn settings(&self) -> Result<Url, Error> {
        self.join(SETTINGS_PATH)
    }

    /// Original image, with the cache-busting query when the photo has one.
    pub fn upload(&self, photo: &Photo) -> Result<Url, Error> {
        self.image_url(UPLOADS_PATH, photo)
    }

    /// Thumbnail generated by the backend. Not every photo has one.
    pub fn thumbnail(&self, photo: &Photo) -> Result<Url, Error> {
        self.image_url(THUMBNAILS_PATH, photo)
    }

    /// WebSocket URL of the push channel at `path`.
    pub fn push_channel(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.join(path.trim_start_matches('/'))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|()| Error::BadUrl {
            url: url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        Ok(url)
    }

    fn image_url(&self, prefix: &str, photo: &Photo) -> Result<Url, Error> {
        let mut url = self.join(prefix)?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| Error::BadUrl {
                url: self.base.to_string(),
                reason: "server url cannot be a base".to_string(),
            })?;
            segments.pop_if_empty();
            segments.extend(photo.filename.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query(photo.cache_buster().as_deref());
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, Error> {
        self.base.join(path).map_err(|e| Error::BadUrl {
            url: format!("{}{}", self.base, path),
            reason: e.to_string(),
        })
    }
}

/// [`FrameApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    endpoints: Endpoints,
}

impl HttpApi {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Http {
                url: endpoints.base().to_string(),
                source,
            })?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, Error> {
        let label = url.to_string();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Http {
                url: label.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url: label, status });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let label = url.to_string();
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|source| Error::Http { url: label, source })?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl FrameApi for HttpApi {
    #[instrument(skip(self))]
    async fn fetch_photos(&self) -> Result<Vec<Photo>, Error> {
        let photos: Vec<Photo> = self.get_json(self.endpoints.photos()?).await?;
        debug!(count = photos.len(), "fetched photo list");
        Ok(photos)
    }

    #[instrument(skip(self))]
    async fn fetch_settings(&self) -> Result<Settings, Error> {
        self.get_json(self.endpoints.settings()?).await
    }

    #[instrument(skip(self, photo), fields(filename = %photo.filename))]
    async fn fetch_image(&self, photo: &Photo) -> Result<Vec<u8>, Error> {
        let url = self.endpoints.upload(photo)?;
        let label = url.to_string();
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|source| Error::Http { url: label, source })?;
        debug!(bytes = bytes.len(), "fetched image");
        Ok(bytes.to_vec())
    }
}
