use crate::error::TransitError;
use crate::models::{BusArrivalResponse, BusStopsResponse, ServiceWire, Stop};
use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

/// Records per `/BusStops` page. A shorter page marks the end of the catalog.
pub const PAGE_SIZE: usize = 500;

/// Upstream transit API. Boxed futures keep the trait object-safe so the
/// services can hold an `Arc<dyn TransitApi>`.
pub trait TransitApi: Send + Sync {
    fn fetch_stops_page(&self, skip: usize) -> BoxFuture<'_, Result<Vec<Stop>, TransitError>>;

    fn fetch_arrivals<'a>(
        &'a self,
        stop_code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ServiceWire>, TransitError>>;
}

pub struct DataMallClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl DataMallClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    // `$skip` must reach the server unescaped, so query strings are built by hand.
    async fn get_body(&self, path_and_query: &str) -> Result<String, TransitError> {
        let url = format!("{}/{}", self.base_url, path_and_query);
        let resp = self
            .http
            .get(&url)
            .header("AccountKey", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(TransitError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl TransitApi for DataMallClient {
    fn fetch_stops_page(&self, skip: usize) -> BoxFuture<'_, Result<Vec<Stop>, TransitError>> {
        Box::pin(async move {
            let body = self.get_body(&format!("BusStops?$skip={}", skip)).await?;
            let page: BusStopsResponse = serde_json::from_str(&body)?;
            debug!(skip, count = page.value.len(), "fetched stop page");
            Ok(page.value)
        })
    }

    fn fetch_arrivals<'a>(
        &'a self,
        stop_code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ServiceWire>, TransitError>> {
        Box::pin(async move {
            let body = self
                .get_body(&format!("v3/BusArrival?BusStopCode={}", stop_code))
                .await?;
            let resp: BusArrivalResponse = serde_json::from_str(&body)?;
            debug!(code = %resp.stop_code, services = resp.services.len(), "fetched arrivals");
            Ok(resp.services)
        })
    }
}
