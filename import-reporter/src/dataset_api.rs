use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::error::DatasetApiError;
use crate::model::{Event, Instance, State};

const INTERNAL_TOKEN_HEADER: &str = "Internal-Token";

/// The dataset API calls the report event handler relies on.
#[async_trait]
pub trait DatasetApi: Send + Sync {
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, DatasetApiError>;
    async fn add_event_to_instance(
        &self,
        instance_id: &str,
        event: &Event,
    ) -> Result<(), DatasetApiError>;
    async fn update_instance_status(
        &self,
        instance_id: &str,
        state: &State,
    ) -> Result<(), DatasetApiError>;
}

/// HTTP client for the dataset API instances endpoints.
#[derive(Clone)]
pub struct DatasetApiClient {
    host: Url,
    client: reqwest::Client,
}

impl DatasetApiClient {
    pub fn new(
        host: &str,
        service_auth_token: &str,
        dataset_api_auth_token: &str,
        timeout: Duration,
    ) -> Result<Self, DatasetApiError> {
        if host.is_empty() {
            return Err(DatasetApiError::Validation(
                "non empty host required".to_owned(),
            ));
        }
        let base = Url::parse(host)
            .map_err(|e| DatasetApiError::Validation(format!("invalid host {host}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(DatasetApiError::Validation(format!(
                "host {host} cannot be used as a base url"
            )));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if !service_auth_token.is_empty() {
            let mut bearer = header::HeaderValue::from_str(&format!("Bearer {service_auth_token}"))
                .map_err(|_| {
                    DatasetApiError::Validation("invalid service auth token".to_owned())
                })?;
            bearer.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, bearer);
        }
        if !dataset_api_auth_token.is_empty() {
            let mut token = header::HeaderValue::from_str(dataset_api_auth_token).map_err(|_| {
                DatasetApiError::Validation("invalid dataset api auth token".to_owned())
            })?;
            token.set_sensitive(true);
            headers.insert(INTERNAL_TOKEN_HEADER, token);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("dp-import-reporter")
            .timeout(timeout)
            .build()
            .map_err(|source| DatasetApiError::Request {
                operation: "DatasetApiClient::new",
                source,
            })?;

        Ok(Self {
            host: base,
            client,
        })
    }

    /// `{host}/instances/{instance_id}` followed by `extra` segments. Every segment
    /// is percent encoded, so an instance id can never leave its own path segment.
    fn instance_url(&self, instance_id: &str, extra: &[&str]) -> Result<Url, DatasetApiError> {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|_| DatasetApiError::Validation(format!("invalid host {}", self.host)))?
            .pop_if_empty()
            .push("instances")
            .push(instance_id)
            .extend(extra);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<Response, DatasetApiError> {
        let mut request: RequestBuilder = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(operation, %method, %url, "making dataset api request");
        let response = request
            .send()
            .await
            .map_err(|source| DatasetApiError::Request { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetApiError::UnexpectedStatus {
                operation,
                url: url.to_string(),
                method,
                actual: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn require_instance_id(operation: &str, instance_id: &str) -> Result<(), DatasetApiError> {
    if instance_id.is_empty() {
        return Err(DatasetApiError::Validation(format!(
            "{operation} requires a non empty instanceID"
        )));
    }
    // Dot segments would be dropped from the path, addressing the parent resource
    if instance_id == "." || instance_id == ".." {
        return Err(DatasetApiError::Validation(format!(
            "{operation} got an invalid instanceID {instance_id}"
        )));
    }
    Ok(())
}

#[async_trait]
impl DatasetApi for DatasetApiClient {
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, DatasetApiError> {
        const OPERATION: &str = "GetInstance";
        require_instance_id(OPERATION, instance_id)?;

        let response = self
            .send(
                OPERATION,
                Method::GET,
                self.instance_url(instance_id, &[])?,
                None::<&()>,
            )
            .await?;

        let instance: Instance = response
            .json()
            .await
            .map_err(|source| DatasetApiError::Decode {
                operation: OPERATION,
                source,
            })?;

        info!(instance_id, state = %instance.state, "dataset api GetInstance completed");
        Ok(instance)
    }

    async fn add_event_to_instance(
        &self,
        instance_id: &str,
        event: &Event,
    ) -> Result<(), DatasetApiError> {
        const OPERATION: &str = "AddEventToInstance";
        require_instance_id(OPERATION, instance_id)?;

        self.send(
            OPERATION,
            Method::POST,
            self.instance_url(instance_id, &["events"])?,
            Some(event),
        )
        .await?;

        info!(instance_id, "dataset api AddEventToInstance completed");
        Ok(())
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        state: &State,
    ) -> Result<(), DatasetApiError> {
        const OPERATION: &str = "UpdateInstanceStatus";
        require_instance_id(OPERATION, instance_id)?;

        self.send(
            OPERATION,
            Method::PUT,
            self.instance_url(instance_id, &[])?,
            Some(state),
        )
        .await?;

        info!(instance_id, state = %state.state, "dataset api UpdateInstanceStatus completed");
        Ok(())
    }
}
