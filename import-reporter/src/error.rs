use rdkafka::error::KafkaError;
use thiserror::Error;

/// A report event that cannot be turned into a cache key.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("cache key generation requires a non empty InstanceID")]
    MissingInstanceId,
    #[error("cache key generation requires a non empty EventType")]
    MissingEventType,
    #[error("cache key generation requires a non empty ServiceName")]
    MissingServiceName,
    #[error("failed to serialize cache entry")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("key not found in cache")]
    NotFound,
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Errors returned by a dataset API collaborator.
#[derive(Error, Debug)]
pub enum DatasetApiError {
    #[error("dataset api client validation error: {0}")]
    Validation(String),
    #[error("{operation} request failed")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} returned an incorrect response status: url: {url}, method: {method}, expected status: 2xx, actual status: {actual}")]
    UnexpectedStatus {
        operation: &'static str,
        url: String,
        method: reqwest::Method,
        actual: u16,
    },
    #[error("{operation} failed to decode the response body")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors from handling one report event. Any of these leaves the dedup cache untouched.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("error while attempting to generate cache key value for report event")]
    CacheKey(#[from] ValidationError),
    #[error("dataset api GetInstance returned an error")]
    GetInstance(#[source] DatasetApiError),
    #[error("dataset api AddEventToInstance returned an error")]
    AddEventToInstance(#[source] DatasetApiError),
    #[error("dataset api UpdateInstanceStatus returned an error")]
    UpdateInstanceStatus(#[source] DatasetApiError),
    #[error("dedup cache returned an error")]
    Cache(#[from] CacheError),
}

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("failed to parse the report event avro schema")]
    Schema(#[source] apache_avro::Error),
    #[error("error while attempting to unmarshal report event from avro")]
    Decode(#[source] apache_avro::Error),
    #[error("Handler.HandleEvent returned an error")]
    Handler(#[from] HandlerError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("kafka error")]
    Kafka(#[from] KafkaError),
    #[error("kafka consumer gone")]
    Gone,
}
