//! REST client layer shared by the vendor APIs.
//!
//! [`ServiceClient`] wraps a [`reqwest::Client`] bound to one base endpoint and
//! one token. Endpoint functions live in the per-API submodules.

pub mod scheduledbackup;
pub mod servers;

use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;

/// Header carrying the API token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Client bound to one API endpoint.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

/// The `{"result": ...}` envelope used by most list endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub result: T,
}

impl ServiceClient {
    /// Create a client for `endpoint`, authenticating with `token`.
    pub fn new(http: reqwest::Client, endpoint: &str, token: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Base endpoint without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Absolute URL of `path` under the endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// GET `url` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let body = self.send(Method::GET, url, None).await?;
        decode(&body)
    }

    /// GET `url` and decode the `result` field of the body.
    pub async fn get_result<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let envelope: Envelope<T> = self.get(url).await?;
        Ok(envelope.result)
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post<B, T>(&self, url: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self
            .send(Method::POST, url, Some(serde_json::to_value(body)?))
            .await?;
        decode(&body)
    }

    /// PATCH a JSON body and decode the JSON response.
    pub async fn patch<B, T>(&self, url: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self
            .send(Method::PATCH, url, Some(serde_json::to_value(body)?))
            .await?;
        decode(&body)
    }

    /// PUT a JSON body, ignoring the response body.
    pub async fn put<B>(&self, url: &str, body: &B) -> Result<(), ProviderError>
    where
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, url, Some(serde_json::to_value(body)?))
            .await?;
        Ok(())
    }

    /// DELETE `url`, ignoring the response body.
    pub async fn delete(&self, url: &str) -> Result<(), ProviderError> {
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<String, ProviderError> {
        debug!(%method, url, "Sending API request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        debug!(%method, url, status = status.as_u16(), "Received API response");

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        Ok(text)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    if body.trim().is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_str(body)?)
}

/// Encode query parameters, skipping empty values.
///
/// Returns an empty string when nothing is set, otherwise the query with its
/// leading `?`.
pub fn encode_query(params: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
        serializer.append_pair(key, value);
        any = true;
    }
    if any {
        format!("?{}", serializer.finish())
    } else {
        String::new()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{client, TOKEN};
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_encode_query() {
        assert_eq!(encode_query(&[]), "");
        assert_eq!(encode_query(&[("name", ""), ("volume_name", "")]), "");
        assert_eq!(encode_query(&[("name", "daily")]), "?name=daily");
        assert_eq!(
            encode_query(&[("name", "a b"), ("volume_name", "v&1")]),
            "?name=a+b&volume_name=v%261"
        );
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ServiceClient::new(reqwest::Client::new(), "http://api/v2/", "t");
        assert_eq!(client.endpoint(), "http://api/v2");
        assert_eq!(client.url("/p/plans"), "http://api/v2/p/plans");
        assert_eq!(client.url("p/plans"), "http://api/v2/p/plans");
    }

    #[tokio::test]
    async fn test_get_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(header(AUTH_TOKEN_HEADER, TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": [1, 2]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let items: Vec<u32> = client.get_result(&client.url("items")).await.unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(body_json(json!({"name": "x"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "1"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let created: Value = client
            .post(&client.url("items"), &json!({"name": "x"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "1");
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.get::<Value>(&client.url("missing")).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "got the 404 status code from the server: Not Found"
        );
    }

    #[tokio::test]
    async fn test_invalid_json_is_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"result": [invalid]}"#))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .get_result::<Vec<Value>>(&client.url("items"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_delete_ignores_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/items/1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.delete(&client.url("items/1")).await.unwrap();
    }
}
