use reqwest::StatusCode;
use tracing::{debug, error};
use url::Url;

use crate::error::RelayError;
use crate::models::{LogUpdate, ResponseMessage};

/// Submits responses for relayed requests over the relay's HTTP API
#[derive(Clone)]
pub struct Responder {
    http: reqwest::Client,
    api_url: Url,
    key: String,
    secret: String,
}

impl Responder {
    pub fn new(
        api_url: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let api_url = Url::parse(&api_url.into())?;
        if api_url.cannot_be_a_base() {
            return Err(RelayError::InvalidUrl(format!("{} cannot be used as an API base", api_url)));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("webhookrelay-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_url,
            key: key.into(),
            secret: secret.into(),
        })
    }

    /// Submit a response, logging instead of returning any failure
    pub async fn respond(&self, response: &ResponseMessage) {
        if let Err(e) = self.try_respond(response).await {
            error!("Failed to submit webhook response: {}", e);
        }
    }

    pub async fn try_respond(&self, response: &ResponseMessage) -> Result<(), RelayError> {
        let update = LogUpdate::from_response(response)?;
        let url = self.log_url(update.id)?;

        debug!("Submitting response for log {} (status {})", update.id, update.status_code);

        let res = self
            .http
            .put(url)
            .basic_auth(&self.key, Some(&self.secret))
            .json(&update)
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(RelayError::UnexpectedStatus { status, body });
        }

        Ok(())
    }

    // `{api}/v1/logs/{id}`, with the id escaped as a single path segment
    fn log_url(&self, id: &str) -> Result<Url, RelayError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::InvalidUrl(format!("{} cannot be used as an API base", self.api_url)))?
            .pop_if_empty()
            .extend(["v1", "logs", id]);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HeaderMap, Metadata};
    use wiremock::matchers::{any, basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn responder(server: &MockServer) -> Responder {
        Responder::new(server.uri(), "key", "secret").unwrap()
    }

    #[tokio::test]
    async fn malformed_responses_make_no_http_call() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let responder = responder(&server);
        responder.respond(&ResponseMessage::default()).await;
        responder
            .respond(&ResponseMessage { status: 1, ..Default::default() })
            .await;
        responder
            .respond(&ResponseMessage { meta: Some(Metadata::default()), status: 1, ..Default::default() })
            .await;

        assert!(matches!(
            responder.try_respond(&ResponseMessage::default()).await,
            Err(RelayError::EmptyResponse)
        ));
        server.verify().await;
    }

    #[tokio::test]
    async fn puts_encoded_payload_to_log_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/logs/abc"))
            .and(basic_auth("key", "secret"))
            .and(body_json(serde_json::json!({
                "id": "abc",
                "bucket_id": "b1",
                "response_body": "aGVsbG8=",
                "status_code": 201,
                "response_headers": {"x": ["y"]}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let response = ResponseMessage {
            meta: Some(Metadata { id: "abc".into(), bucket_id: "b1".into(), ..Default::default() }),
            status: 201,
            headers: HeaderMap::from([("x".to_string(), vec!["y".to_string()])]),
            body: "hello".into(),
        };

        responder(&server).try_respond(&response).await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn log_id_stays_in_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/logs/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let response = ResponseMessage {
            meta: Some(Metadata { id: "a/b?c#d".into(), ..Default::default() }),
            status: 200,
            ..Default::default()
        };

        responder(&server).try_respond(&response).await.unwrap();
        server.verify().await;
    }

    #[test]
    fn log_url_keeps_api_prefix() {
        let responder = Responder::new("https://relay.example.com/api/", "key", "secret").unwrap();
        assert_eq!(
            responder.log_url("abc").unwrap().as_str(),
            "https://relay.example.com/api/v1/logs/abc"
        );

        assert!(matches!(
            Responder::new("not a url", "key", "secret"),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn non_ok_status_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/logs/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("error text"))
            .mount(&server)
            .await;

        let response = ResponseMessage {
            meta: Some(Metadata { id: "abc".into(), ..Default::default() }),
            status: 200,
            body: "ok".into(),
            ..Default::default()
        };
        let responder = responder(&server);

        let err = responder.try_respond(&response).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("500"), "{}", message);
        assert!(message.contains("error text"), "{}", message);

        // The public entry point swallows the failure
        responder.respond(&response).await;
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed() {
        // Nothing listens on this port once the listener is dropped
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let responder = Responder::new(format!("http://127.0.0.1:{}", port), "key", "secret").unwrap();
        let response = ResponseMessage {
            meta: Some(Metadata { id: "abc".into(), ..Default::default() }),
            status: 200,
            ..Default::default()
        };

        assert!(matches!(responder.try_respond(&response).await, Err(RelayError::Http(_))));
        responder.respond(&response).await;
    }
}
