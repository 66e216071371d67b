use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, USER_AGENT};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::BackendError;

pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Status and raw body of one exchange. Judging the status is left to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    http: HttpClient,
    user_agent: String,
    timeout: Duration,
}

impl Transport {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: HttpClient::new(),
            user_agent: config.user_agent(),
            timeout: config.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn post_json(&self, url: &str, payload: &Value) -> Result<HttpReply, BackendError> {
        log::debug!("POST {url} (timeout {:.1}s)", self.timeout.as_secs_f64());
        let request = self
            .http
            .post(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, "*/*")
            .header(ACCEPT_ENCODING, "gzip, deflate, br")
            .timeout(self.timeout)
            .json(payload);
        send(request)
    }

    pub fn get_json(&self, url: &str) -> Result<HttpReply, BackendError> {
        log::debug!("GET {url}");
        let request = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(CATALOG_TIMEOUT);
        send(request)
    }
}

fn send(request: RequestBuilder) -> Result<HttpReply, BackendError> {
    let response = request.send().map_err(classify_transport_error)?;
    let status = response.status().as_u16();
    let body = response.bytes().map_err(classify_transport_error)?.to_vec();
    Ok(HttpReply { status, body })
}

/// Connect failures win over timeouts so a connect timeout still reads as
/// "server not found".
pub fn classify_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::ServerUrlInvalid(err)
    } else if err.is_connect() {
        BackendError::ServerNotFound(err)
    } else if err.is_timeout() {
        BackendError::Timeout(err)
    } else {
        BackendError::RequestFailed(err)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use airender_contracts::errors::ErrorCode;
    use serde_json::json;

    use super::*;
    use crate::test_server::{serve, serve_silent};

    fn transport(timeout: Duration) -> Transport {
        let config = ServerConfig {
            timeout,
            host_version: "4.1.0".to_string(),
            ..ServerConfig::default()
        };
        Transport::new(&config)
    }

    #[test]
    fn post_sends_json_with_fixed_headers() -> anyhow::Result<()> {
        let server = serve(vec![(200, r#"{"images": []}"#.to_string())])?;
        let url = format!("{}/sdapi/v1/txt2img", server.base_url);

        let reply = transport(Duration::from_secs(5)).post_json(&url, &json!({"steps": 20}))?;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.json()?, json!({"images": []}));

        let requests = server.finish();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/sdapi/v1/txt2img");
        assert_eq!(request.header("user-agent"), Some("Blender/4.1.0"));
        assert_eq!(request.header("accept"), Some("*/*"));
        assert_eq!(request.header("accept-encoding"), Some("gzip, deflate, br"));
        assert_eq!(request.json()?, json!({"steps": 20}));
        Ok(())
    }

    #[test]
    fn non_success_status_is_returned_not_judged() -> anyhow::Result<()> {
        let server = serve(vec![(500, "Internal Server Error".to_string())])?;
        let reply = transport(Duration::from_secs(5))
            .post_json(&format!("{}/sdapi/v1/img2img", server.base_url), &json!({}))?;
        assert_eq!(reply.status, 500);
        assert_eq!(reply.text_lossy(), "Internal Server Error");
        server.finish();
        Ok(())
    }

    #[test]
    fn refused_connection_means_server_not_found() -> anyhow::Result<()> {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };
        let err = transport(Duration::from_secs(5))
            .post_json(&format!("http://127.0.0.1:{port}/sdapi/v1/txt2img"), &json!({}))
            .err()
            .ok_or_else(|| anyhow::anyhow!("request unexpectedly succeeded"))?;
        assert_eq!(err.code(), Some(ErrorCode::LocalServerNotFound));
        Ok(())
    }

    #[test]
    fn url_without_scheme_is_invalid() -> anyhow::Result<()> {
        for url in ["localhost:7860/sdapi/v1/txt2img", "127.0.0.1:7860/sdapi/v1/txt2img"] {
            let err = transport(Duration::from_secs(5))
                .post_json(url, &json!({}))
                .err()
                .ok_or_else(|| anyhow::anyhow!("request unexpectedly succeeded"))?;
            assert_eq!(err.code(), Some(ErrorCode::LocalServerUrlInvalid), "{url}");
        }
        Ok(())
    }

    #[test]
    fn slow_server_times_out() -> anyhow::Result<()> {
        let server = serve_silent(Duration::from_secs(2))?;
        let err = transport(Duration::from_millis(200))
            .post_json(&format!("{}/sdapi/v1/txt2img", server.base_url), &json!({}))
            .err()
            .ok_or_else(|| anyhow::anyhow!("request unexpectedly succeeded"))?;
        assert_eq!(err.code(), Some(ErrorCode::Timeout));
        Ok(())
    }

    #[test]
    fn catalog_get_asks_for_json() -> anyhow::Result<()> {
        let server = serve(vec![(200, r#"{"model_list": ["a"]}"#.to_string())])?;
        let reply = transport(Duration::from_secs(30))
            .get_json(&format!("{}/controlnet/model_list", server.base_url))?;
        assert_eq!(reply.json()?["model_list"][0], "a");

        let requests = server.finish();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].header("accept"), Some("application/json"));
        Ok(())
    }
}
