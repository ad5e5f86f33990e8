// src/services/api_client.rs
use reqwest::{Method, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::{
    errors::{GENERIC_ERROR_MESSAGE, RiderError, RiderResult},
    models::user::{AuthTokens, RefreshResponse},
    services::token_store::TokenStore,
};

/// Routes that answer 401 for bad credentials rather than a stale token.
/// A 401 from these is returned as-is and never triggers a refresh.
const AUTH_ROUTES: [&str; 4] = [
    "auth/login",
    "auth/verify-otp",
    "auth/register",
    "auth/token/refresh",
];

/// HTTP client for the rider API.
///
/// Attaches the stored bearer token to every request. A 401 from a
/// non-auth route refreshes the access token once and replays the request.
/// Refreshes are serialized: a request that was waiting on another
/// request's refresh picks up the new token instead of refreshing again.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenStore>,
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `https://host/api/`.
    pub fn new(base_url: Url, timeout: Duration, tokens: Arc<dyn TokenStore>) -> RiderResult<Self> {
        if base_url.cannot_be_a_base() {
            return Err(RiderError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hfc-rider/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            tokens,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Builds `{base}/{segments...}/`. Segments are percent-encoded, so an
    /// id can never escape its path position.
    pub fn endpoint(&self, segments: &[&str]) -> RiderResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RiderError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
            path.push("");
        }
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, &str)]) -> RiderResult<T> {
        self.send(Method::GET, segments, query, None).await
    }

    pub async fn post<B, T>(&self, segments: &[&str], body: Option<&B>) -> RiderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        self.send(Method::POST, segments, &[], body).await
    }

    pub async fn patch<B, T>(&self, segments: &[&str], body: &B) -> RiderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.send(Method::PATCH, segments, &[], Some(body)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> RiderResult<T> {
        let mut url = self.endpoint(segments)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let route = segments.join("/");
        let is_auth_route = AUTH_ROUTES.contains(&route.as_str());

        let token = self.tokens.access_token();
        let response = self.execute(&method, &url, body.as_ref(), token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED && !is_auth_route {
            tracing::info!("Access token rejected on {} {}, refreshing", method, route);
            let fresh = self.refresh_after_unauthorized(token.as_deref()).await?;
            let retried = self.execute(&method, &url, body.as_ref(), Some(&fresh)).await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                // Still rejected with a brand-new token: the session is gone.
                self.expire_session();
                return Err(RiderError::TokenExpired);
            }
            return Self::decode(retried).await;
        }

        Self::decode(response).await
    }

    async fn execute(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> RiderResult<Response> {
        let request_id = Uuid::new_v4();
        tracing::debug!(%request_id, "{} {}", method, url.path());

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("X-Request-ID", request_id.to_string());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        tracing::debug!(%request_id, status = response.status().as_u16(), "response received");
        Ok(response)
    }

    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> RiderResult<String> {
        let _refreshing = self.refresh_lock.lock().await;

        if let Some(current) = self.tokens.access_token() {
            if stale != Some(current.as_str()) {
                tracing::debug!("Token already refreshed by a concurrent request");
                return Ok(current);
            }
        }

        let Some(refresh) = self.tokens.refresh_token() else {
            tracing::warn!("No refresh token stored, clearing session");
            self.expire_session();
            return Err(RiderError::TokenExpired);
        };

        let url = self.endpoint(&["auth", "token", "refresh"])?;
        let outcome = self.http.post(url).json(&json!({ "refresh": refresh })).send().await;

        let response = match outcome {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!("Token refresh rejected with {}", response.status());
                self.expire_session();
                return Err(RiderError::TokenExpired);
            }
            Err(err) => {
                tracing::warn!("Token refresh failed: {}", err);
                self.expire_session();
                return Err(RiderError::TokenExpired);
            }
        };

        let refreshed: RefreshResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("Unreadable token refresh response: {}", err);
                self.expire_session();
                return Err(RiderError::TokenExpired);
            }
        };

        let tokens = AuthTokens {
            access: refreshed.access,
            refresh: refreshed.refresh.unwrap_or(refresh),
        };
        self.tokens.save_tokens(&tokens)?;
        tracing::info!("Access token refreshed");
        Ok(tokens.access)
    }

    fn expire_session(&self) {
        if let Err(err) = self.tokens.clear() {
            tracing::warn!("Failed to clear stored session: {}", err);
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> RiderResult<T> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
            return serde_json::from_slice(body).map_err(RiderError::from);
        }

        let message = extract_message(&bytes);
        tracing::debug!("Request failed with {}: {}", status, message);
        Err(RiderError::from_http_status(status.as_u16(), message))
    }
}

/// `message`, then `detail`, then the generic wording.
pub fn extract_message(body: &[u8]) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    field("message")
        .or_else(|| field("detail"))
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token_store::MemoryTokenStore;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(
            Url::parse(base).unwrap(),
            Duration::from_secs(15),
            Arc::new(MemoryTokenStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_building() {
        let api = client("https://api.example.com/api/");
        assert_eq!(
            api.endpoint(&["rides", "ride-42"]).unwrap().as_str(),
            "https://api.example.com/api/rides/ride-42/"
        );
        assert_eq!(
            api.endpoint(&["rides", "ride-42", "cancel"]).unwrap().as_str(),
            "https://api.example.com/api/rides/ride-42/cancel/"
        );

        let no_slash = client("https://api.example.com/api");
        assert_eq!(
            no_slash.endpoint(&["auth", "me"]).unwrap().as_str(),
            "https://api.example.com/api/auth/me/"
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = client("https://api.example.com/api/");
        let url = api.endpoint(&["rides", "../auth/me"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/rides/..%2Fauth%2Fme/");
    }

    #[test]
    fn test_extract_message() {
        assert_eq!(extract_message(br#"{"message": "Ride cannot be cancelled"}"#), "Ride cannot be cancelled");
        assert_eq!(extract_message(br#"{"detail": "Not found."}"#), "Not found.");
        assert_eq!(extract_message(br#"{"message": "", "detail": "Throttled"}"#), "Throttled");
        assert_eq!(extract_message(b"<html>502</html>"), GENERIC_ERROR_MESSAGE);
        assert_eq!(extract_message(b""), GENERIC_ERROR_MESSAGE);
    }
}
