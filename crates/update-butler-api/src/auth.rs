//! Publish authentication
//!
//! Publishing and deprecation require a bearer token listed in the server
//! configuration. Tokens are held and compared only as SHA-256 digests.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};
use update_butler_core::Checksum;

use crate::error::ApiError;

/// Identity of an authenticated publisher, stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    /// Short, non-secret identifier derived from the token digest
    pub token_id: String,
}

impl Publisher {
    /// Actor name recorded on release events
    pub fn actor(&self) -> String {
        format!("token:{}", self.token_id)
    }
}

/// Authentication state holding the accepted token digests
#[derive(Clone)]
pub struct PublishAuth {
    digests: Arc<Vec<Checksum>>,
}

impl PublishAuth {
    /// Accept the given plaintext tokens
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = tokens
            .into_iter()
            .filter(|t| !t.as_ref().is_empty())
            .map(|t| Checksum::compute(t.as_ref().as_bytes()))
            .collect();

        Self {
            digests: Arc::new(digests),
        }
    }

    /// Number of configured tokens
    pub fn token_count(&self) -> usize {
        self.digests.len()
    }

    /// Check a presented token
    pub fn authenticate(&self, token: &str) -> Option<Publisher> {
        let presented = Checksum::compute(token.as_bytes());
        self.digests
            .iter()
            .find(|digest| **digest == presented)
            .map(|digest| Publisher {
                token_id: digest.as_str()[..8].to_string(),
            })
    }
}

impl std::fmt::Debug for PublishAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishAuth")
            .field("tokens", &self.digests.len())
            .finish()
    }
}

/// Extract the token from a `Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Required publish authentication middleware
///
/// Rejects the request with 401 unless it carries a configured bearer token.
/// On success a [`Publisher`] is added to the request extensions.
pub async fn require_publish_token(
    State(auth): State<PublishAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = bearer_token(header).ok_or(AuthError::InvalidToken)?;

    let publisher = match auth.authenticate(token) {
        Some(publisher) => publisher,
        None => {
            warn!(path = %request.uri().path(), "Rejected publish token");
            return Err(AuthError::InvalidToken);
        }
    };

    debug!(token_id = %publisher.token_id, "Publisher authenticated");
    request.extensions_mut().insert(publisher);

    Ok(next.run(request).await)
}

/// Both variants answer 401 `UNAUTHORIZED`
#[derive(Debug)]
pub enum AuthError {
    /// No `Authorization` header
    MissingToken,

    /// Not a bearer token, or its digest matches no configured token
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::unauthorized(self.to_string()).into_response()
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing publish token"),
            AuthError::InvalidToken => write!(f, "Invalid publish token"),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::Extension,
        http::{Request, StatusCode},
        middleware,
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    async fn protected_handler(Extension(publisher): Extension<Publisher>) -> String {
        publisher.actor()
    }

    fn app() -> Router {
        Router::new()
            .route("/publish", post(protected_handler))
            .layer(middleware::from_fn_with_state(
                PublishAuth::new(["tok-1", "tok-2"]),
                require_publish_token,
            ))
    }

    fn request(header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/publish");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn test_authenticate() {
        let auth = PublishAuth::new(["tok-1", ""]);
        assert_eq!(auth.token_count(), 1);

        let publisher = auth.authenticate("tok-1").unwrap();
        assert_eq!(publisher.token_id.len(), 8);
        assert!(auth.authenticate("tok-2").is_none());
        assert!(!format!("{:?}", auth).contains("tok-1"));
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let response = app().oneshot(request(Some("Bearer tok-2"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_token_rejected() {
        let response = app().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app().oneshot(request(Some("Bearer nope"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app().oneshot(request(Some("tok-1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_configured_tokens_rejects_everything() {
        let app = Router::new()
            .route("/publish", post(protected_handler))
            .layer(middleware::from_fn_with_state(
                PublishAuth::new(Vec::<String>::new()),
                require_publish_token,
            ));

        let response = app.oneshot(request(Some("Bearer anything"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
