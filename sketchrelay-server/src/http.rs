//! Thin helpers around the `reqwest` client shared by all pipeline stages.
//!
//! Every stage applies its own timeout per request, so a single client and its connection pool is
//! reused for scraping, registration and dispatch.

#[doc(inline)]
pub use reqwest::StatusCode;

use crate::constants::{CLIENT, ERROR_BODY_PREVIEW};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("payload too large")]
    Overflow,
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed to serialize JSON payload")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// Returns `true` if the request timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Reqwest(error) => error.is_timeout(),
            Self::Overflow | Self::Json(_) => false,
        }
    }
}

/// Creates the HTTP client used for all outgoing requests.
pub fn client() -> Result<reqwest::Client, HttpError> {
    let client = reqwest::Client::builder()
        .user_agent(CLIENT)
        .build()?;

    Ok(client)
}

pub struct Response(pub reqwest::Response);

impl Response {
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }

    /// Reads the response body up to `limit` bytes.
    pub async fn bytes(self, limit: usize) -> Result<Vec<u8>, HttpError> {
        let Self(mut response) = self;

        let mut body = Vec::with_capacity(limit.min(8192));
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) > limit {
                return Err(HttpError::Overflow);
            }

            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Returns the beginning of the response body for logging.
    ///
    /// Reading stops after [`ERROR_BODY_PREVIEW`] bytes. Read errors yield an empty preview.
    pub async fn preview(self) -> String {
        let Self(mut response) = self;

        let mut body = Vec::new();
        while body.len() < ERROR_BODY_PREVIEW {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }

        body.truncate(ERROR_BODY_PREVIEW);
        String::from_utf8_lossy(&body).into_owned()
    }
}
