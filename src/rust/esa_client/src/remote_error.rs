use serde::Deserialize;
use thiserror::Error;

/// Failures talking to the ESA API.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Unable to build the HTTP client: {0}")]
    Client(String),
    #[error("Request to the ESA API failed: {0}")]
    Transport(String),
    #[error("ESA API returned HTTP {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        recommend: Option<String>,
        request_id: Option<String>,
    },
}

/// Error body returned by Alibaba Cloud OpenAPI endpoints.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    request_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
    recommend: Option<String>,
}

const MAX_RAW_BODY: usize = 200;

impl RemoteError {
    /// Builds an error from a non-success HTTP response. Bodies that aren't
    /// the usual JSON error document are kept (shortened) as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => Self::Api {
                status,
                code: parsed.code.unwrap_or_else(|| "Unknown".to_string()),
                message: parsed.message.unwrap_or_default(),
                recommend: parsed.recommend.filter(|r| !r.trim().is_empty()),
                request_id: parsed.request_id,
            },
            Err(_) => Self::Api {
                status,
                code: "Unknown".to_string(),
                message: body.trim().chars().take(MAX_RAW_BODY).collect(),
                recommend: None,
                request_id: None,
            },
        }
    }

    /// Diagnostic link or hint supplied by the API, if any.
    pub fn recommend(&self) -> Option<&str> {
        match self {
            Self::Api { recommend, .. } => recommend.as_deref(),
            _ => None,
        }
    }
}
