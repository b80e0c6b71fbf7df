use crate::acs3::{Acs3Request, ACS_DATE_FORMAT};
use crate::{rule_status, RemoteError, WafToggle};
use esa_config::Config;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// OpenAPI version of the ESA product.
pub const API_VERSION: &str = "2024-09-10";

/// Action that changes a WAF rule.
pub const UPDATE_WAF_RULE: &str = "UpdateWafRule";

/// Reduces whatever the user typed as an endpoint to a bare host name.
pub fn endpoint_fixup(endpoint: &str) -> String {
    let host = endpoint.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_string()
}

/// The response body, or an empty one if it couldn't be read. An error
/// status is still reported from the status code alone.
fn response_body<E: std::fmt::Debug>(endpoint: &str, body: Result<String, E>) -> String {
    match body {
        Ok(body) => body,
        Err(e) => {
            warn!("Unable to read the response body from {endpoint}: {e:?}");
            String::new()
        }
    }
}

/// Blocking ESA API client, signing every call with the configured
/// access key.
pub struct EsaClient {
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
    http: reqwest::blocking::Client,
}

impl EsaClient {
    /// Builds a client from the credentials and endpoint in `config`.
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint_fixup(&config.endpoint),
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
            http,
        })
    }

    /// Host the client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Builds the signable `UpdateWafRule` request. Split out so the date
    /// and nonce can be pinned.
    pub fn update_rule_request(
        &self,
        site_id: &str,
        rule_id: &str,
        enabled: bool,
        date: &str,
        nonce: &str,
    ) -> Acs3Request {
        Acs3Request::new("POST", &self.endpoint, UPDATE_WAF_RULE, API_VERSION, date, nonce)
            .with_query("SiteId", site_id)
            .with_query("Id", rule_id)
            .with_query("Status", rule_status(enabled))
    }
}

impl WafToggle for EsaClient {
    fn set_rule_status(
        &self,
        site_id: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        let date = chrono::Utc::now().format(ACS_DATE_FORMAT).to_string();
        let nonce = Uuid::new_v4().to_string();
        let request = self.update_rule_request(site_id, rule_id, enabled, &date, &nonce);
        let authorization = request.authorization(&self.access_key_id, &self.access_key_secret);

        let url = format!("https://{}/?{}", self.endpoint, request.canonical_query());
        debug!("POST {url}");
        let mut builder = self.http.post(&url).header("Authorization", authorization);
        for (name, value) in request.headers() {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name, value);
            }
        }

        let response = builder.send().map_err(|e| {
            error!("Unable to reach {}: {e:?}", self.endpoint);
            RemoteError::Transport(e.to_string())
        })?;
        let status = response.status();
        let body = response_body(&self.endpoint, response.text());
        if status.is_success() {
            info!(
                "Rule {rule_id} on site {site_id} set to {}",
                rule_status(enabled)
            );
            debug!("Response: {body}");
            Ok(())
        } else {
            Err(RemoteError::from_response(status.as_u16(), &body))
        }
    }
}
