//! Alibaba Cloud ESA client: just enough of the OpenAPI to switch a WAF
//! rule on and off.

mod acs3;
mod remote_error;
mod rest;

pub use acs3::{hex_hmac_sha256, hex_sha256, percent_encode, Acs3Request, ACS_DATE_FORMAT, ALGORITHM};
pub use remote_error::RemoteError;
pub use rest::{endpoint_fixup, EsaClient, API_VERSION, UPDATE_WAF_RULE};

/// The one remote operation the shield controller needs.
pub trait WafToggle {
    /// Sets the status of WAF rule `rule_id` on site `site_id` to `on`
    /// (`enabled == true`) or `off`. A single attempt, no retries.
    fn set_rule_status(&self, site_id: &str, rule_id: &str, enabled: bool)
        -> Result<(), RemoteError>;
}

impl<T: WafToggle + ?Sized> WafToggle for &T {
    fn set_rule_status(
        &self,
        site_id: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        (**self).set_rule_status(site_id, rule_id, enabled)
    }
}

/// The API's spelling of a rule status.
pub fn rule_status(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
