//! Fannie Mae public data APIs.
//!
//! Tokens come from a PingOne client-credentials endpoint and are sent raw in
//! the `x-public-access-token` header. Both list endpoints answer with either
//! a bare array or an object wrapping it (`incomeLimitsList`,
//! `poolPrefixData`); [`ResponseDecoder`] accepts both, and a record that
//! fails to decode fails the call rather than vanishing from the result.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{ApiClient, ApiError, AuthHeader, RequestSpec};
use crate::config::IntegrationConfig;
use crate::decode::ResponseDecoder;
use crate::secret::Secret;
use crate::token::TokenSource;

pub const FANNIE_MAE_BASE_URL: &str = "https://api.fanniemae.com";

pub const FANNIE_MAE_TOKEN_URL: &str =
    "https://auth.pingone.com/4c2b23f9-52b1-4f8f-aa1f-1d477590770c/as/token";

/// Header carrying the raw access token.
pub const FANNIE_MAE_AUTH_HEADER: &str = "x-public-access-token";

const INCOME_LIMITS_BY_TRACT: &str = "/v1/income-limits/censustracts";
const INCOME_LIMITS_BY_ADDRESS: &str = "/v1/income-limits/addresscheck";
const POOL_PREFIX: &str = "/v1/pool-prefix";
const POOL_PREFIX_KEYWORD: &str = "/v1/pool-prefix/keyword";
const POOL_PREFIX_MULTIPLE: &str = "/v1/pool-prefix/multiple";

pub fn auth_header() -> AuthHeader {
    AuthHeader::raw(FANNIE_MAE_AUTH_HEADER)
}

/// Integration settings for the production endpoints.
pub fn config(client_id: impl Into<String>, client_secret: impl Into<Secret>) -> IntegrationConfig {
    IntegrationConfig::client_credentials(
        FANNIE_MAE_BASE_URL,
        FANNIE_MAE_TOKEN_URL,
        client_id,
        client_secret,
    )
    .with_auth_header(auth_header())
}

/// Area median income limits for one census tract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeLimits {
    pub dts_income_limit: Option<i64>,
    pub hr_income_limit: Option<i64>,
    pub vli_income_limit: Option<i64>,
    pub rural_indicator: Option<bool>,
    pub high_needs_rural_indicator: Option<bool>,
    pub fips_code: Option<String>,
}

/// Street address for an income-limits lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub number: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

/// One MBS pool prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPrefix {
    pub prefix: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "business-line")]
    pub business_line: Option<String>,
    #[serde(rename = "amortization-type")]
    pub amortization_type: Option<String>,
}

/// Filters for `GET /v1/pool-prefix`. Empty fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolPrefixFilter {
    pub business_line: Option<String>,
    pub amortization_type: Option<String>,
    pub prefix: Option<String>,
}

/// One entry of a `POST /v1/pool-prefix/multiple` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolPrefixRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amortization_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolPrefixMultipleResponse {
    /// Indices into the request list the server could not answer.
    #[serde(default, deserialize_with = "super::nullable_vec")]
    pub incorrect_request_indices: Vec<usize>,
    #[serde(default, deserialize_with = "super::nullable_vec")]
    pub pool_prefix_data: Vec<PoolPrefix>,
}

/// Client for the Fannie Mae income-limits and pool-prefix endpoints.
#[derive(Debug)]
pub struct FannieMaeApi<S: TokenSource> {
    client: ApiClient<S>,
    income_limits: ResponseDecoder,
    pool_prefixes: ResponseDecoder,
}

impl<S: TokenSource> FannieMaeApi<S> {
    pub fn new(client: ApiClient<S>) -> Self {
        Self {
            client,
            income_limits: ResponseDecoder::new().with_wrapper("incomeLimitsList"),
            pool_prefixes: ResponseDecoder::new().with_wrapper("poolPrefixData"),
        }
    }

    pub fn client(&self) -> &ApiClient<S> {
        &self.client
    }

    /// Income limits for a census tract FIPS code.
    pub async fn income_limits_by_fips(&self, fips_code: &str) -> Result<Vec<IncomeLimits>, ApiError> {
        let fips_code = non_empty("fips_code", fips_code)?;
        let spec = RequestSpec::get(INCOME_LIMITS_BY_TRACT)
            .query("fips_code", fips_code)
            .with_auth_header(auth_header());
        self.client.execute_list(&spec, &self.income_limits).await
    }

    /// Income limits for the tract containing `address`.
    pub async fn income_limits_by_address(&self, address: &Address) -> Result<Vec<IncomeLimits>, ApiError> {
        let spec = RequestSpec::get(INCOME_LIMITS_BY_ADDRESS)
            .query("number", non_empty("number", &address.number)?)
            .query("street", non_empty("street", &address.street)?)
            .query("city", non_empty("city", &address.city)?)
            .query("state", non_empty("state", &address.state)?)
            .query("zip", non_empty("zip", &address.zip)?)
            .with_auth_header(auth_header());
        self.client.execute_list(&spec, &self.income_limits).await
    }

    /// Pool prefixes matching `filter`. An empty filter lists every prefix.
    pub async fn pool_prefixes(&self, filter: &PoolPrefixFilter) -> Result<Vec<PoolPrefix>, ApiError> {
        let spec = RequestSpec::get(POOL_PREFIX)
            .query_opt("businessLine", present(&filter.business_line))
            .query_opt("amortizationType", present(&filter.amortization_type))
            .query_opt("prefix", present(&filter.prefix))
            .with_auth_header(auth_header());
        self.client.execute_list(&spec, &self.pool_prefixes).await
    }

    /// Pool prefixes whose description matches `keyword`.
    pub async fn pool_prefixes_by_keyword(&self, keyword: &str) -> Result<Vec<PoolPrefix>, ApiError> {
        let keyword = non_empty("keyword", keyword)?;
        let spec = RequestSpec::get(POOL_PREFIX_KEYWORD)
            .query("keyword", keyword)
            .with_auth_header(auth_header());
        self.client.execute_list(&spec, &self.pool_prefixes).await
    }

    /// Look up several business-line / amortization-type combinations at once.
    pub async fn pool_prefixes_multiple(
        &self,
        requests: &[PoolPrefixRequest],
    ) -> Result<PoolPrefixMultipleResponse, ApiError> {
        if requests.is_empty() {
            return Err(ApiError::InvalidRequest(
                "at least one pool prefix request is required".to_string(),
            ));
        }

        let spec = RequestSpec::post(POOL_PREFIX_MULTIPLE)
            .json(json!({ "poolPrefixRequests": requests }))
            .with_auth_header(auth_header());
        self.client.execute_json(&spec).await
    }
}

fn non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(value)
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
