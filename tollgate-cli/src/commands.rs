//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use tollgate_core::integrations::fannie_mae::{Address, PoolPrefixFilter, PoolPrefixRequest};
use tollgate_core::integrations::spotify::SearchType;
use tollgate_core::oauth::pkce::{PkceFlow, listen_for_callback};
use tollgate_core::{
    ApiClient, FannieMaeApi, GrantKind, IntegrationConfig, RequestSpec, SpotifyApi, TokenCache,
    TokenSource, TokenStore, create_store,
};
use tracing::{info, warn};

use crate::config::Config;

/// Loopback port used when the redirect URI has no port of its own.
const DEFAULT_CALLBACK_PORT: u16 = 8888;

type DynSource = Arc<dyn TokenSource>;

/// Shared state for one CLI invocation.
pub struct Context {
    config: Config,
    store: Arc<dyn TokenStore>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn TokenStore> = Arc::from(create_store(config.keyring));
        Self { config, store }
    }

    fn integration(&self, name: &str) -> Result<&IntegrationConfig> {
        self.config.integration(name)
    }

    /// Build a token cache for `name`, restoring any persisted tokens.
    async fn cache(&self, name: &str) -> Result<Arc<TokenCache<DynSource>>> {
        let integration = self.integration(name)?;
        let source = integration
            .token_source()
            .with_context(|| format!("failed to build token source for '{}'", name))?;

        let cache = integration
            .token_cache(source)
            .with_store(self.store.clone(), name);

        match cache.restore().await {
            Ok(true) => info!("Restored stored tokens for {}", name),
            Ok(false) => {}
            Err(e) => warn!("Could not restore stored tokens for {}: {}", name, e),
        }

        Ok(Arc::new(cache))
    }

    async fn client(&self, name: &str) -> Result<ApiClient<DynSource>> {
        let integration = self.integration(name)?;
        let tokens = self.cache(name).await?;
        ApiClient::new(integration.api_client_config(), tokens)
            .with_context(|| format!("failed to create API client for '{}'", name))
    }
}

pub async fn token(ctx: &Context, name: &str, show: bool) -> Result<()> {
    let cache = ctx.cache(name).await?;
    let token = cache
        .get_valid_token()
        .await
        .with_context(|| format!("failed to obtain a token for '{}'", name))?;

    println!("Token for {} valid until {}", name, token.expires_at);
    if !token.scopes.is_empty() {
        println!("  Scopes: {}", token.scopes.join(" "));
    }
    if show {
        println!("{}", token.expose());
    }
    Ok(())
}

pub async fn get(ctx: &Context, name: &str, path: &str, query: &[String]) -> Result<()> {
    let client = ctx.client(name).await?;

    let mut spec = RequestSpec::get(path);
    for pair in query {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("query parameter '{}' must look like key=value", pair);
        };
        spec = spec.query(key, value);
    }

    let body: serde_json::Value = client
        .execute_json(&spec)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    print_json(&body)
}

pub async fn authorize(ctx: &Context, name: &str, port: Option<u16>) -> Result<()> {
    let integration = ctx.integration(name)?;
    if integration.grant != GrantKind::Pkce {
        bail!(
            "integration '{}' uses the {} grant; only pkce integrations need authorization",
            name,
            integration.grant
        );
    }

    let pkce = integration.pkce_config()?;
    let port = match port {
        Some(port) => port,
        None => callback_port(&pkce.redirect_uri)?,
    };

    let request = PkceFlow::new(pkce)
        .authorization_request(integration.scopes.clone())
        .context("failed to build authorization URL")?;

    println!("Open this URL in your browser to authorize {}:", name);
    println!();
    println!("  {}", request.url);
    println!();
    println!("Waiting for the redirect on port {}...", port);

    let code = listen_for_callback(port, &request.state)
        .await
        .context("authorization was not completed")?;

    let source = integration.pkce_source()?;
    source.set_authorization(code, request.verifier);

    let cache = integration
        .token_cache(source)
        .with_store(ctx.store.clone(), name);
    let token = cache
        .get_valid_token()
        .await
        .context("failed to exchange the authorization code")?;

    println!("Authorized {}. Token valid until {}", name, token.expires_at);
    Ok(())
}

pub async fn logout(ctx: &Context, name: &str) -> Result<()> {
    let cache = ctx.cache(name).await?;
    cache
        .clear()
        .await
        .with_context(|| format!("failed to remove stored tokens for '{}'", name))?;
    println!("Logged out of {}", name);
    Ok(())
}

pub async fn income_limits(
    ctx: &Context,
    name: &str,
    fips: Option<&str>,
    address: Option<&[String]>,
) -> Result<()> {
    let api = FannieMaeApi::new(ctx.client(name).await?);

    let limits = match (fips, address) {
        (Some(fips), None) => api.income_limits_by_fips(fips).await?,
        (None, Some([number, street, city, state, zip])) => {
            let address = Address {
                number: number.clone(),
                street: street.clone(),
                city: city.clone(),
                state: state.clone(),
                zip: zip.clone(),
            };
            api.income_limits_by_address(&address).await?
        }
        (None, Some(_)) => bail!("--address takes exactly five values: NUMBER STREET CITY STATE ZIP"),
        _ => bail!("pass either --fips or --address"),
    };

    print_json(&limits)
}

pub struct PoolPrefixArgs<'a> {
    pub business_line: Option<String>,
    pub amortization_type: Option<String>,
    pub prefix: Option<String>,
    pub keyword: Option<&'a str>,
    pub multiple: &'a [String],
}

pub async fn pool_prefix(ctx: &Context, name: &str, args: PoolPrefixArgs<'_>) -> Result<()> {
    let api = FannieMaeApi::new(ctx.client(name).await?);

    if !args.multiple.is_empty() {
        let requests = args
            .multiple
            .iter()
            .map(String::as_str)
            .map(parse_pool_prefix_request)
            .collect::<Vec<_>>();
        let response = api.pool_prefixes_multiple(&requests).await?;
        return print_json(&response);
    }

    let prefixes = match args.keyword {
        Some(keyword) => api.pool_prefixes_by_keyword(keyword).await?,
        None => {
            let filter = PoolPrefixFilter {
                business_line: args.business_line,
                amortization_type: args.amortization_type,
                prefix: args.prefix,
            };
            api.pool_prefixes(&filter).await?
        }
    };

    print_json(&prefixes)
}

pub async fn spotify_profile(ctx: &Context, name: &str) -> Result<()> {
    let api = SpotifyApi::new(ctx.client(name).await?);
    let profile = api.current_user_profile().await?;
    print_json(&profile)
}

pub async fn spotify_playlists(ctx: &Context, name: &str, all: bool, limit: u32, offset: u32) -> Result<()> {
    let api = SpotifyApi::new(ctx.client(name).await?);

    if all {
        let playlists = api.all_current_user_playlists().await?;
        return print_json(&playlists);
    }

    let page = api.current_user_playlists(limit, offset).await?;
    print_json(&page)
}

pub async fn spotify_search(ctx: &Context, name: &str, query: &str, types: &str, limit: u32) -> Result<()> {
    let types = types
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.parse::<SearchType>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let api = SpotifyApi::new(ctx.client(name).await?);
    let results = api.search(query, &types, limit).await?;
    print_json(&results)
}

/// Parse `BUSINESS_LINE[:AMORTIZATION_TYPE]`.
fn parse_pool_prefix_request(entry: &str) -> PoolPrefixRequest {
    let (business_line, amortization_type) = match entry.split_once(':') {
        Some((line, amortization)) => (line, Some(amortization)),
        None => (entry, None),
    };

    let non_empty = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    PoolPrefixRequest {
        business_line: non_empty(business_line),
        amortization_type: amortization_type.and_then(non_empty),
    }
}

fn callback_port(redirect_uri: &str) -> Result<u16> {
    let url = url::Url::parse(redirect_uri)
        .with_context(|| format!("invalid redirect URI {}", redirect_uri))?;

    match url.host_str() {
        Some("127.0.0.1") | Some("localhost") | Some("[::1]") => {
            Ok(url.port_or_known_default().unwrap_or(DEFAULT_CALLBACK_PORT))
        }
        _ => bail!(
            "redirect URI {} is not a loopback address; pass --port and forward the redirect manually",
            redirect_uri
        ),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_prefix_request() {
        assert_eq!(
            parse_pool_prefix_request("SF:ARM"),
            PoolPrefixRequest {
                business_line: Some("SF".to_string()),
                amortization_type: Some("ARM".to_string()),
            }
        );
        assert_eq!(
            parse_pool_prefix_request("MF"),
            PoolPrefixRequest {
                business_line: Some("MF".to_string()),
                amortization_type: None,
            }
        );
        assert_eq!(
            parse_pool_prefix_request(":FRM"),
            PoolPrefixRequest {
                business_line: None,
                amortization_type: Some("FRM".to_string()),
            }
        );
    }

    #[test]
    fn test_callback_port() {
        assert_eq!(callback_port("http://127.0.0.1:9000/callback").unwrap(), 9000);
        assert_eq!(callback_port("http://localhost/callback").unwrap(), 80);
        assert!(callback_port("myapp://callback").is_err());
        assert!(callback_port("not a uri").is_err());
    }
}
