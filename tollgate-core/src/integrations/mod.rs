//! Typed wrappers over specific upstream APIs.
//!
//! Each integration supplies only its endpoint paths, auth-header convention
//! and domain models; token handling, retries and decoding come from
//! [`ApiClient`](crate::ApiClient).
//!
//! - [`fannie_mae`] - income limits and MBS pool prefixes (client credentials,
//!   `x-public-access-token` header)
//! - [`spotify`] - user profile, playlists and search (PKCE, bearer header)

pub mod fannie_mae;
pub mod spotify;

pub use fannie_mae::FannieMaeApi;
pub use spotify::SpotifyApi;

use serde::{Deserialize, Deserializer};

/// Deserialize a list field that the server may send as `null`.
pub(crate) fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reject identifiers that would escape their path segment.
///
/// URL parsing treats `\` like `/` and `%2e` like `.`, and resolves `.` and
/// `..` segments against the base path, so all of these are refused.
pub(crate) fn path_segment<'a>(kind: &str, value: &'a str) -> Result<&'a str, crate::ApiError> {
    let value = value.trim();
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '?', '#', '%'])
    {
        return Err(crate::ApiError::InvalidRequest(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(value)
}
