use axum::http::{header, HeaderMap, HeaderValue};
use cookie::{time::Duration, Cookie, SameSite};

/// Returns the value of the first cookie called `name` in the `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(value_str) = value.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(value_str) {
            let Ok(cookie) = cookie else {
                continue;
            };
            if cookie.name() == name {
                return Some(cookie.value_trimmed().to_string());
            }
        }
    }
    None
}

/// Attributes shared by every cookie this service sets.
#[derive(Debug, Clone, Copy)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub max_age_secs: Option<u64>,
}

pub fn build_cookie(name: &str, value: &str, opts: CookieOptions) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value.to_string()))
        .http_only(opts.http_only)
        .secure(opts.secure)
        .same_site(SameSite::Lax)
        .path("/");
    if let Some(secs) = opts.max_age_secs {
        builder = builder.max_age(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
    }
    builder.build()
}

/// A cookie that tells the browser to drop `name` right away.
pub fn removal_cookie(name: &str, http_only: bool, secure: bool) -> Cookie<'static> {
    build_cookie(name, "", CookieOptions { http_only, secure, max_age_secs: Some(0) })
}

pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!(cookie = cookie.name(), "Refusing to set invalid cookie: {}", e),
    }
}

/// True when the response already sets a cookie called `name`.
pub fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v).ok())
        .any(|c| c.name() == name)
}
