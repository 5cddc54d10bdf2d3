use crate::startup::AppState;
use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::convert::Infallible;

pub const DEMO_HEADER: &str = "X-Demo-Mode";
pub const DEMO_COOKIE: &str = "demo_mode";

/// Whether persistence failures may be answered with canned demo data.
///
/// On when any of `?demo=true`, a `demo_mode=true` cookie, an `X-Demo-Mode: true`
/// header, or the process-wide demo setting is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoMode(pub bool);

impl DemoMode {
    pub fn is_enabled(&self) -> bool {
        self.0
    }
}

#[derive(Deserialize)]
struct DemoQuery {
    demo: Option<String>,
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn requested(parts: &Parts) -> bool {
    let by_query = Query::<DemoQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.demo)
        .is_some_and(|v| is_true(&v));

    let by_cookie = CookieJar::from_headers(&parts.headers)
        .get(DEMO_COOKIE)
        .is_some_and(|c| is_true(c.value()));

    let by_header = parts
        .headers
        .get(DEMO_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_true);

    by_query || by_cookie || by_header
}

#[async_trait]
impl FromRequestParts<AppState> for DemoMode {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(DemoMode(state.config.demo_mode || requested(parts)))
    }
}
