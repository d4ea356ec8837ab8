//! `GET /`, `GET /login`, `GET /setup`, `GET /app`.
//!
//! Static HTML/JS asset serving is explicitly out of core scope (spec §1);
//! these handlers are the narrow contract a real static site would fulfill
//! — a fixed placeholder body for the public pages, and the session gate
//! for `/app`.

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;

use crate::session;
use crate::state::AppState;

const LOGIN_HTML: &str = include_str!("../../static/login.html");
const SETUP_HTML: &str = include_str!("../../static/setup.html");
const APP_HTML: &str = include_str!("../../static/app.html");

pub async fn root() -> Redirect {
    Redirect::to("/login")
}

pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_HTML)
}

pub async fn setup_page() -> Html<&'static str> {
    Html(SETUP_HTML)
}

pub async fn app_page(State(state): State<AppState>, jar: CookieJar) -> Response {
    match session::resolve_flat_id(&state, &jar).await {
        Some(_) => Html(APP_HTML).into_response(),
        None => Redirect::to("/login").into_response(),
    }
}
