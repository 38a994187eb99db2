//! Route handlers.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::cart::{format_money, Cart, PhotoId};
use crate::error::GalleryError;
use crate::fulfillment::Fulfillment;
use crate::gallery::{grant_access, has_access};

type ApiResult<T> = Result<T, ApiError>;

pub const EMPTY_CART_MESSAGE: &str = "Session expired or cart is empty.";
pub const WRONG_PASSWORD_MESSAGE: &str = "Invalid password.";
pub const ARCHIVE_FAILED_MESSAGE: &str = "Something went wrong while preparing your files.";

// ---- pages ----

pub async fn home() -> Html<String> {
    home_page(None)
}

#[derive(Deserialize)]
pub struct LoginForm {
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    match state.gallery.login(&form.password).await? {
        Some(token) => Ok(Redirect::to(&format!("/gallery/{token}")).into_response()),
        None => Ok(home_page(Some(WRONG_PASSWORD_MESSAGE)).into_response()),
    }
}

pub async fn gallery_view(
    State(state): State<AppState>,
    session: Session,
    Path(access_token): Path<String>,
) -> ApiResult<Html<String>> {
    let gallery = state.gallery.gallery_by_access_token(&access_token).await?;
    let photos = state.gallery.list_photos(&gallery).await?;
    grant_access(&session).await?;

    let items: String = photos
        .iter()
        .map(|p| {
            format!(
                r#"<figure><img src="/image/{token}" alt="Photo {id}">
                <figcaption>{price}
                <button data-add="{id}">Add to cart</button></figcaption></figure>"#,
                token = p.token,
                id = p.id,
                price = format_money(p.price),
            )
        })
        .collect();

    Ok(Html(format!(
        r#"<html>
            <body>
                <h1>{name}</h1>
                {items}
                <p><a href="/cart/summary">Cart</a></p>
            </body>
        </html>"#,
        name = escape(&gallery.name),
    )))
}

// ---- delivery ----

pub async fn image(
    State(state): State<AppState>,
    session: Session,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    if state.config.require_gallery_access && !has_access(&session).await? {
        return Err(GalleryError::AccessDenied.into());
    }
    let preview = state.gallery.preview(&token).await?;
    Ok((
        [
            (header::CONTENT_TYPE, preview.content_type),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        preview.bytes,
    )
        .into_response())
}

// ---- cart API ----

#[derive(Serialize)]
pub struct CountResponse {
    ok: bool,
    count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryItem {
    id: PhotoId,
    qty: u32,
    price: String,
    line_total: String,
    thumb_url: Option<String>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    ok: bool,
    items: Vec<SummaryItem>,
    total: String,
    count: u64,
}

pub async fn cart_add(
    State(state): State<AppState>,
    session: Session,
    Path(photo_id): Path<PhotoId>,
) -> ApiResult<Json<CountResponse>> {
    let photo = state.gallery.photo(photo_id).await?;
    let mut cart = Cart::load(&session).await?;
    cart.add(photo.id, photo.price(), 1, state.config.price_policy);
    cart.save(&session).await?;
    Ok(count_response(&cart))
}

pub async fn cart_remove(
    State(state): State<AppState>,
    session: Session,
    Path(photo_id): Path<PhotoId>,
) -> ApiResult<Json<CountResponse>> {
    let photo = state.gallery.photo(photo_id).await?;
    let mut cart = Cart::load(&session).await?;
    cart.remove(photo.id, 1);
    cart.save(&session).await?;
    Ok(count_response(&cart))
}

pub async fn cart_delete(
    session: Session,
    Path(photo_id): Path<PhotoId>,
) -> ApiResult<Json<CountResponse>> {
    let mut cart = Cart::load(&session).await?;
    if cart.delete(photo_id) {
        cart.save(&session).await?;
    }
    Ok(count_response(&cart))
}

pub async fn cart_summary(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<SummaryResponse>> {
    let cart = Cart::load(&session).await?;
    let photos = state.gallery.photos_by_ids(&cart.ids()).await?;
    let summary = cart.summary(|id| photos.contains_key(&id));

    let items = summary
        .lines
        .iter()
        .map(|line| {
            let thumb_url = photos
                .get(&line.id)
                .and_then(|p| state.gallery.mint_token(p).ok())
                .map(|token| format!("{}/image/{token}", state.config.public_base_url));
            SummaryItem {
                id: line.id,
                qty: line.qty,
                price: format_money(line.unit_price),
                line_total: format_money(line.line_total),
                thumb_url,
            }
        })
        .collect();

    Ok(Json(SummaryResponse {
        ok: true,
        items,
        total: format_money(summary.total),
        count: summary.count,
    }))
}

fn count_response(cart: &Cart) -> Json<CountResponse> {
    Json(CountResponse {
        ok: true,
        count: cart.count(),
    })
}

// ---- checkout ----

pub async fn checkout_start(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Redirect> {
    match state.pipeline.start_checkout(&session).await? {
        Some(url) => Ok(Redirect::to(&url)),
        None => Ok(Redirect::to("/")),
    }
}

#[derive(Deserialize)]
pub struct SuccessQuery {
    session_id: Option<String>,
}

pub async fn checkout_success(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<SuccessQuery>,
) -> ApiResult<Response> {
    let checkout_id = query.session_id.as_deref().filter(|s| !s.is_empty());
    let outcome = match state.pipeline.fulfill(&session, checkout_id).await {
        Ok(Fulfillment::Delivered(outcome)) => outcome,
        Ok(Fulfillment::EmptyCart) => {
            return Ok(home_page(Some(EMPTY_CART_MESSAGE)).into_response())
        }
        Ok(Fulfillment::NothingResolvable) => return Ok(Redirect::to("/").into_response()),
        Err(GalleryError::ArchiveWriteFailure(_)) => {
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                home_page(Some(ARCHIVE_FAILED_MESSAGE)),
            )
                .into_response())
        }
        Err(e) => return Err(e.into()),
    };
    info!(count = outcome.count, "order fulfilled");

    let email_line = match (&outcome.email, outcome.email_error) {
        (Some(email), false) => format!("<p>A download link was sent to {}.</p>", escape(email)),
        (Some(_), true) => "<p>We could not send the email. Use the link above.</p>".to_string(),
        (None, _) => String::new(),
    };
    Ok(Html(format!(
        r#"<html>
            <body>
                <h1>Thank you!</h1>
                <p data-count="{count}">{count} photo(s) purchased.</p>
                <p><a id="zip" href="{zip}">Download your photos</a></p>
                {email_line}
            </body>
        </html>"#,
        count = outcome.count,
        zip = escape(&outcome.zip_url),
    ))
    .into_response())
}

fn home_page(error: Option<&str>) -> Html<String> {
    let error = error
        .map(|e| format!(r#"<p class="error">{}</p>"#, escape(e)))
        .unwrap_or_default();
    Html(format!(
        r#"<html>
            <body>
                <h1>Photo galleries</h1>
                {error}
                <form action="/gallery/login" method="post">
                    <label>Password: <input type="password" name="password" required></label>
                    <button type="submit">Open gallery</button>
                </form>
            </body>
        </html>"#
    ))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape;

    #[test]
    fn escape_html() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
