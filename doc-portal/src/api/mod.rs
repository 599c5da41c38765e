//! JSON-over-HTTP API for the document portal.
//!
//! Document ids contain `/`, so they travel in query strings and request
//! bodies rather than in the path.

use axum::{
    extract::{FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderName, StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use doc_portal_core::auth::TokenVerifier;
use doc_portal_core::model::MIME_TYPE_KEY;
use doc_portal_core::storage::InMemoryObjectStore;
use doc_portal_core::{
    DeleteOutcome, Document, DocumentPortal, DocumentRef, FileUpload, Permission, PortalError,
    SharingResult, SignedUrls, UploadMetadata,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

pub mod error;

pub use error::{ApiError, ApiResult};

/// Caller identity extracted from request headers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                return match state.verifier.verify(token).await {
                    Some(claims) => Ok(Self {
                        user_id: claims.sub,
                        email: claims.email,
                    }),
                    None => Err(StatusCode::UNAUTHORIZED),
                };
            }
        }
        if !state.trust_user_header {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let user_id = header_str(headers, "X-User-Id").ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(Self {
            user_id,
            email: header_str(headers, "X-User-Email"),
        })
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<DocumentPortal>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Accept `X-User-Id` without a token. Development only.
    pub trust_user_header: bool,
    /// Serves `/files/...` signed URLs when the memory backend is in use.
    pub files: Option<Arc<InMemoryObjectStore>>,
}

#[derive(Deserialize)]
struct UploadParams {
    doc_type: Option<String>,
    security_level: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareRequest {
    document_id: String,
    #[serde(default)]
    recipient_ids: Vec<String>,
    #[serde(default)]
    recipient_emails: Vec<String>,
    #[serde(default)]
    permissions: Vec<Permission>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnshareRequest {
    document_id: String,
}

#[derive(Deserialize)]
struct IdParam {
    id: String,
}

#[derive(Deserialize)]
struct UrlParams {
    id: String,
    expires_in: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/documents",
            post(upload_document)
                .get(list_owned)
                .delete(delete_document),
        )
        .route("/documents/shared", get(list_shared))
        .route("/documents/share", post(share_document))
        .route("/documents/unshare", post(unshare_document))
        .route("/documents/urls", get(issue_urls))
        .route("/files/{*path}", get(open_file))
        .with_state(state)
}

async fn upload_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<DocumentRef>)> {
    let original_name = header_str(&headers, "X-File-Name").ok_or_else(|| {
        ApiError(PortalError::InvalidArgument("X-File-Name header is required".into()))
    })?;
    let mime_type = header_str(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file = FileUpload {
        original_name,
        mime_type,
        data: body,
    };
    let metadata = UploadMetadata {
        document_type: params.doc_type,
        security_level: params.security_level,
    };
    let doc = state
        .portal
        .upload_document(&auth.user_id, file, &metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn list_owned(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(state.portal.list_owned(&auth.user_id).await?))
}

async fn list_shared(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Document>>> {
    let docs = state
        .portal
        .list_shared_with_me(&auth.user_id, auth.email.as_deref())
        .await?;
    Ok(Json(docs))
}

async fn share_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ShareRequest>,
) -> ApiResult<Json<SharingResult>> {
    let result = state
        .portal
        .set_sharing(
            &req.document_id,
            &auth.user_id,
            &req.recipient_ids,
            &req.recipient_emails,
            &req.permissions,
        )
        .await?;
    Ok(Json(result))
}

async fn unshare_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UnshareRequest>,
) -> ApiResult<Json<SharingResult>> {
    let result = state
        .portal
        .remove_sharing(&req.document_id, &auth.user_id)
        .await?;
    Ok(Json(result))
}

async fn issue_urls(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<UrlParams>,
) -> ApiResult<Json<SignedUrls>> {
    let urls = state
        .portal
        .issue_urls_for(
            &params.id,
            &auth.user_id,
            auth.email.as_deref(),
            params.expires_in,
        )
        .await?;
    Ok(Json(urls))
}

async fn delete_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<IdParam>,
) -> ApiResult<Json<DeleteOutcome>> {
    let outcome = state
        .portal
        .delete_document(&params.id, &auth.user_id)
        .await?;
    Ok(Json(outcome))
}

/// Signed URLs are their own credential, no `AuthContext` here.
async fn open_file(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<([(HeaderName, String); 1], Bytes), StatusCode> {
    let files = state.files.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let signed = uri
        .path_and_query()
        .and_then(|pq| pq.as_str().strip_prefix("/files/"))
        .ok_or(StatusCode::NOT_FOUND)?;
    let (object, data) = files
        .open_signed(signed, Utc::now().timestamp())
        .ok_or(StatusCode::FORBIDDEN)?;
    let mime_type = object
        .context
        .get(MIME_TYPE_KEY)
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, mime_type)], data))
}
