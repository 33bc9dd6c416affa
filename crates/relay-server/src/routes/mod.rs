// Export route modules
pub mod reply;

use crate::state::AppState;
use axum::Router;
use std::path::Path;
use tower_http::services::ServeDir;

// Function to configure all routes
pub fn configure(state: AppState, assets_dir: &Path) -> Router {
    Router::new()
        .merge(reply::routes(state))
        .nest_service("/assets", ServeDir::new(assets_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_stored_assets_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"png-bytes").unwrap();
        let app = configure(reply::tests::test_state(reply::tests::HELLO, dir.path()), dir.path());

        let response = app
            .clone()
            .oneshot(Request::get("/assets/cat.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"png-bytes");

        let response = app
            .oneshot(Request::get("/assets/dog.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
