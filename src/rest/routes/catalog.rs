//! Step plan catalog endpoints.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::rest::dto::{CatalogClassResponse, SearchHitResponse, SearchQuery};
use crate::rest::state::ApiState;

/// List incident classes, their types and step plans
#[utoipa::path(
    get,
    path = "/api/v1/catalog",
    tag = "Catalog",
    responses(
        (status = 200, description = "All incident classes", body = Vec<CatalogClassResponse>)
    )
)]
pub async fn list(State(state): State<ApiState>) -> Json<Vec<CatalogClassResponse>> {
    let engine = state.engine.lock().await;
    let classes = engine
        .catalog()
        .classes()
        .iter()
        .map(CatalogClassResponse::from)
        .collect();
    Json(classes)
}

/// Case-insensitive substring search over the catalog
#[utoipa::path(
    get,
    path = "/api/v1/catalog/search",
    tag = "Catalog",
    params(
        ("q" = String, Query, description = "Text to look for in classes, types, steps and sub-steps")
    ),
    responses(
        (status = 200, description = "Matches, empty for a blank query", body = Vec<SearchHitResponse>)
    )
)]
pub async fn search(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<SearchHitResponse>> {
    let engine = state.engine.lock().await;
    Json(
        engine
            .search(&query.q)
            .into_iter()
            .map(SearchHitResponse::from)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::state::test_state;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(temp_dir.path());

        let resp = list(State(state)).await;
        let fraud = resp.iter().find(|c| c.class == "Fraud").unwrap();
        let phishing = fraud.types.iter().find(|t| t.name == "Phishing").unwrap();
        assert_eq!(phishing.steps[0].index, 1);
        assert_eq!(phishing.steps[0].title, "Analyse the message");
    }

    #[tokio::test]
    async fn test_search_matches_sub_steps() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(temp_dir.path());

        let resp = search(
            State(state),
            Query(SearchQuery {
                q: "SANDBOX".to_string(),
            }),
        )
        .await;
        assert!(resp
            .iter()
            .any(|hit| hit.kind == "sub_step" && hit.class == "Fraud"));
    }

    #[tokio::test]
    async fn test_blank_search_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(temp_dir.path());

        let resp = search(
            State(state),
            Query(SearchQuery {
                q: "   ".to_string(),
            }),
        )
        .await;
        assert!(resp.is_empty());
    }
}
