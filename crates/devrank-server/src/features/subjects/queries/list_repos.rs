//! List subject repositories query
//!
//! Pages are cached per `(page, per_page)` and dropped together whenever the
//! subject is re-harvested.

use mediator::Request;
use serde::{Deserialize, Serialize};

use super::super::SubjectsState;
use crate::cache::repos_key;
use crate::db::{subjects, DbError};
use crate::error::AppError;
use crate::features::shared::{Paginated, PaginationParams};
use crate::models::Collection;
use devrank_common::{DevrankError, SubjectKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReposQuery {
    pub username: String,
    pub pagination: PaginationParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ListReposError {
    #[error(transparent)]
    Validation(#[from] DevrankError),
    #[error(transparent)]
    Database(#[from] DbError),
}

impl Request<Result<Paginated<Collection>, ListReposError>> for ListReposQuery {}

pub async fn handle(state: SubjectsState, query: ListReposQuery) -> Result<Paginated<Collection>, ListReposError> {
    let key = SubjectKey::parse(&query.username)?;
    let params = query.pagination;
    let cache_key = repos_key(&key, params.page(), params.per_page());

    if let Some(page) = state.cache.get::<Paginated<Collection>>(&cache_key).await {
        return Ok(page);
    }

    let subject = subjects::get_subject_by_key(&state.db, &key).await?;
    let total = subjects::count_collections(&state.db, subject.id).await?;
    let items = subjects::list_collections(&state.db, subject.id, params.per_page(), params.offset()).await?;

    let page = Paginated::from_items(items, &params, total);
    state.cache.put(&cache_key, &page).await;

    Ok(page)
}

impl From<ListReposError> for AppError {
    fn from(err: ListReposError) -> Self {
        match err {
            ListReposError::Validation(e) => AppError::from(e),
            ListReposError::Database(e) => AppError::from(e),
        }
    }
}
