use std::sync::{Arc, OnceLock};

use actix_web::{web, HttpRequest, HttpResponse};
use regex::Regex;
use serde::Deserialize;

use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::query_params::{get_id, get_string, parse_query_params};
use crate::models::models::{Post, SortOrder};
use crate::AppState;

/// Posts over the shared document. Posts are immutable once created.
pub struct PostRepository {
    db: Arc<Db>,
}

impl PostRepository {
    pub fn new(db: Arc<Db>) -> Self {
        PostRepository { db }
    }

    pub fn create(&self, body: &str, author_id: u64) -> ApiResult<Post> {
        validate_post(body)?;
        let body = filter_post_content(body);

        let post = self.db.update(|doc| {
            let id = doc.next_post_id();
            let post = Post {
                id,
                body,
                author_id,
            };
            doc.posts.insert(id, post.clone());
            Ok::<_, ApiError>(post)
        })?;

        tracing::debug!(post_id = post.id, author_id, "post created");
        Ok(post)
    }

    pub fn get(&self, id: u64) -> ApiResult<Post> {
        self.db
            .read(|doc| doc.posts.get(&id).cloned())?
            .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", id)))
    }

    pub fn list(&self, author_id: Option<u64>, order: SortOrder) -> ApiResult<Vec<Post>> {
        let mut posts: Vec<Post> = self.db.read(|doc| {
            doc.posts
                .values()
                .filter(|p| author_id.map_or(true, |author| p.author_id == author))
                .cloned()
                .collect()
        })?;

        // Map iteration is already ascending by id
        if order == SortOrder::Descending {
            posts.reverse();
        }
        Ok(posts)
    }

    pub fn delete(&self, id: u64, requesting_account_id: u64) -> ApiResult<()> {
        self.db.update(|doc| {
            let post = doc
                .posts
                .get(&id)
                .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", id)))?;
            if post.author_id != requesting_account_id {
                return Err(ApiError::Forbidden);
            }
            doc.posts.remove(&id);
            Ok(())
        })?;

        tracing::debug!(post_id = id, "post deleted");
        Ok(())
    }
}

/// Length is checked on the body as submitted, before filtering.
pub fn validate_post(body: &str) -> ApiResult<()> {
    if body.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest("Post is too long".to_string()));
    }
    Ok(())
}

fn word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\S+").expect("Regex should compile"))
}

/// Masks whole words from the denylist, ignoring case. Separators are kept as-is.
pub fn filter_post_content(body: &str) -> String {
    word_regex()
        .replace_all(body, |caps: &regex::Captures| {
            let word = &caps[0];
            let lowered = word.to_lowercase();
            if DENYLIST.contains(&lowered.as_str()) {
                DENYLIST_MASK.to_string()
            } else {
                word.to_string()
            }
        })
        .into_owned()
}

fn parse_post_id(raw: &str) -> ApiResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| ApiError::BadRequest("Invalid post ID".to_string()))
}

// === HTTP Handlers ===

#[derive(Debug, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub body: String,
}

pub async fn create_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> ApiResult<HttpResponse> {
    let author_id = state.tokens.authenticate_request(&req)?;
    let NewPost { body } = payload.into_inner();

    let post = web::block(move || state.posts.create(&body, author_id)).await??;

    Ok(HttpResponse::Created().json(post))
}

pub async fn list_posts(req: HttpRequest, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let params = parse_query_params(req.query_string());
    let author_id = get_id(&params, "author_id");
    let order = SortOrder::parse(&get_string(&params, "sort", Some("asc")).unwrap_or_default());

    let posts = web::block(move || state.posts.list(author_id, order)).await??;

    Ok(HttpResponse::Ok().json(posts))
}

pub async fn get_post(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let id = parse_post_id(&path)?;

    let post = web::block(move || state.posts.get(id)).await??;

    Ok(HttpResponse::Ok().json(post))
}

pub async fn delete_post(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let account_id = state.tokens.authenticate_request(&req)?;
    let id = parse_post_id(&path)?;

    web::block(move || state.posts.delete(id, account_id)).await??;

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn repo() -> (TempDir, PostRepository) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Db::open(dir.path().join("db.json")).unwrap());
        (dir, PostRepository::new(db))
    }

    #[test]
    fn filter_masks_denylisted_words() {
        assert_eq!(filter_post_content("I love fornax"), "I love ****");
        assert_eq!(filter_post_content("what a KERFUFFLE"), "what a ****");
        assert_eq!(filter_post_content("Sharbert  twice"), "****  twice");
    }

    #[test]
    fn filter_only_matches_whole_words() {
        assert_eq!(filter_post_content("fornax!"), "fornax!");
        assert_eq!(filter_post_content("kerfufflesome"), "kerfufflesome");
    }

    #[test]
    fn validate_counts_characters_not_bytes() {
        assert!(validate_post(&"a".repeat(MAX_POST_LENGTH)).is_ok());
        assert!(validate_post(&"é".repeat(MAX_POST_LENGTH)).is_ok());
        assert!(matches!(
            validate_post(&"a".repeat(MAX_POST_LENGTH + 1)),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn create_stores_filtered_body() {
        let (_dir, posts) = repo();

        let post = posts.create("I love fornax", 1).unwrap();
        assert_eq!(post.id, 1);
        assert_eq!(post.body, "I love ****");
        assert_eq!(posts.get(1).unwrap(), post);
    }

    #[test]
    fn create_rejects_long_body_without_writing() {
        let (_dir, posts) = repo();

        let err = posts.create(&"x".repeat(141), 1).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(posts.list(None, SortOrder::Ascending).unwrap().is_empty());
    }

    #[test]
    fn ids_strictly_increase_across_deletes() {
        let (_dir, posts) = repo();

        let first = posts.create("one", 1).unwrap();
        let second = posts.create("two", 1).unwrap();
        posts.delete(second.id, 1).unwrap();
        let third = posts.create("three", 1).unwrap();

        assert!(first.id < second.id);
        assert!(second.id < third.id);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, posts) = repo();
        assert!(matches!(posts.get(42), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn list_filters_and_orders() {
        let (_dir, posts) = repo();
        posts.create("a", 1).unwrap();
        posts.create("b", 2).unwrap();
        posts.create("c", 1).unwrap();

        let ascending: Vec<u64> = posts
            .list(Some(1), SortOrder::Ascending)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ascending, vec![1, 3]);

        let descending: Vec<u64> = posts
            .list(None, SortOrder::Descending)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(descending, vec![3, 2, 1]);
    }

    #[test]
    fn delete_by_other_account_is_forbidden() {
        let (_dir, posts) = repo();
        let post = posts.create("mine", 1).unwrap();

        assert!(matches!(posts.delete(post.id, 2), Err(ApiError::Forbidden)));
        assert_eq!(posts.get(post.id).unwrap(), post);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (_dir, posts) = repo();
        assert!(matches!(posts.delete(9, 1), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn delete_by_author_removes_post() {
        let (_dir, posts) = repo();
        let post = posts.create("bye", 3).unwrap();

        posts.delete(post.id, 3).unwrap();
        assert!(matches!(posts.get(post.id), Err(ApiError::NotFound(_))));
    }
}
