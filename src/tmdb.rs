use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::filters::SortKey;
use crate::models::{Genre, GenreList, MovieDetails, MovieListResponse, MoviePage};

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// Poster size used by cards and the movie page.
pub const POSTER_SIZE: &str = "w500";

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    language: String,
    base_url: String,
}

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn popular(&self, page: u32, sort: SortKey) -> Result<MoviePage>;
    async fn top_rated(&self, page: u32) -> Result<MoviePage>;
    async fn by_genre(&self, genre_id: i64, page: u32) -> Result<MoviePage>;
    async fn by_year(&self, year: i32, page: u32) -> Result<MoviePage>;
    async fn by_rating(&self, min: f64, max: f64, page: u32) -> Result<MoviePage>;
    async fn search(&self, query: &str, page: u32) -> Result<MoviePage>;
    async fn details(&self, movie_id: i64) -> Result<MovieDetails>;
    async fn similar(&self, movie_id: i64) -> Result<MoviePage>;
    async fn genre_list(&self) -> Result<Vec<Genre>>;
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, language: impl Into<String>) -> Result<Self> {
        let user_agent = format!("cinedeck/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            language: language.into(),
            base_url: TMDB_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!(
            "{}{path}?api_key={}&language={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.language)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("TMDB request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading TMDB body failed")?;
        if !status.is_success() {
            return Err(anyhow!("TMDB HTTP error (status {}): {}", status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("TMDB JSON parse failed")?;
        Ok(parsed)
    }

    async fn get_page(&self, path: &str, params: &[(&str, String)]) -> Result<MoviePage> {
        let url = self.url(path, params);
        debug!(path, "TMDB list request");
        let data: MovieListResponse = self.get_json(&url).await?;
        Ok(data.into_page())
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn popular(&self, page: u32, sort: SortKey) -> Result<MoviePage> {
        self.get_page(
            "/movie/popular",
            &[("page", page.to_string()), ("sort_by", sort.to_string())],
        )
        .await
    }

    async fn top_rated(&self, page: u32) -> Result<MoviePage> {
        self.get_page("/movie/top_rated", &[("page", page.to_string())])
            .await
    }

    async fn by_genre(&self, genre_id: i64, page: u32) -> Result<MoviePage> {
        self.get_page(
            "/discover/movie",
            &[
                ("with_genres", genre_id.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn by_year(&self, year: i32, page: u32) -> Result<MoviePage> {
        self.get_page(
            "/discover/movie",
            &[
                ("primary_release_year", year.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn by_rating(&self, min: f64, max: f64, page: u32) -> Result<MoviePage> {
        self.get_page(
            "/discover/movie",
            &[
                ("vote_average.gte", min.to_string()),
                ("vote_average.lte", max.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn search(&self, query: &str, page: u32) -> Result<MoviePage> {
        self.get_page(
            "/search/movie",
            &[("query", query.to_string()), ("page", page.to_string())],
        )
        .await
    }

    async fn details(&self, movie_id: i64) -> Result<MovieDetails> {
        let url = self.url(
            &format!("/movie/{movie_id}"),
            &[("append_to_response", "credits,videos".to_string())],
        );
        self.get_json(&url).await
    }

    async fn similar(&self, movie_id: i64) -> Result<MoviePage> {
        self.get_page(&format!("/movie/{movie_id}/recommendations"), &[])
            .await
    }

    async fn genre_list(&self) -> Result<Vec<Genre>> {
        let url = self.url("/genre/movie/list", &[]);
        let data: GenreList = self.get_json(&url).await?;
        Ok(data.genres)
    }
}

/// Full image URL for a TMDB file path, or `None` when the movie has no image.
pub fn image_url(path: Option<&str>, size: &str) -> Option<String> {
    path.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE}/{size}{p}"))
}

pub fn youtube_url(key: &str) -> String {
    format!("https://www.youtube.com/watch?v={key}")
}
