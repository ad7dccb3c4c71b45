use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog snapshot of one movie as returned by list endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Movie {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub genre_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenreList {
    #[serde(default)]
    pub(crate) genres: Vec<Genre>,
}

/// One page of movies with the totals the catalog reported.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct MoviePage {
    pub movies: Vec<Movie>,
    pub total_pages: u32,
    pub total_results: u64,
}

/// TMDB list endpoints answer either with a bare array or with a paginated
/// envelope; both decode here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MovieListResponse {
    Bare(Vec<Movie>),
    Paged {
        results: Vec<Movie>,
        #[serde(default)]
        total_pages: Option<u32>,
        #[serde(default)]
        total_results: Option<u64>,
    },
}

impl MovieListResponse {
    pub(crate) fn into_page(self) -> MoviePage {
        match self {
            MovieListResponse::Paged {
                results,
                total_pages,
                total_results,
            } => {
                let total_results = total_results.unwrap_or(results.len() as u64);
                MoviePage {
                    total_pages: total_pages.unwrap_or(1),
                    total_results,
                    movies: results,
                }
            }
            MovieListResponse::Bare(movies) => MoviePage {
                total_pages: 1,
                total_results: movies.len() as u64,
                movies,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CrewMember {
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Video {
    pub key: String,
    pub site: String,
    #[serde(rename = "type")]
    pub video_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Videos {
    #[serde(default)]
    pub results: Vec<Video>,
}

/// Full record for the movie page, fetched with credits and videos appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MovieDetails {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub credits: Credits,
    #[serde(default)]
    pub videos: Videos,
}

impl MovieDetails {
    /// Key of the first YouTube video tagged as a trailer.
    pub fn trailer_key(&self) -> Option<&str> {
        self.videos
            .results
            .iter()
            .find(|v| v.site == "YouTube" && v.video_type == "Trailer")
            .map(|v| v.key.as_str())
    }

    pub fn release_year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .filter(|y| !y.is_empty())
    }

    pub fn as_movie(&self) -> Movie {
        Movie {
            id: self.id,
            title: self.title.clone(),
            poster_path: self.poster_path.clone(),
            release_date: self.release_date.clone(),
            vote_average: self.vote_average,
            genre_ids: Some(self.genres.iter().map(|g| g.id).collect()),
            overview: self.overview.clone(),
        }
    }
}

/// Locally persisted bookmark of a movie.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FavoriteEntry {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub overview: Option<String>,
}

impl From<&Movie> for FavoriteEntry {
    fn from(movie: &Movie) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            poster_path: movie.poster_path.clone(),
            release_date: movie.release_date.clone(),
            vote_average: movie.vote_average,
            overview: movie.overview.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: String,
    pub movie_id: i64,
    pub movie_title: String,
    #[serde(default)]
    pub movie_poster: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub user_id: String,
    pub movie_id: i64,
    pub movie_title: String,
    pub movie_poster: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

impl NewHistoryEntry {
    pub fn for_movie(user_id: &str, movie: &Movie, viewed_at: DateTime<Utc>) -> Self {
        let title = if movie.title.trim().is_empty() {
            "Unknown Title".to_string()
        } else {
            movie.title.clone()
        };
        Self {
            user_id: user_id.to_string(),
            movie_id: movie.id,
            movie_title: title,
            movie_poster: movie.poster_path.clone(),
            viewed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Review {
    pub id: i64,
    pub user_id: String,
    pub movie_id: i64,
    pub username: String,
    pub rating: i32,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Review as typed by the user, before local validation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewReview {
    pub movie_id: i64,
    pub user_id: String,
    pub username: String,
    pub rating: i32,
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A realtime notification that the reviews table changed.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ReviewChange {
    pub kind: ChangeKind,
    pub movie_id: i64,
    pub record: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_paginated_envelope() {
        let value = json!({
            "page": 1,
            "results": [{ "id": 1, "title": "A", "vote_average": 7.5 }],
            "total_pages": 12,
            "total_results": 240
        });
        let parsed: MovieListResponse = serde_json::from_value(value).expect("envelope");
        let page = parsed.into_page();
        assert_eq!(page.movies.len(), 1);
        assert_eq!(page.total_pages, 12);
        assert_eq!(page.total_results, 240);
    }

    #[test]
    fn decodes_bare_list_and_counts_it() {
        let value = json!([
            { "id": 1, "title": "A" },
            { "id": 2, "title": "B", "poster_path": null }
        ]);
        let parsed: MovieListResponse = serde_json::from_value(value).expect("bare list");
        let page = parsed.into_page();
        assert_eq!(page.total_results, 2);
        assert_eq!(page.movies[1].poster_path, None);
        assert_eq!(page.movies[0].vote_average, 0.0);
    }

    #[test]
    fn trailer_prefers_youtube_trailers() {
        let details: MovieDetails = serde_json::from_value(json!({
            "id": 27205,
            "title": "Inception",
            "release_date": "2010-07-15",
            "videos": { "results": [
                { "key": "teaser", "site": "YouTube", "type": "Teaser" },
                { "key": "vimeo", "site": "Vimeo", "type": "Trailer" },
                { "key": "yt", "site": "YouTube", "type": "Trailer" }
            ]}
        }))
        .expect("details");
        assert_eq!(details.trailer_key(), Some("yt"));
        assert_eq!(details.release_year(), Some("2010"));
    }

    #[test]
    fn history_entry_falls_back_to_unknown_title() {
        let movie = Movie {
            id: 3,
            title: " ".to_string(),
            poster_path: None,
            release_date: None,
            vote_average: 0.0,
            genre_ids: None,
            overview: None,
        };
        let entry = NewHistoryEntry::for_movie("u1", &movie, Utc::now());
        assert_eq!(entry.movie_title, "Unknown Title");
    }
}
