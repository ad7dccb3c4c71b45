//! Fetch one catalog listing or movie from TMDB and print what the service
//! would serve for it.
//! Usage:
//!   cargo run --bin tmdb_props -- movie <tmdb_id>
//!   cargo run --bin tmdb_props -- filter <genre|year|rating|sort> <value>
//!   cargo run --bin tmdb_props -- search <query>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use cinedeck::catalog::run_query;
use cinedeck::filters::{resolve_query, FilterField, FilterSelection};
use cinedeck::tmdb::{self, TmdbApi, TmdbClient};
use dotenvy::dotenv;
use serde_json::json;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: cargo run --bin tmdb_props -- movie <tmdb_id>");
        eprintln!("       cargo run --bin tmdb_props -- filter <field> <value>");
        eprintln!("       cargo run --bin tmdb_props -- search <query>");
        std::process::exit(1);
    }

    let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
    let language = env::var("TMDB_LANGUAGE").unwrap_or_else(|_| "ru-RU".to_string());
    let client = TmdbClient::new(api_key, language)?;

    match args[1].as_str() {
        "movie" => {
            let id: i64 = args[2].parse().context("tmdb_id must be an integer")?;
            fetch_movie(&client, id).await?
        }
        "filter" => {
            let field: FilterField = args[2].parse()?;
            let value = args.get(3).map(String::as_str).unwrap_or_default();
            let mut selection = FilterSelection::default();
            selection.set(field, value)?;
            let query = resolve_query(&selection);
            let page = run_query(&client, &query, 1).await?;
            print_listing(&json!(query), &page.movies, page.total_results)?;
        }
        "search" => {
            let term = args[2..].join(" ");
            let page = client.search(&term, 1).await?;
            print_listing(&json!({ "search": term }), &page.movies, page.total_results)?;
        }
        other => anyhow::bail!("unknown command '{}'", other),
    }

    Ok(())
}

async fn fetch_movie(client: &TmdbClient, id: i64) -> Result<()> {
    let details = client.details(id).await?;
    let similar = client.similar(id).await?;
    let director = details
        .credits
        .crew
        .iter()
        .find(|c| c.job.as_deref() == Some("Director"))
        .map(|c| c.name.clone());
    let cast: Vec<&str> = details
        .credits
        .cast
        .iter()
        .take(10)
        .map(|c| c.name.as_str())
        .collect();
    let genres: Vec<&str> = details.genres.iter().map(|g| g.name.as_str()).collect();

    let output = json!({
        "id": details.id,
        "title": details.title,
        "tagline": details.tagline,
        "overview": details.overview,
        "year": details.release_year(),
        "runtime_minutes": details.runtime,
        "rating": details.vote_average,
        "genres": genres,
        "director": director,
        "cast": cast,
        "trailer": details.trailer_key().map(tmdb::youtube_url),
        "poster": tmdb::image_url(details.poster_path.as_deref(), tmdb::POSTER_SIZE),
        "backdrop": tmdb::image_url(details.backdrop_path.as_deref(), "original"),
        "similar": similar.movies.iter().map(|m| &m.title).collect::<Vec<_>>(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_listing(
    query: &serde_json::Value,
    movies: &[cinedeck::models::Movie],
    total: u64,
) -> Result<()> {
    let rows: Vec<_> = movies
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "title": m.title,
                "release_date": m.release_date,
                "vote_average": m.vote_average,
            })
        })
        .collect();
    let output = json!({ "query": query, "total_results": total, "movies": rows });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
