pub mod account;
pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod filters;
pub mod models;
pub mod realtime;
pub mod recent;
pub mod reviews;
pub mod session;
pub mod storage;
pub mod supabase;
pub mod tmdb;
