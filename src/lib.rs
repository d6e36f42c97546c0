pub mod api;
pub mod config;
pub mod local_storage;
pub mod routes;
pub mod shortcode;
pub mod shorten_service;
pub mod stats_service;
pub mod url_repo;
