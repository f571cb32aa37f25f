//! Runtime configuration consumed by the connection handler, dispatcher and
//! file-transfer subsystem. Loading this from disk (YAML, flags, env) is an
//! external concern; the core only needs the resolved values.

use regex::Regex;
use std::path::PathBuf;

#[derive(Clone)]
pub struct ServerConfig {
    pub name: String,
    pub description: String,
    pub file_root: PathBuf,
    pub banner: Option<Vec<u8>>,
    pub agreement_text: String,
    pub enable_tracker_registration: bool,
    pub trackers: Vec<String>,
    pub news_delimiter: String,
    pub news_date_format: String,
    pub max_downloads: usize,
    pub max_downloads_per_client: usize,
    pub max_connections_per_ip: usize,
    pub preserve_resource_forks: bool,
    pub ignore_files: Vec<Regex>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            name: "Hotline Server".to_owned(),
            description: String::new(),
            file_root: PathBuf::from("./files"),
            banner: None,
            agreement_text: String::new(),
            enable_tracker_registration: false,
            trackers: Vec::new(),
            news_delimiter: "\r__________________________________________\r{poster} ({date})\r{body}\r".to_owned(),
            news_date_format: crate::news::DEFAULT_DATE_FORMAT.to_owned(),
            max_downloads: 100,
            max_downloads_per_client: 2,
            max_connections_per_ip: 10,
            preserve_resource_forks: true,
            ignore_files: Vec::new(),
        }
    }
}
