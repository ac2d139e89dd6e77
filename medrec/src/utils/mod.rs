pub mod file_utils;

pub use file_utils::{discover_files, ensure_dir_exists, load_json, save_json};
