pub mod file_service;
pub mod files;
