pub mod files;
pub mod health;
pub mod libraries;
pub mod work;
