pub mod annotate;
pub mod annotation;
pub mod vision;
