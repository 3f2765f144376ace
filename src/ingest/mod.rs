pub mod assets;
pub mod fetcher;
pub mod item;
