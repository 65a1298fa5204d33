pub mod build;
pub mod get;
pub mod graph;
pub mod resolve;
pub mod tidy;
