pub mod cache;
pub mod fetch;
pub mod overlay;
pub mod rewrite;
pub mod selector;
pub mod stalker;
pub mod sync;
