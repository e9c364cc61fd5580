//! Paginated fetcher and the rendering capability it drives.
//!
//! This crate provides:
//! - [`renderer`]: the [`Renderer`] trait and the HTTP-backed [`HttpRenderer`]
//! - [`engine`]: the [`Fetcher`], which walks a page range and persists raw items

pub mod engine;
pub mod renderer;

pub use engine::{FetchConfig, FetchReport, Fetcher, PageFailure};
pub use renderer::{
    HttpRenderer, RenderedElement, RenderedPage, Renderer, WaitOutcome, select_all,
};
