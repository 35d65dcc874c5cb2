//! # SSR Gateway
//!
//! A server-side rendering gateway built on deno_core. It resolves a page
//! module under a configured source directory, executes the module's render
//! function with injected props inside an isolated V8 context, and
//! serializes the returned element tree to an escaped HTML string.
//!
//! ## Guarantees
//!
//! - **Isolation**: one fresh evaluation context per render; no state bleeds
//!   between renders, no fs/net/env access beyond the source directory
//! - **Bounded time**: a per-render deadline terminates stalled executions
//! - **Escape-safe output**: text and attribute values from props are
//!   HTML-entity-escaped by the host-side serializer
//! - **Fresh modules**: edited page modules are picked up on the next render
//!   via fingerprint-based cache invalidation, no restart needed
//! - **No panics**: every failure returns through [`RenderError`]
//!
//! ## Page modules
//!
//! A page module is a `.js`/`.mjs` file whose default export (or named
//! `render` export) takes a props object and returns an element tree built
//! with the `h()` and `Fragment` globals:
//!
//! ```js
//! export default function Index(props) {
//!   return h("h1", null, props.title);
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ssr_gateway::{Gateway, Options};
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::with_options(Options {
//!         public_path: "/public".into(),
//!         source_dir: "./site".into(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let html = gateway
//!         .render("pages/index", serde_json::json!({ "title": "Hello" }))
//!         .await
//!         .unwrap();
//!
//!     println!("{html}");
//! }
//! ```

mod cache;
mod error;
mod gateway;
mod html;
mod loader;
mod props;
mod sandbox;

pub use error::RenderError;
pub use gateway::{Gateway, Options};
