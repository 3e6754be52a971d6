//! Terminal inspector built on [ratatui](https://github.com/ratatui-org/ratatui).
//!
//! The UI is organized into three layers:
//!
//! - **[`app`]**: application state, keyboard event loop, pane focus
//! - **[`panes`]**: stateless render functions for each visible pane (source,
//!   code listing, VM stack, program output, status bar)
//! - **[`theme`]**: color palette used by all panes
//!
//! Construct an [`App`] from a recorded [`Trace`] and call [`App::run`].
//!
//! [`Trace`]: crate::snapshot::Trace
//! [`App::run`]: app::App::run

pub mod app;
pub mod panes;
pub mod theme;

pub use app::App;
