//! UI module for consistent CLI output
//!
//! Uses `cliclack` for styled step lines in interactive terminals, with
//! automatic fallback to plain output in CI/non-interactive environments.
//! Diagnostics go through `tracing`; this module only reports results.
//!
//! # Example
//!
//! ```rust,ignore
//! use instaclone::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::step_ok_detail(&ctx, "Published lib", "v1");
//! ```

mod context;
mod output;

pub use context::UiContext;
pub use output::{step_ok, step_ok_detail, step_warn};
