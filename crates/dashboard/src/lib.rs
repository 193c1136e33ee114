//! Terminal dashboard for the R-Oracle chain
//!
//! Reads the oracle pallet through a shared chain connection and submits
//! prices fetched from the exchange cascade

pub mod app;
pub mod view;

pub use app::{fetch_and_submit, load_data, submit_and_reload, DashboardData, SubmitOutcome};
pub use view::{format_usd, Renderer};
