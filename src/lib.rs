//! Polygenic risk score weights from GWAS summary statistics by black-box
//! variational inference over a two-component Gaussian mixture prior.

pub mod error;
pub mod logging;
pub mod types;

pub mod df_utils;
pub mod io;
pub mod matrix;
pub mod parallel;
pub mod qc;
pub mod schema;
pub mod stats;
pub mod utils;

pub mod distributions;
pub mod harmonize;
pub mod infinitesimal;
pub mod objective;
pub mod optim;
pub mod prs;
pub mod sumstats;
pub mod sweep;
