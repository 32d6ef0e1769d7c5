//! Memory budget estimation for solve tasks.
//!
//! The estimate only informs the external scheduler's worker sizing, nothing
//! in this crate enforces it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::dimension::Dimension;
use crate::error::ResourceEstimationError;
use crate::target::Assignment;

const BASE_FACTOR: f64 = 1.3;

static TIME_RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([0-9]+)h$").expect("built-in pattern must compile"));

/// Resources a single task asks the scheduler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resources {
    /// Memory in megabytes.
    pub mem_mb: u64,
    /// Threads the wrapped computation uses internally.
    pub threads: usize,
}

/// Splits an option string into its `-` separated tokens.
fn tokens(opts: &str) -> impl Iterator<Item = &str> {
    opts.split('-').filter(|token| !token.is_empty())
}

fn is_time_resolution(token: &str) -> bool {
    TIME_RESOLUTION.is_match(token)
}

/// The hour count of a time-resolution token such as `3h` or `24H`.
fn hours(token: &str) -> Option<u32> {
    TIME_RESOLUTION
        .captures(token)
        .and_then(|caps| caps[1].parse().ok())
}

/// Option tokens with the time-resolution ones removed, as the solver
/// receives them.
pub fn solver_options(opts: &str) -> Vec<&str> {
    tokens(opts).filter(|token| !is_time_resolution(token)).collect()
}

/// Estimates the memory budget of a solve.
///
/// `1.3` is divided by the first `<n>h` token of `opts`, unless that token
/// reads zero hours. Clusters carrying the `m` suffix use `18000 + 180 * n`,
/// all others `10000 + 195 * n`.
pub fn estimate(assignment: &Assignment) -> Result<u64, ResourceEstimationError> {
    let mut factor = BASE_FACTOR;

    let first = tokens(assignment.get(Dimension::Opts).unwrap_or("")).find(|t| is_time_resolution(t));
    if let Some(hours) = first.and_then(hours).filter(|&hours| hours > 0) {
        factor /= f64::from(hours);
    }

    let clusters = assignment
        .get(Dimension::Clusters)
        .ok_or(ResourceEstimationError::MissingClusters)?;

    let parse = |digits: &str| -> Result<f64, ResourceEstimationError> {
        digits
            .parse::<u32>()
            .map(f64::from)
            .map_err(|_| ResourceEstimationError::Clusters(clusters.to_string()))
    };

    let mem = match clusters.strip_suffix('m') {
        Some(digits) => factor * (18000.0 + 180.0 * parse(digits)?),
        None => factor * (10000.0 + 195.0 * parse(clusters)?),
    };

    Ok(mem.floor() as u64)
}
