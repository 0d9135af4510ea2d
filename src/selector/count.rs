//! How many machines a request wants.
//!
//! A request is either a plain count (`3`, `all`, `2..5`) or a pair of
//! threshold conditions in the CI syntax (`>=50%`, `>2`, `<=10`), where a
//! trailing `%` is relative to the eligible pool size.

use crate::error::{LeaseError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(<=|>=|<|>)\s*(\d+(?:\.\d+)?)\s*(%)?\s*$").expect("Invalid count condition regex")
});

/// Comparison operator of a count condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Le,
    Ge,
    Lt,
    Gt,
}

impl Comparison {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Le => left <= right,
            Comparison::Ge => left >= right,
            Comparison::Lt => left < right,
            Comparison::Gt => left > right,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
        }
    }
}

/// A condition on the number of claimed machines, e.g. `>=50%`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountCondition {
    pub comparison: Comparison,
    pub value: f64,
    /// `value` is a percentage of the eligible pool.
    pub percent: bool,
}

impl CountCondition {
    /// Whether `count` claimed machines out of `pool_size` meets the condition.
    pub fn evaluate(&self, count: usize, pool_size: usize) -> bool {
        let count = count as f64;
        let left = if self.percent {
            if pool_size == 0 {
                return false;
            }
            count / pool_size as f64 * 100.0
        } else {
            count
        };
        self.comparison.holds(left, self.value)
    }

    /// The smallest non-zero count that meets the condition, if any.
    pub fn threshold(&self, pool_size: usize) -> Option<usize> {
        (1..=pool_size).find(|&count| self.evaluate(count, pool_size))
    }
}

impl FromStr for CountCondition {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = CONDITION_RE.captures(s).ok_or_else(|| {
            LeaseError::InvalidRequest(format!(
                "malformed count condition '{}' (expected e.g. '>=50%' or '>2')",
                s
            ))
        })?;

        let comparison = match &caps[1] {
            "<=" => Comparison::Le,
            ">=" => Comparison::Ge,
            "<" => Comparison::Lt,
            _ => Comparison::Gt,
        };
        let value = caps[2].parse::<f64>().map_err(|e| {
            LeaseError::InvalidRequest(format!("malformed count condition '{}': {}", s, e))
        })?;

        Ok(Self {
            comparison,
            value,
            percent: caps.get(3).is_some(),
        })
    }
}

impl fmt::Display for CountCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.comparison.symbol(), self.value)?;
        if self.percent {
            write!(f, "%")?;
        }
        Ok(())
    }
}

/// The number of machines an acquisition asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum CountRequest {
    /// Exactly `n` machines.
    Exact(usize),
    /// Every machine in the eligible pool.
    All,
    /// At least `min`, up to `max`; settles for `min` once nothing else is free.
    Range { min: usize, max: usize },
    /// Keep searching until `target` holds; accept the result if `minimum` holds.
    Conditions {
        target: CountCondition,
        minimum: CountCondition,
    },
}

impl Default for CountRequest {
    fn default() -> Self {
        CountRequest::Exact(1)
    }
}

/// Resolved claim targets for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Fewest machines the caller can work with.
    pub minimum: usize,
    /// Machines to claim before stopping.
    pub target: usize,
    /// Stop at `minimum` once a round finds no more free candidates.
    pub settle_at_minimum: bool,
}

impl CountRequest {
    /// Resolve the request against the eligible pool size.
    pub fn resolve(&self, pool_size: usize) -> Result<Thresholds> {
        let thresholds = match self {
            CountRequest::Exact(n) => Thresholds {
                minimum: *n,
                target: *n,
                settle_at_minimum: false,
            },
            CountRequest::All => Thresholds {
                minimum: pool_size,
                target: pool_size,
                settle_at_minimum: false,
            },
            CountRequest::Range { min, max } => {
                if min > max {
                    return Err(LeaseError::InvalidRequest(format!(
                        "count range {}..{} has min > max",
                        min, max
                    )));
                }
                Thresholds {
                    minimum: *min,
                    target: (*max).min(pool_size),
                    settle_at_minimum: true,
                }
            }
            CountRequest::Conditions { target, minimum } => {
                let target_count = target.threshold(pool_size).ok_or_else(|| {
                    LeaseError::InvalidRequest(format!(
                        "target condition '{}' cannot be met by a pool of {} machines",
                        target, pool_size
                    ))
                })?;
                let minimum_count = minimum.threshold(pool_size).ok_or_else(|| {
                    LeaseError::InvalidRequest(format!(
                        "minimum condition '{}' cannot be met by a pool of {} machines",
                        minimum, pool_size
                    ))
                })?;
                Thresholds {
                    minimum: minimum_count,
                    target: target_count,
                    settle_at_minimum: false,
                }
            }
        };

        if thresholds.minimum == 0 || thresholds.target == 0 {
            return Err(LeaseError::InvalidRequest(if pool_size == 0 {
                "no eligible machines in the pool".to_string()
            } else {
                "machine count must be greater than 0".to_string()
            }));
        }
        if thresholds.minimum > pool_size {
            return Err(LeaseError::InvalidRequest(format!(
                "requested {} machines but the eligible pool has {}",
                thresholds.minimum, pool_size
            )));
        }
        if thresholds.minimum > thresholds.target {
            return Err(LeaseError::InvalidRequest(format!(
                "minimum of {} machines exceeds the target of {}",
                thresholds.minimum, thresholds.target
            )));
        }

        Ok(thresholds)
    }

    /// Whether this request asks for exactly one machine.
    pub fn is_single(&self) -> bool {
        matches!(self, CountRequest::Exact(1))
    }
}

impl FromStr for CountRequest {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(CountRequest::All);
        }

        let parse = |part: &str| {
            part.trim().parse::<usize>().map_err(|_| {
                LeaseError::InvalidRequest(format!(
                    "invalid count '{}' (expected N, 'all' or MIN..MAX)",
                    s
                ))
            })
        };

        match s.split_once("..") {
            Some((min, max)) => Ok(CountRequest::Range {
                min: parse(min)?,
                max: parse(max)?,
            }),
            None => Ok(CountRequest::Exact(parse(s)?)),
        }
    }
}

impl fmt::Display for CountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountRequest::Exact(n) => write!(f, "{}", n),
            CountRequest::All => write!(f, "all"),
            CountRequest::Range { min, max } => write!(f, "{}..{}", min, max),
            CountRequest::Conditions { target, minimum } => {
                write!(f, "target {} / minimum {}", target, minimum)
            }
        }
    }
}
