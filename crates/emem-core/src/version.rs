//! Firmware version parsing and `fw_range` matching.
//!
//! A `fw_range` is one of three forms:
//!
//! | form     | example            | specificity |
//! |----------|--------------------|-------------|
//! | exact    | `1.2.3`            | 30 |
//! | range    | `>=1.2.0 <2.0.0`   | 20 + number of constraints |
//! | wildcard | `1.2.*`            | 10 + number of fixed segments |
//!
//! Expressions that cannot be classified score 0 and match nothing. A range
//! outranks any wildcard, and an exact pin outranks any range of up to nine
//! constraints. Ranges with ten or more constraints reach 30 and beyond, so
//! they tie with or outrank an exact pin.

use std::{cmp::Ordering, fmt, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{Error, Result};

static TRIPLE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid regex"));
static PAIR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)").expect("valid regex"));
static SINGLE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\d+)").expect("valid regex"));
static CONSTRAINT: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(<=|>=|<|>)(.+)$").expect("valid regex"));

const WILDCARD_MAX_FIXED: usize = 3;

// ─── Version ────────────────────────────────────────────────────────────────

/// A `major.minor.patch` triple. Ordering is lexicographic over the three
/// components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
}

impl Version {
  pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self { major, minor, patch }
  }

  /// Extract a version from free text.
  ///
  /// The first `major.minor.patch` triple anywhere in `text` wins; failing
  /// that, the first `major.minor` (patch 0); failing that, the first bare
  /// number (minor and patch 0).
  pub fn parse(text: &str) -> Result<Self> {
    let text = text.trim();
    let invalid = || Error::InvalidVersion(text.to_owned());
    let num = |s: &str| s.parse::<u64>().map_err(|_| invalid());

    if let Some(c) = TRIPLE.captures(text) {
      return Ok(Self::new(num(&c[1])?, num(&c[2])?, num(&c[3])?));
    }
    if let Some(c) = PAIR.captures(text) {
      return Ok(Self::new(num(&c[1])?, num(&c[2])?, 0));
    }
    if let Some(c) = SINGLE.captures(text) {
      return Ok(Self::new(num(&c[1])?, 0, 0));
    }
    Err(invalid())
  }

  fn segment(&self, i: usize) -> u64 {
    match i {
      0 => self.major,
      1 => self.minor,
      _ => self.patch,
    }
  }
}

impl FromStr for Version {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

// ─── Range expressions ──────────────────────────────────────────────────────

/// Comparison operator of a single range constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Lt,
  Le,
  Gt,
  Ge,
}

impl Op {
  fn parse(token: &str) -> Option<Self> {
    match token {
      "<" => Some(Self::Lt),
      "<=" => Some(Self::Le),
      ">" => Some(Self::Gt),
      ">=" => Some(Self::Ge),
      _ => None,
    }
  }

  fn holds(self, ord: Ordering) -> bool {
    match self {
      Self::Lt => ord == Ordering::Less,
      Self::Le => ord != Ordering::Greater,
      Self::Gt => ord == Ordering::Greater,
      Self::Ge => ord != Ordering::Less,
    }
  }
}

/// One `<op><version>` token of a range expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
  pub op:     Op,
  pub target: Version,
}

/// A classified `fw_range` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FwRange {
  /// A single pinned version.
  Exact(Version),
  /// Constraints that must all hold.
  Range(Vec<Constraint>),
  /// Leading fixed segments; the rest are unconstrained.
  Wildcard(Vec<u64>),
}

impl FwRange {
  /// Classify `expr`.
  ///
  /// Anything containing `*` is a wildcard. Otherwise, if at least one
  /// whitespace-separated token has the `<op><version>` form it is a range
  /// (other tokens are ignored). Everything else must parse as an exact
  /// version.
  pub fn classify(expr: &str) -> Result<Self> {
    let expr = expr.trim();

    if expr.contains('*') {
      let mut fixed = Vec::new();
      for part in expr.split('.') {
        if part == "*" {
          break;
        }
        let digits: String = part.chars().filter(char::is_ascii_digit).collect();
        let value = digits
          .parse::<u64>()
          .map_err(|_| Error::InvalidRange(expr.to_owned()))?;
        fixed.push(value);
      }
      fixed.truncate(WILDCARD_MAX_FIXED);
      return Ok(Self::Wildcard(fixed));
    }

    let mut constraints = Vec::new();
    for token in expr.split_whitespace() {
      let Some(c) = CONSTRAINT.captures(token) else {
        continue;
      };
      let Some(op) = Op::parse(&c[1]) else {
        continue;
      };
      let target = Version::parse(&c[2])
        .map_err(|_| Error::InvalidRange(expr.to_owned()))?;
      constraints.push(Constraint { op, target });
    }
    if !constraints.is_empty() {
      return Ok(Self::Range(constraints));
    }

    Version::parse(expr)
      .map(Self::Exact)
      .map_err(|_| Error::InvalidRange(expr.to_owned()))
  }

  /// Whether `version` falls inside this range.
  pub fn contains(&self, version: &Version) -> bool {
    match self {
      Self::Exact(pinned) => pinned == version,
      Self::Wildcard(fixed) => fixed
        .iter()
        .enumerate()
        .all(|(i, segment)| version.segment(i) == *segment),
      Self::Range(constraints) => constraints
        .iter()
        .all(|c| c.op.holds(version.cmp(&c.target))),
    }
  }

  pub fn specificity(&self) -> i64 {
    match self {
      Self::Exact(_) => 30,
      Self::Range(constraints) => 20 + constraints.len() as i64,
      Self::Wildcard(fixed) => 10 + fixed.len() as i64,
    }
  }
}

// ─── Matching ───────────────────────────────────────────────────────────────

/// Whether the firmware `version` satisfies `fw_range`.
///
/// Unparseable versions and unrecognised expressions never match.
pub fn matches(version: &str, fw_range: &str) -> bool {
  let Ok(version) = Version::parse(version) else {
    return false;
  };
  FwRange::classify(fw_range).is_ok_and(|range| range.contains(&version))
}

// ─── Specificity ────────────────────────────────────────────────────────────

/// Deterministic rank of how narrowly `fw_range` pins a version; 0 when the
/// expression is unrecognised.
pub fn specificity(fw_range: &str) -> i64 {
  FwRange::classify(fw_range).map_or(0, |range| range.specificity())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
