//! PEP 440 versions and specifier sets.
//!
//! Covers what PyPI release lists actually contain: epochs, release
//! segments, `a`/`b`/`rc` pre-releases, post and dev releases, and local
//! labels. Legacy (non-PEP 440) versions are skipped during selection.

use crate::pkg::error::PkgError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Rc,
}

impl PreKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Rc => "rc",
        }
    }
}

/// Where a version sits relative to its final release.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PrePhase {
    DevOnly,
    Pre(PreKind, u64),
    Final,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum DevPhase {
    Dev(u64),
    Released,
}

/// A parsed PEP 440 version.
#[derive(Debug, Clone)]
pub struct Pep440Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

impl Pep440Version {
    /// Pre-releases and dev releases.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// The version without its local label.
    #[must_use]
    pub fn public(&self) -> Self {
        Self {
            local: None,
            ..self.clone()
        }
    }

    fn trimmed_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }

    fn same_base(&self, other: &Self) -> bool {
        self.epoch == other.epoch && self.trimmed_release() == other.trimmed_release()
    }

    /// `epoch` matches and `release` starts with `prefix` (zero-padded).
    fn has_release_prefix(&self, epoch: u64, prefix: &[u64]) -> bool {
        self.epoch == epoch
            && prefix
                .iter()
                .enumerate()
                .all(|(i, n)| self.release.get(i).copied().unwrap_or(0) == *n)
    }

    fn key(&self) -> (u64, &[u64], PrePhase, Option<u64>, DevPhase, Option<&str>) {
        let pre = match (self.pre, self.post, self.dev) {
            (Some((kind, n)), _, _) => PrePhase::Pre(kind, n),
            (None, None, Some(_)) => PrePhase::DevOnly,
            _ => PrePhase::Final,
        };
        let dev = self.dev.map_or(DevPhase::Released, DevPhase::Dev);
        (
            self.epoch,
            self.trimmed_release(),
            pre,
            self.post,
            dev,
            self.local.as_deref(),
        )
    }
}

impl PartialEq for Pep440Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pep440Version {}

impl PartialOrd for Pep440Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pep440Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Pep440Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{n}", kind.as_str())?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

/// Cursor over the lowercase public part of a version string.
struct Scanner<'a> {
    rest: &'a str,
}

impl Scanner<'_> {
    fn digits(&mut self) -> Option<u64> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (number, rest) = self.rest.split_at(end);
        self.rest = rest;
        number.parse().ok()
    }

    fn eat(&mut self, prefix: &str) -> bool {
        match self.rest.strip_prefix(prefix) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn eat_sep(&mut self) {
        let _ = self.eat(".") || self.eat("-") || self.eat("_");
    }

    /// Optional separator, one of `words`, optional separator, optional number.
    fn labelled(&mut self, words: &[&'static str]) -> Option<(&'static str, u64)> {
        let saved = self.rest;
        self.eat_sep();
        if let Some(word) = words.iter().copied().find(|w| self.eat(w)) {
            self.eat_sep();
            return Some((word, self.digits().unwrap_or(0)));
        }
        self.rest = saved;
        None
    }
}

impl FromStr for Pep440Version {
    type Err = PkgError;

    fn from_str(input: &str) -> Result<Self, PkgError> {
        let invalid = || PkgError::spec_invalid(format!("Invalid version '{input}'"));

        let lower = input.trim().to_ascii_lowercase();
        let text = lower.strip_prefix('v').unwrap_or(&lower);

        let (public, local) = match text.split_once('+') {
            Some((public, local))
                if !local.is_empty()
                    && local
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) =>
            {
                (public, Some(local.replace(['-', '_'], ".")))
            }
            Some(_) => return Err(invalid()),
            None => (text, None),
        };

        let (epoch, public) = match public.split_once('!') {
            Some((epoch, rest)) => (epoch.parse().map_err(|_| invalid())?, rest),
            None => (0, public),
        };

        let mut scanner = Scanner { rest: public };
        let mut release = vec![scanner.digits().ok_or_else(invalid)?];
        while scanner.rest.starts_with('.')
            && scanner.rest[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            scanner.eat(".");
            release.push(scanner.digits().ok_or_else(invalid)?);
        }

        let pre = scanner
            .labelled(&["alpha", "a", "beta", "b", "rc", "c", "preview", "pre"])
            .map(|(word, n)| {
                let kind = match word {
                    "alpha" | "a" => PreKind::Alpha,
                    "beta" | "b" => PreKind::Beta,
                    _ => PreKind::Rc,
                };
                (kind, n)
            });

        // `1.0-1` is the implicit post-release spelling
        let post = if scanner.rest.starts_with('-')
            && scanner.rest[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            scanner.eat("-");
            scanner.digits()
        } else {
            scanner.labelled(&["post", "rev", "r"]).map(|(_, n)| n)
        };

        let dev = scanner.labelled(&["dev"]).map(|(_, n)| n);

        if !scanner.rest.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    EqPrefix,
    Ne,
    NePrefix,
    Ge,
    Le,
    Gt,
    Lt,
    Compatible,
    Arbitrary,
}

/// One clause of a specifier set, e.g. `>=2.5`.
#[derive(Debug, Clone)]
pub struct Specifier {
    op: Operator,
    version: Option<Pep440Version>,
    raw: String,
}

impl Specifier {
    fn parse(clause: &str) -> Result<Self, PkgError> {
        let clause = clause.trim();
        let operators = [
            ("===", Operator::Arbitrary),
            ("~=", Operator::Compatible),
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            (">", Operator::Gt),
            ("<", Operator::Lt),
        ];
        // A bare version pins exactly
        let (op, value) = operators
            .iter()
            .find_map(|(token, op)| clause.strip_prefix(token).map(|rest| (*op, rest.trim())))
            .unwrap_or((Operator::Eq, clause));

        if value.is_empty() {
            return Err(PkgError::spec_invalid(format!("Missing version in '{clause}'")));
        }

        if op == Operator::Arbitrary {
            return Ok(Self {
                op,
                version: None,
                raw: value.to_ascii_lowercase(),
            });
        }

        let (op, value) = match (op, value.strip_suffix(".*")) {
            (Operator::Eq, Some(prefix)) => (Operator::EqPrefix, prefix),
            (Operator::Ne, Some(prefix)) => (Operator::NePrefix, prefix),
            (_, Some(_)) => {
                return Err(PkgError::spec_invalid(format!(
                    "Wildcard only allowed with == and != in '{clause}'"
                )))
            }
            (op, None) => (op, value),
        };

        let version: Pep440Version = value.parse()?;
        if op == Operator::Compatible && version.release.len() < 2 {
            return Err(PkgError::spec_invalid(format!(
                "~= needs at least two release segments in '{clause}'"
            )));
        }

        Ok(Self {
            op,
            version: Some(version),
            raw: value.to_string(),
        })
    }

    fn matches(&self, candidate: &Pep440Version, raw: &str) -> bool {
        let Some(spec) = &self.version else {
            return raw.trim().eq_ignore_ascii_case(&self.raw);
        };
        let public = candidate.public();

        match self.op {
            Operator::Eq if spec.local.is_some() => candidate == spec,
            Operator::Eq => public == *spec,
            Operator::Ne if spec.local.is_some() => candidate != spec,
            Operator::Ne => public != *spec,
            Operator::EqPrefix => candidate.has_release_prefix(spec.epoch, &spec.release),
            Operator::NePrefix => !candidate.has_release_prefix(spec.epoch, &spec.release),
            Operator::Ge => public >= *spec,
            Operator::Le => public <= *spec,
            Operator::Gt => {
                public > *spec
                    && !(spec.post.is_none() && public.post.is_some() && public.same_base(spec))
            }
            Operator::Lt => {
                public < *spec
                    && !(public.is_prerelease() && !spec.is_prerelease() && public.same_base(spec))
            }
            Operator::Compatible => {
                let prefix = &spec.release[..spec.release.len() - 1];
                public >= *spec && candidate.has_release_prefix(spec.epoch, prefix)
            }
            Operator::Arbitrary => false,
        }
    }

    fn mentions_prerelease(&self) -> bool {
        self.version.as_ref().is_some_and(Pep440Version::is_prerelease)
            && !matches!(self.op, Operator::Ne | Operator::NePrefix)
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Operator::Eq | Operator::EqPrefix => "==",
            Operator::Ne | Operator::NePrefix => "!=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
        };
        let wildcard = if matches!(self.op, Operator::EqPrefix | Operator::NePrefix) {
            ".*"
        } else {
            ""
        };
        write!(f, "{op}{}{wildcard}", self.raw)
    }
}

/// Comma-joined specifiers; every clause must match. Empty matches anything.
#[derive(Debug, Clone, Default)]
pub struct SpecifierSet {
    specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    /// Parse `>=1.21.1,<3`, `(>=2.0)`, `*` or the empty string.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` for a malformed clause.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let trimmed = input.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(trimmed)
            .trim();

        if inner.is_empty() || inner == "*" {
            return Ok(Self::default());
        }

        let specifiers = inner
            .split(',')
            .map(Specifier::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { specifiers })
    }

    /// Whether `raw` (already parsed as `version`) satisfies every clause.
    #[must_use]
    pub fn matches(&self, version: &Pep440Version, raw: &str) -> bool {
        self.specifiers.iter().all(|s| s.matches(version, raw))
    }

    /// Highest matching candidate.
    ///
    /// Pre-releases are only picked when a clause names one or when nothing
    /// else matches. Candidates that are not PEP 440 versions are ignored.
    #[must_use]
    pub fn select<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        let matching: Vec<(Pep440Version, &'a str)> = candidates
            .into_iter()
            .filter_map(|raw| raw.parse::<Pep440Version>().ok().map(|v| (v, raw)))
            .filter(|(v, raw)| self.matches(v, raw))
            .collect();

        let highest = |allow_pre: bool| {
            matching
                .iter()
                .filter(|(v, _)| allow_pre || !v.is_prerelease())
                .max_by(|a, b| a.0.cmp(&b.0))
                .map(|(_, raw)| *raw)
        };

        if self.specifiers.iter().any(Specifier::mentions_prerelease) {
            highest(true)
        } else {
            highest(false).or_else(|| highest(true))
        }
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.specifiers.iter().map(ToString::to_string).collect();
        write!(f, "{}", clauses.join(","))
    }
}
