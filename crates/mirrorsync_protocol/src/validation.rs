//! Accumulating validation results.

/// Outcome of a structural check.
///
/// Unlike `Result`, combining two `Invalid` values keeps the reasons of both,
/// so a caller sees every problem with a payload at once.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Validation {
    /// All checks passed.
    Valid,
    /// One or more checks failed.
    Invalid(Vec<String>),
}

impl Validation {
    /// Returns `Valid` if `condition` holds, otherwise `Invalid` with `reason`.
    pub fn check(condition: bool, reason: impl Into<String>) -> Self {
        if condition {
            Validation::Valid
        } else {
            Validation::invalid(reason)
        }
    }

    /// Creates a failed validation with a single reason.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Validation::Invalid(vec![reason.into()])
    }

    /// Returns true if no check failed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Combines two results, keeping the reasons of both.
    pub fn and(self, other: Validation) -> Validation {
        match (self, other) {
            (Validation::Valid, Validation::Valid) => Validation::Valid,
            (Validation::Valid, invalid) | (invalid, Validation::Valid) => invalid,
            (Validation::Invalid(mut a), Validation::Invalid(b)) => {
                a.extend(b);
                Validation::Invalid(a)
            }
        }
    }

    /// Runs `next` only if this result is valid.
    pub fn and_then(self, next: impl FnOnce() -> Validation) -> Validation {
        match self {
            Validation::Valid => next(),
            invalid => invalid,
        }
    }

    /// Combines any number of results.
    pub fn all(results: impl IntoIterator<Item = Validation>) -> Validation {
        results
            .into_iter()
            .fold(Validation::Valid, Validation::and)
    }

    /// Returns the failure reasons (empty when valid).
    pub fn reasons(&self) -> &[String] {
        match self {
            Validation::Valid => &[],
            Validation::Invalid(reasons) => reasons,
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<(), Vec<String>> {
        match self {
            Validation::Valid => Ok(()),
            Validation::Invalid(reasons) => Err(reasons),
        }
    }
}

impl FromIterator<Validation> for Validation {
    fn from_iter<I: IntoIterator<Item = Validation>>(iter: I) -> Self {
        Validation::all(iter)
    }
}
