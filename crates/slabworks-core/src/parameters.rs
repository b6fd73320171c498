//! String-keyed configuration for preconditioners and solvers.
//!
//! Keys are namespaced by a prefix naming the component they configure,
//! e.g. `"chebyshev: degree"` or `"solver: tolerance"`.
//! Components read the keys they know with [`ParameterList::get`]
//! and ignore the rest, warning about unknown keys in their own namespace
//! since those are most likely typos.

use std::collections::BTreeMap;

/// Error in reading a parameter.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// The parameter was set with a different type than the reader expects.
    #[error("Parameter '{key}' is a {found}, expected a {expected}")]
    TypeMismatch {
        /// The parameter's key.
        key: String,
        /// The type the reader asked for.
        expected: &'static str,
        /// The type the parameter was set with.
        found: &'static str,
    },
    /// The parameter has the right type but a value outside of its valid range.
    #[error("Invalid value {value} for parameter '{key}': {reason}")]
    InvalidValue {
        /// The parameter's key.
        key: String,
        /// The offending value, formatted.
        value: String,
        /// What was expected instead.
        reason: String,
    },
}

/// A single parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    Int(i64),
    #[allow(missing_docs)]
    Double(f64),
    #[allow(missing_docs)]
    Str(String),
}

impl ParameterValue {
    /// Name of the value's type for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d:e}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Types that can be read out of a [`ParameterList`].
pub trait FromParameter: Sized {
    /// Name of the type for error messages.
    const TYPE_NAME: &'static str;

    /// Convert a stored value, failing if it has an incompatible type.
    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError>;
}

fn mismatch<T: FromParameter>(key: &str, value: &ParameterValue) -> ParameterError {
    ParameterError::TypeMismatch {
        key: key.to_string(),
        expected: T::TYPE_NAME,
        found: value.type_name(),
    }
}

impl FromParameter for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError> {
        match value {
            ParameterValue::Bool(b) => Ok(*b),
            other => Err(mismatch::<Self>(key, other)),
        }
    }
}

impl FromParameter for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError> {
        match value {
            ParameterValue::Int(i) => Ok(*i),
            other => Err(mismatch::<Self>(key, other)),
        }
    }
}

impl FromParameter for usize {
    const TYPE_NAME: &'static str = "int";

    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError> {
        let i = i64::from_parameter(key, value)?;
        usize::try_from(i).map_err(|_| ParameterError::InvalidValue {
            key: key.to_string(),
            value: i.to_string(),
            reason: "expected a non-negative integer".to_string(),
        })
    }
}

impl FromParameter for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError> {
        match value {
            ParameterValue::Double(d) => Ok(*d),
            // integers are accepted where doubles are expected
            ParameterValue::Int(i) => Ok(*i as f64),
            other => Err(mismatch::<Self>(key, other)),
        }
    }
}

impl FromParameter for String {
    const TYPE_NAME: &'static str = "string";

    fn from_parameter(key: &str, value: &ParameterValue) -> Result<Self, ParameterError> {
        match value {
            ParameterValue::Str(s) => Ok(s.clone()),
            other => Err(mismatch::<Self>(key, other)),
        }
    }
}

/// A set of named parameters.
///
/// ```
/// # use slabworks_core::ParameterList;
/// let params = ParameterList::new()
///     .with("chebyshev: degree", 3)
///     .with("chebyshev: max eigenvalue", 2.5);
/// assert_eq!(params.get("chebyshev: degree", 1usize)?, 3);
/// assert_eq!(params.get("chebyshev: ratio eigenvalue", 30.0)?, 30.0);
/// # Ok::<(), slabworks_core::parameters::ParameterError>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterList {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Builder-style version of [`set`][Self::set].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Read a parameter, falling back to `default` if it isn't set.
    pub fn get<T: FromParameter>(&self, key: &str, default: T) -> Result<T, ParameterError> {
        match self.values.get(key) {
            Some(value) => T::from_parameter(key, value),
            None => Ok(default),
        }
    }

    /// The raw value of a parameter, if set.
    pub fn value(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key)
    }

    /// Whether a parameter is set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of parameters set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all parameters in key order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys starting with `prefix` that aren't in `known`.
    pub fn unrecognized<'a>(
        &'a self,
        prefix: &'a str,
        known: &'a [&'a str],
    ) -> impl 'a + Iterator<Item = &'a str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(move |key| key.starts_with(prefix) && !known.contains(key))
    }

    /// Log a warning for every key in the namespace `prefix`
    /// that isn't one of the `known` keys.
    pub fn warn_unrecognized(&self, prefix: &str, known: &[&str]) {
        for key in self.unrecognized(prefix, known) {
            log::warn!("Ignoring unrecognized parameter '{key}'");
        }
    }
}

impl std::fmt::Display for ParameterList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access_with_defaults() {
        let mut params = ParameterList::new();
        params
            .set("a: flag", false)
            .set("a: count", 4)
            .set("a: name", "power");

        assert_eq!(params.get("a: flag", true), Ok(false));
        assert_eq!(params.get("a: count", 0usize), Ok(4));
        assert_eq!(params.get("a: name", String::new()), Ok("power".to_string()));
        assert_eq!(params.get("a: missing", 1.5), Ok(1.5));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn integers_widen_to_doubles() {
        let params = ParameterList::new().with("x", 7);
        assert_eq!(params.get("x", 0.0), Ok(7.0));
    }

    #[test]
    fn type_mismatches() {
        let params = ParameterList::new().with("x", 2.5).with("n", -3);
        assert_eq!(
            params.get("x", 0usize),
            Err(ParameterError::TypeMismatch {
                key: "x".to_string(),
                expected: "int",
                found: "double",
            })
        );
        assert!(matches!(
            params.get("n", 0usize),
            Err(ParameterError::InvalidValue { .. })
        ));
        assert!(params.get("x", false).is_err());
    }

    #[test]
    fn unrecognized_keys_in_namespace() {
        let params = ParameterList::new()
            .with("chebyshev: degree", 2)
            .with("chebyshev: degre", 2)
            .with("solver: type", "cg");
        itertools::assert_equal(
            params.unrecognized("chebyshev: ", &["chebyshev: degree"]),
            ["chebyshev: degre"],
        );
    }

    #[test]
    fn display_lists_parameters() {
        let params = ParameterList::new().with("b", true).with("a", "cg");
        assert_eq!(params.to_string(), "a = \"cg\"\nb = true\n");
    }
}
