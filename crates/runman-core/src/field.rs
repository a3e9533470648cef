//! Typed accessors for the sweepable fields of a pipeline object graph.
//!
//! Each pipeline type registers its mutable leaves once, keyed by the dotted
//! path below its root alias (for example `initiator.min_points`). The sweep
//! engine validates parameter paths against the registry before any run is
//! dispatched and uses the typed setters to apply a combination to a cloned
//! pipeline.

use std::collections::BTreeMap;

use crate::errors::{ErrorInfo, RunmanError};

/// Dynamic value carried by a parameter combination.
pub type ParamValue = serde_json::Value;

/// Conversion between a concrete field type and a [`ParamValue`].
pub trait ParamField: Sized {
    /// Human readable name of the accepted value kind.
    const KIND: &'static str;

    /// Converts a parameter value into the field type.
    fn from_param(value: &ParamValue) -> Option<Self>;

    /// Converts the field back into a parameter value.
    fn to_param(&self) -> ParamValue;
}

fn integral(value: &ParamValue) -> Option<i64> {
    if let Some(raw) = value.as_i64() {
        return Some(raw);
    }
    let float = value.as_f64()?;
    if float.fract() == 0.0 && float.is_finite() && float.abs() < i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

macro_rules! integer_field {
    ($($ty:ty),*) => {
        $(
            impl ParamField for $ty {
                const KIND: &'static str = stringify!($ty);

                fn from_param(value: &ParamValue) -> Option<Self> {
                    integral(value).and_then(|raw| <$ty>::try_from(raw).ok())
                }

                fn to_param(&self) -> ParamValue {
                    ParamValue::from(*self)
                }
            }
        )*
    };
}

integer_field!(u32, u64, usize, i64);

impl ParamField for f64 {
    const KIND: &'static str = "f64";

    fn from_param(value: &ParamValue) -> Option<Self> {
        value.as_f64()
    }

    fn to_param(&self) -> ParamValue {
        ParamValue::from(*self)
    }
}

impl ParamField for bool {
    const KIND: &'static str = "bool";

    fn from_param(value: &ParamValue) -> Option<Self> {
        value.as_bool()
    }

    fn to_param(&self) -> ParamValue {
        ParamValue::Bool(*self)
    }
}

impl ParamField for String {
    const KIND: &'static str = "string";

    fn from_param(value: &ParamValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn to_param(&self) -> ParamValue {
        ParamValue::String(self.clone())
    }
}

/// Assigns `value` to `slot`, reporting the expected kind on mismatch.
pub fn assign<F: ParamField>(slot: &mut F, value: &ParamValue) -> Result<(), &'static str> {
    *slot = F::from_param(value).ok_or(F::KIND)?;
    Ok(())
}

/// Getter and setter pair for one registered field.
pub struct FieldAccessor<T> {
    /// Reads the current field value.
    pub get: fn(&T) -> ParamValue,
    /// Overwrites the field, returning the expected kind on a type mismatch.
    pub set: fn(&mut T, &ParamValue) -> Result<(), &'static str>,
}

/// Registry of typed field accessors keyed by dotted path.
pub struct FieldRegistry<T> {
    fields: BTreeMap<&'static str, FieldAccessor<T>>,
}

impl<T> Default for FieldRegistry<T> {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }
}

impl<T> std::fmt::Debug for FieldRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("paths", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> FieldRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an accessor for `path`, replacing any previous entry.
    pub fn insert(&mut self, path: &'static str, accessor: FieldAccessor<T>) {
        self.fields.insert(path, accessor);
    }

    /// Returns true when `path` names a registered field.
    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    /// Iterates over every registered path in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when no field is registered.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reads the field at `path`.
    pub fn get(&self, target: &T, path: &str) -> Result<ParamValue, RunmanError> {
        let accessor = self.accessor(path)?;
        Ok((accessor.get)(target))
    }

    /// Overwrites the field at `path` with `value`.
    pub fn set(&self, target: &mut T, path: &str, value: &ParamValue) -> Result<(), RunmanError> {
        let accessor = self.accessor(path)?;
        (accessor.set)(target, value).map_err(|expected| {
            RunmanError::ParameterPath(
                ErrorInfo::new("parameter-value", "parameter value has the wrong type")
                    .with_context("path", path)
                    .with_context("expected", expected)
                    .with_context("value", value.to_string()),
            )
        })
    }

    fn accessor(&self, path: &str) -> Result<&FieldAccessor<T>, RunmanError> {
        self.fields.get(path).ok_or_else(|| {
            RunmanError::ParameterPath(
                ErrorInfo::new("parameter-path", "parameter path does not resolve")
                    .with_context("path", path),
            )
        })
    }
}

/// Types whose fields can be swept by dotted path.
pub trait Parameterised: Sized + 'static {
    /// Builds the registry of sweepable fields for this type.
    fn field_registry() -> FieldRegistry<Self>;
}

/// Builds a [`FieldRegistry`] for `Self` from `"path" => field.chain` pairs.
///
/// ```ignore
/// field_registry! {
///     "initiator.min_points" => initiator.min_points,
///     "deleter.covar_trace_thresh" => deleter.covar_trace_thresh,
/// }
/// ```
#[macro_export]
macro_rules! field_registry {
    ($($path:literal => $($field:ident).+),* $(,)?) => {{
        let mut registry = $crate::field::FieldRegistry::<Self>::new();
        $(
            registry.insert(
                $path,
                $crate::field::FieldAccessor {
                    get: |target: &Self| $crate::field::ParamField::to_param(&target.$($field).+),
                    set: |target: &mut Self, value: &$crate::field::ParamValue| {
                        $crate::field::assign(&mut target.$($field).+, value)
                    },
                },
            );
        )*
        registry
    }};
}
