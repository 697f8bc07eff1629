//! Named type converters between stored and native field values.
//!
//! Every declared field names a converter. When a raw record is hydrated the
//! converter maps the stored representation to the native one, and when a
//! document is saved it maps the native value back.
//!
//! Converters are registered by name as factories. The first lookup of a
//! name builds the converter and caches it; later lookups return the same
//! shared instance until the name is removed or the registry is reset.

mod builtin;

pub use builtin::{
    BinDataType, BooleanType, DateType, FloatType, IntegerType, RawType, SerializedType,
    StringType,
};

use crate::error::{CoreError, CoreResult};
use docmap_codec::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Placeholder for the source expression in converter templates.
pub const FROM_PLACEHOLDER: &str = "%from%";
/// Placeholder for the target expression in converter templates.
pub const TO_PLACEHOLDER: &str = "%to%";

/// Converts field values between their stored and native representations.
///
/// Besides the programmatic conversion, a converter describes itself as a
/// template with `%from%` and `%to%` placeholders. Templates are used to
/// render conversion snippets for diagnostics and schema dumps.
///
/// # Example
///
/// ```rust,ignore
/// struct CentsType;
///
/// impl TypeConverter for CentsType {
///     fn to_store(&self, value: &Value) -> CoreResult<Value> {
///         match value {
///             Value::Float(f) => Ok(Value::Integer((f * 100.0).round() as i64)),
///             other => Err(CoreError::conversion("cents", other.kind())),
///         }
///     }
///     // ...
/// }
///
/// registry.add("cents", || Box::new(CentsType))?;
/// ```
pub trait TypeConverter: Send + Sync {
    /// Converts a native value to its stored form.
    fn to_store(&self, value: &Value) -> CoreResult<Value>;

    /// Converts a stored value to its native form.
    fn to_native(&self, value: &Value) -> CoreResult<Value>;

    /// Template of the store conversion.
    fn to_store_template(&self) -> &str;

    /// Template of the native conversion.
    fn to_native_template(&self) -> &str;

    /// Renders the store template for concrete expressions.
    fn to_store_in_string(&self, from: &str, to: &str) -> String {
        render_template(self.to_store_template(), from, to)
    }

    /// Renders the native template for concrete expressions.
    fn to_native_in_string(&self, from: &str, to: &str) -> String {
        render_template(self.to_native_template(), from, to)
    }
}

/// Substitutes the `%from%` and `%to%` placeholders of a template.
#[must_use]
pub fn render_template(template: &str, from: &str, to: &str) -> String {
    template
        .replace(FROM_PLACEHOLDER, from)
        .replace(TO_PLACEHOLDER, to)
}

type Factory = Arc<dyn Fn() -> Box<dyn TypeConverter> + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    factories: BTreeMap<String, Factory>,
    instances: HashMap<String, Arc<dyn TypeConverter>>,
}

/// Registry of named type converters.
///
/// A registry is shared by every session that uses it; wrap it in an `Arc`.
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

impl TypeRegistry {
    /// Creates a registry holding the built-in converters.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.install_builtins();
        registry
    }

    /// Creates a registry without any converter.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Returns true if a converter is registered under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.state.read().factories.contains_key(name)
    }

    /// Registers a converter factory.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the name is taken, or `InvalidArgument`
    /// when the name is empty or contains anything but lowercase ASCII
    /// letters, digits and underscores.
    pub fn add<F>(&self, name: &str, factory: F) -> CoreResult<()>
    where
        F: Fn() -> Box<dyn TypeConverter> + Send + Sync + 'static,
    {
        validate_name(name)?;
        let mut state = self.state.write();
        if state.factories.contains_key(name) {
            return Err(CoreError::already_exists(format!("type {name}")));
        }
        state.factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Returns the shared converter registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no converter is registered under the name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn TypeConverter>> {
        if let Some(instance) = self.state.read().instances.get(name) {
            return Ok(Arc::clone(instance));
        }

        let mut state = self.state.write();
        // Another thread may have built it between the two locks.
        if let Some(instance) = state.instances.get(name) {
            return Ok(Arc::clone(instance));
        }
        let factory = state
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("type {name}")))?;
        let instance: Arc<dyn TypeConverter> = Arc::from(factory());
        state
            .instances
            .insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Removes a converter and its cached instance.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no converter is registered under the name.
    pub fn remove(&self, name: &str) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.factories.remove(name).is_none() {
            return Err(CoreError::not_found(format!("type {name}")));
        }
        state.instances.remove(name);
        Ok(())
    }

    /// Restores the built-in converters, dropping custom ones and every
    /// cached instance.
    pub fn reset(&self) {
        *self.state.write() = RegistryState::default();
        self.install_builtins();
    }

    /// Registered converter names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.state.read().factories.keys().cloned().collect()
    }

    /// Converts a native value with the named converter. Nulls pass through.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown converter or the converter's error.
    pub fn to_store(&self, name: &str, value: &Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.get(name)?.to_store(value)
    }

    /// Converts a stored value with the named converter. Nulls pass through.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown converter or the converter's error.
    pub fn to_native(&self, name: &str, value: &Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.get(name)?.to_native(value)
    }

    fn install_builtins(&self) {
        let mut state = self.state.write();
        let builtins: [(&str, Factory); 8] = [
            ("boolean", builtin::<BooleanType>()),
            ("integer", builtin::<IntegerType>()),
            ("float", builtin::<FloatType>()),
            ("string", builtin::<StringType>()),
            ("date", builtin::<DateType>()),
            ("bin_data", builtin::<BinDataType>()),
            ("raw", builtin::<RawType>()),
            ("serialized", builtin::<SerializedType>()),
        ];
        for (name, factory) in builtins {
            state.factories.insert(name.to_string(), factory);
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}

fn builtin<T: TypeConverter + Default + 'static>() -> Factory {
    Arc::new(|| -> Box<dyn TypeConverter> { Box::new(T::default()) })
}

fn validate_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid_argument(format!(
            "type name {name:?} must match [a-z0-9_]+"
        )))
    }
}
