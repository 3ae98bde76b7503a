//! Typed properties attached to nodes and their ports

use std::fmt;

use super::errors::PropertyError;

/// Framework-reserved name of the timebase rate property
pub const PROP_TICK_RATE: &str = "tick_rate";

/// Where a property lives and where its value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Set by the host through the public API
    User,
    /// Internal to the block, shared by all of its ports
    Block,
    /// Attached to an input port; forwarded from the connected upstream port
    InputEdge(usize),
    /// Attached to an output port; forwarded from the connected downstream port
    OutputEdge(usize),
}

impl Scope {
    pub fn is_edge(&self) -> bool {
        matches!(self, Scope::InputEdge(_) | Scope::OutputEdge(_))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scope::User => write!(f, "user"),
            Scope::Block => write!(f, "block"),
            Scope::InputEdge(port) => write!(f, "input edge {}", port),
            Scope::OutputEdge(port) => write!(f, "output edge {}", port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    F64,
    I64,
    Bool,
    Str,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PropertyType::F64 => "f64",
            PropertyType::I64 => "i64",
            PropertyType::Bool => "bool",
            PropertyType::Str => "string",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    F64(f64),
    I64(i64),
    Bool(bool),
    Str(String),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::F64(_) => PropertyType::F64,
            PropertyValue::I64(_) => PropertyType::I64,
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Str(_) => PropertyType::Str,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropertyValue::F64(v) => write!(f, "{}", v),
            PropertyValue::I64(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Str(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// Rust types that can be stored in a property
pub trait PropertyData: Sized + Clone + Send + 'static {
    const TYPE: PropertyType;

    fn into_value(self) -> PropertyValue;

    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_property_data {
    ($ty:ty, $variant:ident) => {
        impl PropertyData for $ty {
            const TYPE: PropertyType = PropertyType::$variant;

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_property_data!(f64, F64);
impl_property_data!(i64, I64);
impl_property_data!(bool, Bool);
impl_property_data!(String, Str);

/// Identifies a property within one node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub name: String,
    pub scope: Scope,
}

impl PropertyKey {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.scope)
    }
}

/// A named, typed, mutable value owned by a node
#[derive(Debug, Clone)]
pub struct PropertyEdge {
    key: PropertyKey,
    ty: PropertyType,
    value: Option<PropertyValue>,
    dirty: bool,
}

impl PropertyEdge {
    /// Create an unset property of type `T`
    pub fn new<T: PropertyData>(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            key: PropertyKey::new(name, scope),
            ty: T::TYPE,
            value: None,
            dirty: false,
        }
    }

    /// Create a property with an initial value. The initial value counts as
    /// a pending change, so the first resolve pass propagates it.
    pub fn with_value<T: PropertyData>(name: impl Into<String>, scope: Scope, value: T) -> Self {
        Self {
            key: PropertyKey::new(name, scope),
            ty: T::TYPE,
            value: Some(value.into_value()),
            dirty: true,
        }
    }

    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn scope(&self) -> Scope {
        self.key.scope
    }

    pub fn property_type(&self) -> PropertyType {
        self.ty
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    pub fn get<T: PropertyData>(&self) -> Option<T> {
        self.value.as_ref().and_then(T::from_value)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Store a new value. Returns true if the value changed, in which case
    /// the property is marked dirty.
    pub(crate) fn update(&mut self, value: PropertyValue) -> Result<bool, PropertyError> {
        if value.property_type() != self.ty {
            return Err(PropertyError::TypeMismatch {
                name: self.key.name.clone(),
                expected: self.ty,
                actual: value.property_type(),
            });
        }
        if self.value.as_ref() == Some(&value) {
            return Ok(false);
        }
        self.value = Some(value);
        self.dirty = true;
        Ok(true)
    }
}
