//! Measures are the named, typed quantities producers record values against.
//!
//! A [`Measure`] is created once through a [`MeasureRegistry`] and then used to build
//! [`Measurement`]s with [`Measure::m`]. Views reference the type-erased [`MeasureDescriptor`].

use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use parking_lot::RwLock;

use crate::{
    error::{Result, StatsError},
    private::Sealed,
};

/// The numeric kind of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Int64,
    Float64,
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int64"),
            Self::Float64 => write!(f, "float64"),
        }
    }
}

/// A single recorded value, tagged with the numeric kind of its measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    /// The value as a float, the representation used by exporters.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub(crate) fn zero(kind: NumericKind) -> Self {
        match kind {
            NumericKind::Int64 => Self::Int(0),
            NumericKind::Float64 => Self::Float(0.0),
        }
    }

    /// Adds `other` to this value. Integer sums saturate instead of wrapping.
    pub(crate) fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Self::Int(a.saturating_add(b)),
            (a, b) => Self::Float(a.as_f64() + b.as_f64()),
        }
    }
}

/// A marker trait for numbers that can back a measure.
/// Supported types: `i64`, `f64`
pub trait MeasureNumber: Copy + Send + Sync + 'static + Sealed {
    /// The numeric kind of measures backed by this type.
    const KIND: NumericKind;

    fn into_value(self) -> Value;
}

impl MeasureNumber for i64 {
    const KIND: NumericKind = NumericKind::Int64;

    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl MeasureNumber for f64 {
    const KIND: NumericKind = NumericKind::Float64;

    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

/// Internal conversion trait to allow ergonomic value passing (e.g., `u32`, `usize`).
/// This enables library users to call `measure.m(queue.len())` without manual casts.
pub trait IntoNumber<T>: Sealed {
    fn into_number(self) -> T;
}

impl<T: Sealed> IntoNumber<T> for T {
    #[inline]
    fn into_number(self) -> T {
        self
    }
}

/// Macro to implement `IntoNumber<Out>` for a type `In`.
macro_rules! impl_into_number {
    ($in_ty:ty => $out_ty:ty) => {
        impl $crate::measure::IntoNumber<$out_ty> for $in_ty {
            #[inline]
            fn into_number(self) -> $out_ty {
                self as $out_ty
            }
        }
    };
}

// auto casts to i64
impl_into_number!(i32 => i64);
impl_into_number!(u32 => i64);
impl_into_number!(usize => i64);

// auto casts to f64
impl_into_number!(i32 => f64);
impl_into_number!(u32 => f64);
impl_into_number!(usize => f64);
impl_into_number!(f32 => f64);

/// The type-erased description of a measure, shared between the registry, measure handles and
/// views.
#[derive(Debug, PartialEq, Eq)]
pub struct MeasureDescriptor {
    name: String,
    description: String,
    unit: String,
    kind: NumericKind,
}

impl MeasureDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> NumericKind {
        self.kind
    }
}

/// A typed handle to a registered measure. Cheap to clone.
#[derive(Debug)]
pub struct Measure<N: MeasureNumber> {
    desc: Arc<MeasureDescriptor>,
    _number: PhantomData<fn() -> N>,
}

impl<N: MeasureNumber> Clone for Measure<N> {
    fn clone(&self) -> Self {
        Self { desc: Arc::clone(&self.desc), _number: PhantomData }
    }
}

impl<N: MeasureNumber> Measure<N> {
    /// Create a measurement of this measure with the given value.
    pub fn m(&self, value: impl IntoNumber<N>) -> Measurement {
        Measurement { measure: Arc::clone(&self.desc), value: value.into_number().into_value() }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn descriptor(&self) -> &Arc<MeasureDescriptor> {
        &self.desc
    }
}

/// A value recorded against a measure. Built with [`Measure::m`] and consumed by
/// [`crate::Recorder::record`].
#[derive(Debug, Clone)]
pub struct Measurement {
    measure: Arc<MeasureDescriptor>,
    value: Value,
}

impl Measurement {
    pub fn measure(&self) -> &MeasureDescriptor {
        &self.measure
    }

    pub fn value(&self) -> Value {
        self.value
    }

    pub(crate) fn descriptor(&self) -> &Arc<MeasureDescriptor> {
        &self.measure
    }
}

/// An append-only registry of measures, keyed by name.
///
/// Cloning the registry yields another handle to the same set of measures.
#[derive(Debug, Clone, Default)]
pub struct MeasureRegistry {
    measures: Arc<RwLock<HashMap<String, Arc<MeasureDescriptor>>>>,
}

impl MeasureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new measure. The numeric kind follows the type parameter:
    ///
    /// ```rust
    /// use statsview::MeasureRegistry;
    ///
    /// let registry = MeasureRegistry::new();
    /// let latency = registry.define::<f64>("my.org/measures/latency", "request latency", "ms")?;
    /// let videos = registry.define::<i64>("my.org/measures/video_count", "processed videos", "")?;
    /// # Ok::<_, statsview::StatsError>(())
    /// ```
    pub fn define<N: MeasureNumber>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Result<Measure<N>> {
        let name = name.into();
        if name.is_empty() {
            return Err(StatsError::InvalidName(name));
        }

        let mut measures = self.measures.write();
        if measures.contains_key(&name) {
            return Err(StatsError::DuplicateMeasure(name));
        }

        let desc = Arc::new(MeasureDescriptor {
            name: name.clone(),
            description: description.into(),
            unit: unit.into(),
            kind: N::KIND,
        });
        measures.insert(name, Arc::clone(&desc));

        Ok(Measure { desc, _number: PhantomData })
    }

    /// Look up a measure by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<MeasureDescriptor>> {
        self.measures
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StatsError::MeasureNotFound(name.to_owned()))
    }

    /// Whether `desc` is the exact descriptor registered here under its name.
    pub(crate) fn contains(&self, desc: &Arc<MeasureDescriptor>) -> bool {
        self.measures.read().get(desc.name()).is_some_and(|known| Arc::ptr_eq(known, desc))
    }
}
