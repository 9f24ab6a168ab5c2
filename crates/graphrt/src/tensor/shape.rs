//! Declared shapes with wildcard dimensions and their resolution against element counts.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One dimension of a declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    /// Size determined per execution. Serialized as `-1`; any negative value parses as a wildcard.
    Wildcard,
}

impl Dim {
    /// Interprets a signed dimension, mapping negative values to [`Dim::Wildcard`].
    pub fn from_signed(value: i64) -> Self {
        if value < 0 {
            Dim::Wildcard
        } else {
            Dim::Fixed(value as usize)
        }
    }

    pub fn to_signed(self) -> i64 {
        match self {
            Dim::Fixed(size) => size as i64,
            Dim::Wildcard => -1,
        }
    }

    pub fn fixed(self) -> Option<usize> {
        match self {
            Dim::Fixed(size) => Some(size),
            Dim::Wildcard => None,
        }
    }

    pub fn is_wildcard(self) -> bool {
        matches!(self, Dim::Wildcard)
    }

    /// Returns true when both dims can describe the same concrete size.
    pub fn is_compatible_with(self, other: Dim) -> bool {
        match (self, other) {
            (Dim::Fixed(a), Dim::Fixed(b)) => a == b,
            _ => true,
        }
    }
}

impl From<usize> for Dim {
    fn from(size: usize) -> Self {
        Dim::Fixed(size)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(size) => write!(f, "{size}"),
            Dim::Wildcard => f.write_str("?"),
        }
    }
}

impl Serialize for Dim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_signed())
    }
}

impl<'de> Deserialize<'de> for Dim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Dim::from_signed)
    }
}

/// Why a declared shape could not be resolved against an element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The shape has no wildcard and its fixed product differs from the element count.
    Mismatch { expected: usize },
    /// The wildcard cannot be filled by exact division, or there is more than one wildcard.
    Indivisible,
    /// The fixed dimensions alone exceed the addressable element count.
    Overflow,
}

/// Number of elements in a dense tensor with `dims`, or `None` when the product overflows.
pub fn checked_element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// Ordered dimensions as recorded in a graph definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredShape {
    dims: Vec<Dim>,
}

impl DeclaredShape {
    pub fn new<D: Into<Vec<Dim>>>(dims: D) -> Self {
        DeclaredShape { dims: dims.into() }
    }

    /// Rank-0 shape describing a single element.
    pub fn scalar() -> Self {
        DeclaredShape { dims: Vec::new() }
    }

    /// Builds a shape from signed sizes where negative entries mark wildcards.
    pub fn from_signed(dims: &[i64]) -> Self {
        DeclaredShape {
            dims: dims.iter().copied().map(Dim::from_signed).collect(),
        }
    }

    pub fn from_resolved(dims: &[usize]) -> Self {
        DeclaredShape {
            dims: dims.iter().copied().map(Dim::Fixed).collect(),
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn to_signed(&self) -> Vec<i64> {
        self.dims.iter().map(|dim| dim.to_signed()).collect()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of every fixed dimension; wildcards are skipped. `None` on overflow.
    pub fn fixed_product(&self) -> Option<usize> {
        self.dims
            .iter()
            .filter_map(|dim| dim.fixed())
            .try_fold(1usize, |count, dim| count.checked_mul(dim))
    }

    pub fn wildcard_count(&self) -> usize {
        self.dims.iter().filter(|dim| dim.is_wildcard()).count()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.wildcard_count() == 0
    }

    /// Concrete dims when the shape has no wildcards.
    pub fn concrete(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(|dim| dim.fixed()).collect()
    }

    /// Resolves the shape for `element_count` elements.
    ///
    /// A single wildcard is filled with `element_count / fixed_product`, which must divide exactly.
    /// A zero fixed product resolves the wildcard to zero only for an empty payload.
    pub fn resolve(&self, element_count: usize) -> Result<Vec<usize>, ResolveError> {
        let fixed = self.fixed_product().ok_or(ResolveError::Overflow)?;
        let fill = match self.wildcard_count() {
            0 => {
                return if fixed == element_count {
                    Ok(self.concrete().unwrap_or_default())
                } else {
                    Err(ResolveError::Mismatch { expected: fixed })
                };
            }
            1 => {
                if fixed == 0 {
                    if element_count != 0 {
                        return Err(ResolveError::Indivisible);
                    }
                    0
                } else if element_count % fixed == 0 {
                    element_count / fixed
                } else {
                    return Err(ResolveError::Indivisible);
                }
            }
            _ => return Err(ResolveError::Indivisible),
        };

        let mut resolved = Vec::with_capacity(self.rank());
        resolved.extend(self.dims.iter().map(|dim| dim.fixed().unwrap_or(fill)));
        Ok(resolved)
    }

    /// Checks that `dims` is a concrete instance of this shape.
    pub fn accepts(&self, dims: &[usize]) -> bool {
        dims.len() == self.rank()
            && self
                .dims
                .iter()
                .zip(dims)
                .all(|(declared, actual)| declared.is_compatible_with(Dim::Fixed(*actual)))
    }

    /// Returns true when both shapes have the same rank and agree on every fixed dimension.
    pub fn is_compatible_with(&self, other: &DeclaredShape) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(&other.dims)
                .all(|(a, b)| a.is_compatible_with(*b))
    }
}

impl From<Vec<Dim>> for DeclaredShape {
    fn from(dims: Vec<Dim>) -> Self {
        DeclaredShape { dims }
    }
}

impl fmt::Display for DeclaredShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
