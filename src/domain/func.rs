//! Affine per-dimension index remaps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One dimension of a [`DomainFn`]: `i -> scale * i + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainFnDim {
    pub offset: i64,
    pub scale: i64,
}

impl DomainFnDim {
    pub fn new(offset: i64, scale: i64) -> Self {
        Self { offset, scale }
    }

    pub fn apply(&self, i: i64) -> i64 {
        self.scale * i + self.offset
    }
}

/// An affine index remap. Stencil reads `x@[(-1, 1)]` address `x[i - 1]`,
/// `x@[(1, 2)]` addresses `x[2i + 1]` (downsampling), and a compose piece
/// keyed by `[(1, 2)]` scatters its value to the odd output indices
/// (upsampling).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DomainFn {
    pub dims: Vec<DomainFnDim>,
}

impl DomainFn {
    pub fn new(dims: Vec<DomainFnDim>) -> Self {
        Self { dims }
    }

    /// Identity remap of `n` dimensions.
    pub fn identity(n_dim: usize) -> Self {
        Self {
            dims: vec![DomainFnDim::new(0, 1); n_dim],
        }
    }

    /// Unit-scale offsets, the common stencil neighbourhood read.
    pub fn offsets(offsets: &[i64]) -> Self {
        Self {
            dims: offsets.iter().map(|&o| DomainFnDim::new(o, 1)).collect(),
        }
    }

    /// `(offset, scale)` pairs.
    pub fn scaled(pairs: &[(i64, i64)]) -> Self {
        Self {
            dims: pairs.iter().map(|&(o, s)| DomainFnDim::new(o, s)).collect(),
        }
    }

    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    pub fn is_identity(&self) -> bool {
        self.dims.iter().all(|d| d.offset == 0 && d.scale == 1)
    }

    pub fn apply(&self, index: &[i64]) -> Vec<i64> {
        self.dims.iter().zip(index).map(|(d, &i)| d.apply(i)).collect()
    }
}

impl fmt::Display for DomainFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| match (d.scale, d.offset) {
                (1, 0) => "i".to_string(),
                (1, o) if o < 0 => format!("i - {}", -o),
                (1, o) => format!("i + {}", o),
                (s, 0) => format!("{}i", s),
                (s, o) if o < 0 => format!("{}i - {}", s, -o),
                (s, o) => format!("{}i + {}", s, o),
            })
            .collect();
        write!(f, "@[{}]", parts.join(", "))
    }
}
