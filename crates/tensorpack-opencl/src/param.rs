//! Layer parameters as a tagged variant.
//!
//! Accelerators receive a [`LayerParam`] and recover their own parameters
//! through the typed accessors, which fail with a configuration error when
//! the layer kind does not match.

use std::fmt;

use tensorpack_common::dims::DimsVector;
use tensorpack_common::{AccError, AccResult};

use crate::axis::resolve_axes;

/// Reduction operator computed by the `"reduce"` program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceKind {
    #[default]
    Sum,
    Mean,
    Max,
    Min,
    Prod,
    L1,
    L2,
    LogSum,
    LogSumExp,
    SumSquare,
}

impl ReduceKind {
    pub const ALL: [ReduceKind; 10] = [
        Self::Sum,
        Self::Mean,
        Self::Max,
        Self::Min,
        Self::Prod,
        Self::L1,
        Self::L2,
        Self::LogSum,
        Self::LogSumExp,
        Self::SumSquare,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Min => "min",
            Self::Prod => "prod",
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::LogSum => "log_sum",
            Self::LogSumExp => "log_sum_exp",
            Self::SumSquare => "sum_square",
        }
    }
}

impl fmt::Display for ReduceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ReduceKind {
    type Err = AccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AccError::config(format!("unknown reduce kind: {s}")))
    }
}

/// Parameters of a reduce layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceLayerParam {
    pub name: String,
    pub kind: ReduceKind,
    /// Axes to reduce; negative values count from the back.
    pub axis: Vec<i32>,
    /// Keep reduced axes as size-1 dims instead of removing them.
    pub keep_dims: bool,
}

impl ReduceLayerParam {
    pub fn new(name: impl Into<String>, kind: ReduceKind, axis: Vec<i32>, keep_dims: bool) -> Self {
        Self { name: name.into(), kind, axis, keep_dims }
    }

    /// Normalized, de-duplicated axes for an input of the given rank.
    pub fn resolve_axes(&self, rank: usize) -> AccResult<Vec<usize>> {
        resolve_axes(&self.axis, rank)
    }
}

/// Parameters of a reshape (layout conversion) layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshapeLayerParam {
    pub name: String,
    /// 0 reshapes in NCHW element order; other orders are not supported.
    pub reshape_type: i32,
    pub axis: i32,
    pub num_axes: i32,
    /// Target shape: 0 copies the input dim, a single -1 is inferred.
    pub shape: Vec<i32>,
}

impl ReshapeLayerParam {
    /// Plain reshape of the whole tensor onto `target`.
    pub fn to_dims(name: impl Into<String>, target: &[usize]) -> AccResult<Self> {
        let shape = target
            .iter()
            .map(|&d| {
                i32::try_from(d).map_err(|_| AccError::config(format!("dim {d} exceeds i32")))
            })
            .collect::<AccResult<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            reshape_type: 0,
            axis: 0,
            num_axes: target.len() as i32,
            shape,
        })
    }

    /// Concrete output dims for `input`, resolving 0 and -1 entries.
    pub fn resolve_shape(&self, input: &[usize]) -> AccResult<DimsVector> {
        if self.reshape_type != 0 {
            return Err(AccError::config(format!(
                "{}: unsupported reshape_type {}",
                self.name, self.reshape_type
            )));
        }
        if self.axis != 0 || self.num_axes as usize != self.shape.len() {
            return Err(AccError::config(format!(
                "{}: partial-axis reshape (axis={}, num_axes={}) is not supported",
                self.name, self.axis, self.num_axes
            )));
        }

        let total: usize = input.iter().product();
        let mut dims = Vec::with_capacity(self.shape.len());
        let mut infer_at = None;
        for (i, &s) in self.shape.iter().enumerate() {
            match s {
                0 => dims.push(input.get(i).copied().ok_or_else(|| {
                    AccError::config(format!("{}: no input dim to copy at {i}", self.name))
                })?),
                -1 if infer_at.is_none() => {
                    infer_at = Some(i);
                    dims.push(1);
                }
                d if d > 0 => dims.push(d as usize),
                d => {
                    return Err(AccError::config(format!(
                        "{}: invalid target dim {d} at {i}",
                        self.name
                    )))
                }
            }
        }

        let known: usize = dims.iter().product();
        if let Some(i) = infer_at {
            if known == 0 || total % known != 0 {
                return Err(AccError::config(format!(
                    "{}: cannot infer dim {i} of {total} elements",
                    self.name
                )));
            }
            dims[i] = total / known;
        } else if known != total {
            return Err(AccError::config(format!(
                "{}: target holds {known} elements, input holds {total}",
                self.name
            )));
        }
        Ok(dims)
    }
}

/// Parameters of any layer an accelerator can be initialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerParam {
    Reduce(ReduceLayerParam),
    Reshape(ReshapeLayerParam),
}

impl LayerParam {
    pub fn layer_name(&self) -> &str {
        match self {
            Self::Reduce(p) => &p.name,
            Self::Reshape(p) => &p.name,
        }
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Reduce(_) => "reduce",
            Self::Reshape(_) => "reshape",
        }
    }

    pub fn as_reduce(&self) -> AccResult<&ReduceLayerParam> {
        match self {
            Self::Reduce(p) => Ok(p),
            other => Err(AccError::config(format!(
                "{}: expected reduce parameters, got {}",
                other.layer_name(),
                other.kind_name()
            ))),
        }
    }

    pub fn as_reshape(&self) -> AccResult<&ReshapeLayerParam> {
        match self {
            Self::Reshape(p) => Ok(p),
            other => Err(AccError::config(format!(
                "{}: expected reshape parameters, got {}",
                other.layer_name(),
                other.kind_name()
            ))),
        }
    }
}
