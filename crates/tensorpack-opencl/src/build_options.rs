//! Program build options for the reduce kernels.
//!
//! The `"reduce"` program is specialized at build time: precision defines
//! select the storage type, and operator defines plug the reduction into
//! the shared accumulate / combine-lanes / finalize skeleton.

use std::collections::BTreeSet;

use tensorpack_common::Precision;

use crate::param::ReduceKind;

/// Ordered, de-duplicated `-D` options passed to the program compiler.
pub type BuildOptions = BTreeSet<String>;

/// Precision defines shared by every packed-image program.
pub fn precision_options(precision: Precision) -> BuildOptions {
    let (float, read, write) = match precision {
        Precision::High => ("float", "read_imagef", "write_imagef"),
        Precision::Normal | Precision::Low => ("half", "read_imageh", "write_imageh"),
    };
    [
        format!("-DFLOAT={float}"),
        format!("-DFLOAT4={float}4"),
        format!("-DRI_F={read}"),
        format!("-DWI_F={write}"),
    ]
    .into_iter()
    .collect()
}

/// Operator defines for one reduction kind.
///
/// `DATAINIT` seeds the accumulator, `OPERATOR(r,t)` folds one packed value
/// in, `INNEROPERATOR(r)` folds the four lanes of a texel together and
/// `POSTOPERATOR(r,n)` finalizes over `n` reduced elements.
pub fn operator_options(kind: ReduceKind) -> BuildOptions {
    const LANE_SUM: &str = "r.x+r.y+r.z+r.w";
    let (init, op, inner, post) = match kind {
        ReduceKind::Sum => ("0", "r=r+t", LANE_SUM, "(r)"),
        ReduceKind::Mean => ("0", "r=r+t", LANE_SUM, "(r)/(FLOAT)(n)"),
        ReduceKind::Max => (
            "-MAXFLOAT",
            "r=fmax(r,t)",
            "fmax(fmax(r.x,r.y),fmax(r.z,r.w))",
            "(r)",
        ),
        ReduceKind::Min => (
            "MAXFLOAT",
            "r=fmin(r,t)",
            "fmin(fmin(r.x,r.y),fmin(r.z,r.w))",
            "(r)",
        ),
        ReduceKind::Prod => ("1", "r=r*t", "r.x*r.y*r.z*r.w", "(r)"),
        ReduceKind::L1 => ("0", "r=r+fabs(t)", LANE_SUM, "(r)"),
        ReduceKind::L2 => ("0", "r=r+t*t", LANE_SUM, "sqrt(r)"),
        ReduceKind::LogSum => ("0", "r=r+t", LANE_SUM, "log(r)"),
        ReduceKind::LogSumExp => ("0", "r=r+exp(t)", LANE_SUM, "log(r)"),
        ReduceKind::SumSquare => ("0", "r=r+t*t", LANE_SUM, "(r)"),
    };
    [
        format!("-DDATAINIT={init}"),
        format!("-DOPERATOR(r,t)={op}"),
        format!("-DINNEROPERATOR(r)={inner}"),
        format!("-DPOSTOPERATOR(r,n)={post}"),
    ]
    .into_iter()
    .collect()
}

/// Full option set for a reduce kernel build.
pub fn reduce_build_options(precision: Precision, kind: ReduceKind) -> BuildOptions {
    let mut options = precision_options(precision);
    options.extend(operator_options(kind));
    options
}
