//! Layer-normalization data constructions.
//!
//! Forward: each row is built from adjacent pairs whose sum is exactly
//! `2 * mean`, so the row mean is exact under any summation order and the
//! variance accumulates without rounding. Values vary only in their low
//! `flex_bits` mantissa bits.
//!
//! Backward: every non-sparsified row hits two accumulation targets
//! exactly, `sum(d_dst * scale)` and `sum(d_dst * (src - mean) * scale)`.
//! All but the last two elements are generated greedily and the last two
//! are solved from a 2x2 linear system.

use dnncheck_common::lnorm::Problem;
use dnncheck_common::{CheckAlg, DataType, RefBuffer, log2_ceil};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{FillError, Result, check_len};
use crate::hash::{flip_coin, truncate_mantissa};

const MIN_FLEX_BITS: i64 = 3;

// ── Forward ────────────────────────────────────────────────────────

/// Resolved forward construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FwdPlan {
    /// Either [`CheckAlg::Alg0`] or [`CheckAlg::Alg1`], never `Auto`.
    pub alg: CheckAlg,
    pub flex_bits: u32,
    /// Fraction of non-zero pairs under `Alg0`; 1 under `Alg1`.
    pub density: f32,
}

/// Choose the forward construction for `prb`, or report that none exists.
pub fn plan_fwd(prb: &Problem) -> Result<FwdPlan> {
    let exact_bits = prb.dt.digits() as i64;
    let l = prb.c();
    let log_l = log2_ceil(l as u64) as i64;
    let want_flex_bits = 6.min(exact_bits / 2);

    let alg = match prb.check_alg {
        CheckAlg::Auto => {
            if (exact_bits - log_l) / 2 - 1 >= MIN_FLEX_BITS {
                CheckAlg::Alg1
            } else {
                CheckAlg::Alg0
            }
        }
        alg => alg,
    };

    let flex_bits = if alg == CheckAlg::Alg0 {
        want_flex_bits
    } else {
        // bf16 stores only 7 explicit mantissa bits.
        let cap = if prb.dt == DataType::Bf16 { 7 } else { exact_bits };
        cap.min((exact_bits - log_l) / 2 - 1)
    };

    if flex_bits < MIN_FLEX_BITS {
        return Err(FillError::infeasible(format!(
            "{alg} leaves {flex_bits} flex bits for {} with C={l}, need at least {MIN_FLEX_BITS}",
            prb.dt
        )));
    }

    let density = if alg == CheckAlg::Alg0 {
        (1u64 << (exact_bits - 2 * flex_bits)) as f32 / l as f32
    } else {
        1.0
    };

    let plan = FwdPlan { alg, flex_bits: flex_bits as u32, density };
    debug!(check_alg = %plan.alg, density = plan.density, flex_bits = plan.flex_bits, "lnorm fwd fill plan");
    Ok(plan)
}

/// Fill `src`, `mean` and `var` for a forward case and the per-channel
/// `scale` and `shift` vectors. `scale`/`shift` hold identity values when
/// the corresponding flag is off.
pub fn fill_fwd(
    prb: &Problem,
    src: &mut RefBuffer,
    mean: &mut RefBuffer,
    var: &mut RefBuffer,
    scale: &mut RefBuffer,
    shift: &mut RefBuffer,
) -> Result<FwdPlan> {
    let (n, c) = (prb.n(), prb.c());
    check_len("src", n * c, src.nelems())?;
    check_len("mean", n, mean.nelems())?;
    check_len("var", n, var.nelems())?;
    check_len("scale", c, scale.nelems())?;
    check_len("shift", c, shift.nelems())?;

    let plan = plan_fwd(prb)?;
    let alg0 = plan.alg == CheckAlg::Alg0;
    let flex_mask = (1i64 << plan.flex_bits) - 1;
    let flex_div = (1i64 << plan.flex_bits) as f32;
    let odd_len = c % 2 == 1;

    src.as_mut_slice()
        .par_chunks_mut(c)
        .zip(mean.as_mut_slice().par_iter_mut())
        .zip(var.as_mut_slice().par_iter_mut())
        .enumerate()
        .for_each(|(row, ((s, mean_out), var_out))| {
            let m = if alg0 { 0.0 } else { 0.25 * (1u32 << (row % 7)) as f32 };
            let mut v = 0.0f32;
            for (ch, value) in s.iter_mut().enumerate() {
                // The row base is even so pairs never straddle rows.
                let l = (ch + row * 239 * 2) as i64;
                if alg0 && !flip_coin((l / 2 * 257) as u64, plan.density) {
                    *value = 0.0;
                    continue;
                }
                let g = (l / 2 * 1637) & flex_mask;
                let sgn = if l % 2 == 0 { 1.0 } else { -1.0 };
                let f = sgn * g as f32 / flex_div;
                *value = if alg0 { f } else { m * (1.0 + f) };
                if odd_len && ch == c - 1 {
                    *value = m;
                }
                v += (*value - m) * (*value - m);
            }
            *mean_out = m;
            *var_out = v / c as f32;
        });

    fill_scale_shift(prb, scale, shift, |ch, sc| (ch % 3 + 1) as f32 * sc / 64.0);
    Ok(plan)
}

fn fill_scale_shift(
    prb: &Problem,
    scale: &mut RefBuffer,
    shift: &mut RefBuffer,
    shift_of: impl Fn(usize, f32) -> f32,
) {
    let use_sc = prb.use_ss() || prb.use_sc();
    let use_sh = prb.use_ss() || prb.use_sh();
    for ch in 0..prb.c() {
        let sc = (1u32 << (ch % 7)) as f32 / 8.0;
        scale.set(ch, if use_sc { sc } else { 1.0 });
        shift.set(ch, if use_sh { shift_of(ch, sc) } else { 0.0 });
    }
}

// ── Backward ───────────────────────────────────────────────────────

const BWD_EXACT_BITS: i64 = 24;
const MAX_K: u32 = 4;
const PARAM_DD_P2: usize = 7;
const PARAM_DD_GEN: usize = 32;
const PARAM_F_P2: usize = 1;
const PARAM_F_GEN: usize = 16;

/// Split `l` into `(k, p)` with `l == 2^k * p` and `p` odd.
pub fn decompose2(l: usize) -> (u32, usize) {
    if l == 0 {
        return (0, 0);
    }
    let k = l.trailing_zeros();
    (k, l >> k)
}

/// Resolved backward construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BwdPlan {
    pub k: u32,
    pub p: usize,
    pub log2_p: u32,
    /// Fraction of rows that keep non-zero gradients.
    pub density: f32,
}

/// Per-row accumulation targets reached exactly by [`fill_bwd`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowTargets {
    /// `sum_c d_dst[c] * scale[c]`
    pub dd_gamma: f32,
    /// `sum_c d_dst[c] * (src[c] - mean) * scale[c]`
    pub dd_gamma_x: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BwdFill {
    pub plan: BwdPlan,
    /// `None` for rows that were zeroed for sparsity.
    pub targets: Vec<Option<RowTargets>>,
}

pub fn plan_bwd(prb: &Problem) -> Result<BwdPlan> {
    let l = prb.c();
    if l < 2 {
        return Err(FillError::infeasible(format!("backward fill needs C >= 2, got C={l}")));
    }

    let (mut k, mut p) = decompose2(l);
    let mut log2_p = log2_ceil(p as u64);
    if log2_p as i64 >= BWD_EXACT_BITS {
        return Err(FillError::infeasible(format!(
            "odd factor {p} of C={l} needs {log2_p} bits, more than {BWD_EXACT_BITS}"
        )));
    }

    if k > MAX_K && BWD_EXACT_BITS - log2_p as i64 > MAX_K as i64 + 4 {
        log2_p += k - MAX_K;
        p <<= k - MAX_K;
        k = MAX_K;
    }

    let density = if prb.flags.any_affine() { (10.0 / prb.n() as f32).min(1.0) } else { 1.0 };

    let plan = BwdPlan { k, p, log2_p, density };
    debug!(k, p, log2_p, density, "lnorm bwd fill plan");
    Ok(plan)
}

/// Fill a backward case. Rows are generated sequentially; the sparsity
/// pattern never touches the first or the last row.
pub fn fill_bwd(
    prb: &Problem,
    src: &mut RefBuffer,
    d_dst: &mut RefBuffer,
    mean: &mut RefBuffer,
    var: &mut RefBuffer,
    scale: &mut RefBuffer,
    shift: &mut RefBuffer,
) -> Result<BwdFill> {
    let (n, c) = (prb.n(), prb.c());
    check_len("src", n * c, src.nelems())?;
    check_len("d_dst", n * c, d_dst.nelems())?;
    check_len("mean", n, mean.nelems())?;
    check_len("var", n, var.nelems())?;
    check_len("scale", c, scale.nelems())?;
    check_len("shift", c, shift.nelems())?;

    let plan = plan_bwd(prb)?;
    fill_scale_shift(prb, scale, shift, |_, sc| sc / 64.0);

    let gamma = scale.as_slice().to_vec();
    let mut targets = Vec::with_capacity(n);

    for row in 0..n {
        let m = (row % 2) as f32;
        mean.set(row, m);
        // var + eps lands in {4, 1, 1/4}.
        let ve_denom = 4.0 / (1u32 << (2 * (row % 3))) as f32;
        var.set(row, ve_denom - prb.eps);

        let dd_p2 = row * 127 % PARAM_DD_P2;
        let factor_dd = 1.0 / (1u32 << dd_p2) as f32;
        let f_p2 = 1 + row % PARAM_F_P2;
        let factor_f = 1.0 / (1u32 << f_p2) as f32;

        let target_dd_g = factor_dd * plan.p as f32;
        let target_dd_g_x = 2.0 * target_dd_g;

        let base = row * c;
        let s = &mut src.as_mut_slice()[base..base + c];
        let dd = &mut d_dst.as_mut_slice()[base..base + c];

        if !flip_coin(row as u64, plan.density) && row != 0 && row != n - 1 {
            dd.fill(0.0);
            s.fill(m);
            targets.push(None);
            continue;
        }

        let (mut dd_g, mut dd_g_x) = (0.0f32, 0.0f32);
        for ch in 0..c - 2 {
            let g = gamma[ch];
            let sgn_dd = if dd_g < target_dd_g { 1.0 } else { -1.0 };
            let d = sgn_dd * factor_dd * (1 + (ch + row) * 3 % PARAM_DD_GEN) as f32;
            dd_g += d * g;

            let sgn_f = if dd_g_x < target_dd_g_x { 1.0 } else { -1.0 };
            let f = sgn_f * factor_f * (2 + (ch + row) * 7 % (PARAM_F_GEN - 1)) as f32;
            dd_g_x += f * d * g;

            dd[ch] = d;
            s[ch] = f + m;
        }

        // Last two elements: src is pinned to mean +/- 1 and d_dst solves
        //   d1 * g1     + d0 * g0     = target_dd_g   - dd_g
        //   d1 * g1 * 1 + d0 * g0 * -1 = target_dd_g_x - dd_g_x
        let (l1, l0) = (c - 2, c - 1);
        s[l1] = 1.0 + m;
        s[l0] = -1.0 + m;
        let g1 = gamma[l1];
        let g0 = gamma[l0];

        let f1 = ((target_dd_g - dd_g) + (target_dd_g_x - dd_g_x)) / 2.0;
        let f0 = ((target_dd_g - dd_g) - (target_dd_g_x - dd_g_x)) / 2.0;
        dd[l1] = f1 / g1;
        dd[l0] = f0 / g0;
        if prb.dt == DataType::Bf16 {
            dd[l1] = truncate_mantissa(dd[l1], DataType::Bf16.digits());
            dd[l0] = truncate_mantissa(dd[l0], DataType::Bf16.digits());
        }

        targets.push(Some(RowTargets { dd_gamma: target_dd_g, dd_gamma_x: target_dd_g_x }));
    }

    Ok(BwdFill { plan, targets })
}
