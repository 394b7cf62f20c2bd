//! Reference layer normalization in `f64`.
//!
//! Statistics always come from the caller: on forward they are the
//! generator's exact values, on backward the ones bound to the primitive.

use dnncheck_common::RefBuffer;
use dnncheck_common::lnorm::Problem;

use crate::error::{Result, crit};

/// Reference gradients of a backward case.
#[derive(Debug, Clone)]
pub struct BwdRef {
    pub d_src: RefBuffer,
    /// `None` unless the direction produces weight gradients.
    pub d_scale: Option<RefBuffer>,
    pub d_shift: Option<RefBuffer>,
}

fn check_shapes(prb: &Problem, data: &[&RefBuffer], stats: &[&RefBuffer], params: &[&RefBuffer]) -> Result<()> {
    let (n, c) = (prb.n(), prb.c());
    let bad = data.iter().any(|b| b.nelems() != n * c)
        || stats.iter().any(|b| b.nelems() != n)
        || params.iter().any(|b| b.nelems() != c);
    if bad {
        return Err(crit("lnorm reference", format!("buffer sizes do not match {}", prb.repro())));
    }
    Ok(())
}

/// `dst = scale * (src - mean) / sqrt(var + eps) + shift` per row.
///
/// `scale` and `shift` carry identity values when the problem does not use
/// them.
pub fn compute_ref_fwd(
    prb: &Problem,
    src: &RefBuffer,
    mean: &RefBuffer,
    var: &RefBuffer,
    scale: &RefBuffer,
    shift: &RefBuffer,
) -> Result<RefBuffer> {
    check_shapes(prb, &[src], &[mean, var], &[scale, shift])?;
    let c = prb.c();
    let eps = prb.eps as f64;
    let (s, sc, sh) = (src.as_slice(), scale.as_slice(), shift.as_slice());

    let mut dst = RefBuffer::new(&prb.dims);
    for (row, out) in dst.as_mut_slice().chunks_mut(c).enumerate() {
        let m = mean.get(row) as f64;
        let rcp = 1.0 / (var.get(row) as f64 + eps).sqrt();
        for (ch, o) in out.iter_mut().enumerate() {
            let x_hat = (s[row * c + ch] as f64 - m) * rcp;
            *o = (sc[ch] as f64 * x_hat + sh[ch] as f64) as f32;
        }
    }
    Ok(dst)
}

/// Input gradient and, for `BWD_DW`, scale/shift gradients.
pub fn compute_ref_bwd(
    prb: &Problem,
    src: &RefBuffer,
    d_dst: &RefBuffer,
    mean: &RefBuffer,
    var: &RefBuffer,
    scale: &RefBuffer,
) -> Result<BwdRef> {
    check_shapes(prb, &[src, d_dst], &[mean, var], &[scale])?;
    let (n, c) = (prb.n(), prb.c());
    let eps = prb.eps as f64;
    let global = prb.global_stats();
    let (s, dd, g) = (src.as_slice(), d_dst.as_slice(), scale.as_slice());

    let mut d_src = RefBuffer::new(&prb.dims);
    let mut d_gamma = vec![0.0f64; c];
    let mut d_beta = vec![0.0f64; c];

    for row in 0..n {
        let base = row * c;
        let m = mean.get(row) as f64;
        let rcp = 1.0 / (var.get(row) as f64 + eps).sqrt();

        let (mut dd_g, mut dd_g_x) = (0.0f64, 0.0f64);
        for ch in 0..c {
            let x = s[base + ch] as f64 - m;
            let dy = dd[base + ch] as f64;
            d_gamma[ch] += dy * x * rcp;
            d_beta[ch] += dy;
            if !global {
                let dyg = dy * g[ch] as f64;
                dd_g += dyg;
                dd_g_x += dyg * x;
            }
        }
        dd_g_x *= rcp;

        for ch in 0..c {
            let x_hat = (s[base + ch] as f64 - m) * rcp;
            let mut ds = dd[base + ch] as f64 * g[ch] as f64;
            if !global {
                ds -= (dd_g + x_hat * dd_g_x) / c as f64;
            }
            d_src.set(base + ch, (ds * rcp) as f32);
        }
    }

    let (d_scale, d_shift) = if prb.dir.has_weights() {
        let to_buf = |v: &[f64]| RefBuffer::from_vec(&[c], v.iter().map(|&x| x as f32).collect());
        (Some(to_buf(&d_gamma)?), Some(to_buf(&d_beta)?))
    } else {
        (None, None)
    };

    Ok(BwdRef { d_src, d_scale, d_shift })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnncheck_common::{Direction, NormFlags};

    fn buf(dims: &[usize], v: &[f32]) -> RefBuffer {
        RefBuffer::from_vec(dims, v.to_vec()).unwrap()
    }

    #[test]
    fn forward_normalizes_with_given_stats() {
        let prb = Problem::new(vec![1, 4]).unwrap().with_eps(0.0);
        let dst = compute_ref_fwd(
            &prb,
            &buf(&[1, 4], &[1.0, 3.0, 1.0, 3.0]),
            &buf(&[1], &[2.0]),
            &buf(&[1], &[1.0]),
            &buf(&[4], &[1.0; 4]),
            &buf(&[4], &[0.0; 4]),
        )
        .unwrap();
        assert_eq!(dst.as_slice(), &[-1.0, 1.0, -1.0, 1.0]);
    }

    #[test]
    fn forward_applies_scale_and_shift() {
        let prb = Problem::new(vec![1, 2]).unwrap().with_eps(0.0);
        let dst = compute_ref_fwd(
            &prb,
            &buf(&[1, 2], &[0.0, 2.0]),
            &buf(&[1], &[1.0]),
            &buf(&[1], &[1.0]),
            &buf(&[2], &[2.0, 0.5]),
            &buf(&[2], &[1.0, -1.0]),
        )
        .unwrap();
        assert_eq!(dst.as_slice(), &[-1.0, -0.5]);
    }

    #[test]
    fn backward_weights_only_for_bwd_dw() {
        let flags = NormFlags { scale: true, shift: true, ..NormFlags::NONE };
        let prb = Problem::new(vec![1, 2]).unwrap().with_eps(0.0).with_flags(flags);
        let args = (
            buf(&[1, 2], &[0.0, 2.0]),
            buf(&[1, 2], &[1.0, 1.0]),
            buf(&[1], &[1.0]),
            buf(&[1], &[1.0]),
            buf(&[2], &[1.0, 1.0]),
        );
        let run = |prb: &Problem| compute_ref_bwd(prb, &args.0, &args.1, &args.2, &args.3, &args.4).unwrap();

        let r = run(&prb.clone().with_dir(Direction::BwdD));
        assert!(r.d_scale.is_none());
        // A constant output gradient is orthogonal to both normalization terms.
        assert_eq!(r.d_src.as_slice(), &[0.0, 0.0]);

        let r = run(&prb.with_dir(Direction::BwdDw));
        assert_eq!(r.d_scale.unwrap().as_slice(), &[-1.0, 1.0]);
        assert_eq!(r.d_shift.unwrap().as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn size_mismatch_is_critical() {
        let prb = Problem::new(vec![2, 2]).unwrap();
        let small = buf(&[2], &[0.0, 0.0]);
        assert!(compute_ref_fwd(&prb, &small, &small, &small, &small, &small).is_err());
    }
}
