//! Probability policy: turn a row of regrets (or sumprobs) into a mixed
//! strategy.
//!
//! The routine is pure and thread-safe; it writes into a caller-provided
//! row so hot loops can reuse a stack-allocated scratch buffer.

/// Convert `row` into a probability distribution over successors.
///
/// * `nonneg` floors negative entries at zero before summing.
/// * `uniform` short-circuits to the uniform distribution (debugging aid).
/// * When the (floored) sum is not positive, all mass goes to
///   `default_succ_index`.
/// * With `explore > 0`, base probabilities are scaled by `1 - explore` and
///   `explore / num_nonterminal_succs` is added to every nonterminal
///   successor, guaranteeing each a positive floor.
///
/// `nonterminal_succs[s]` is true when successor `s` is not a terminal node;
/// `out` must have the same length as `row`.
#[allow(clippy::too_many_arguments)]
pub fn regrets_to_probs<T>(
    row: &[T],
    nonneg: bool,
    uniform: bool,
    default_succ_index: usize,
    explore: f64,
    num_nonterminal_succs: usize,
    nonterminal_succs: &[bool],
    out: &mut [f64],
) where
    T: Copy + Into<f64>,
{
    let num_succs = row.len();
    debug_assert_eq!(out.len(), num_succs);
    debug_assert_eq!(nonterminal_succs.len(), num_succs);

    if uniform {
        let p = 1.0 / num_succs as f64;
        out.fill(p);
        return;
    }

    let mut sum = 0.0;
    for &raw in row {
        let v: f64 = raw.into();
        sum += if nonneg { v.max(0.0) } else { v };
    }

    if sum > 0.0 {
        for (s, &raw) in row.iter().enumerate() {
            let v: f64 = raw.into();
            let v = if nonneg { v.max(0.0) } else { v };
            out[s] = v / sum;
        }
    } else {
        out.fill(0.0);
        out[default_succ_index] = 1.0;
    }

    if explore > 0.0 && num_nonterminal_succs > 0 {
        let bonus = explore / num_nonterminal_succs as f64;
        for s in 0..num_succs {
            out[s] *= 1.0 - explore;
            if nonterminal_succs[s] {
                out[s] += bonus;
            }
        }
    }
}
