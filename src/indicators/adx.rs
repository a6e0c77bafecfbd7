//! Average Directional Index (ADX) - Measures trend strength
//!
//! ADX ranges from 0 to 100:
//! - ADX > 25: Strong trend (bull or bear)
//! - ADX 20-25: Moderate trend
//! - ADX < 20: Weak trend / choppy / ranging market
//!
//! +DI and -DI give the direction:
//! - +DI > -DI: Uptrend
//! - -DI > +DI: Downtrend
//!
//! Every series here is bar-aligned: element `i` belongs to `bars[i]`.
//! Undefined values are `NaN` internally and `None` once attached to a [`Bar`].

use crate::models::Bar;

pub const DEFAULT_PERIOD: usize = 14;

/// Per-bar directional indicator output
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalSeries {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

/// Compute +DI, -DI and ADX for every bar.
///
/// The first bar has no predecessor: its directional moves are 0 and its
/// true range is `high - low`.
pub fn directional_index_series(bars: &[Bar], period: usize) -> DirectionalSeries {
    let hlc: Vec<(f64, f64, f64)> = bars.iter().map(Bar::hlc).collect();
    let mut true_ranges = Vec::with_capacity(hlc.len());
    let mut plus_dms = Vec::with_capacity(hlc.len());
    let mut minus_dms = Vec::with_capacity(hlc.len());

    for (i, &(high, low, _)) in hlc.iter().enumerate() {
        let Some(&(prev_high, prev_low, prev_close)) = i.checked_sub(1).map(|p| &hlc[p]) else {
            true_ranges.push(high - low);
            plus_dms.push(0.0);
            minus_dms.push(0.0);
            continue;
        };

        // True Range = max(high - low, abs(high - prev_close), abs(low - prev_close))
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        true_ranges.push(tr);

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let atr = wilder_smooth(&true_ranges, period);
    let smoothed_plus = wilder_smooth(&plus_dms, period);
    let smoothed_minus = wilder_smooth(&minus_dms, period);

    let plus_di: Vec<f64> = smoothed_plus
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| ratio_pct(*dm, *tr))
        .collect();
    let minus_di: Vec<f64> = smoothed_minus
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| ratio_pct(*dm, *tr))
        .collect();

    let dx: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| ratio_pct((p - m).abs(), p + m))
        .collect();

    DirectionalSeries {
        adx: wilder_smooth(&dx, period),
        plus_di,
        minus_di,
    }
}

/// Annotate bars in place with +DI, -DI and ADX
pub fn attach_adx(bars: &mut [Bar], period: usize) {
    let series = directional_index_series(bars, period);
    for (i, bar) in bars.iter_mut().enumerate() {
        bar.plus_di = defined(series.plus_di[i]);
        bar.minus_di = defined(series.minus_di[i]);
        bar.adx = defined(series.adx[i]);
    }
}

/// Wilder's smoothing: exponential average with alpha = 1/period, seeded by the
/// first defined value.
///
/// `NaN` inputs leave the running value unchanged but still decay its weight, so
/// the next defined input is blended against a prior weighted by
/// `(1 - alpha)^(gap + 1)`.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 1.0 / period.max(1) as f64;
    let decay = 1.0 - alpha;

    let mut out = Vec::with_capacity(values.len());
    let mut smoothed = f64::NAN;
    let mut old_weight = 1.0;

    for &value in values {
        if smoothed.is_nan() {
            smoothed = value;
        } else {
            old_weight *= decay;
            if !value.is_nan() {
                if smoothed != value {
                    smoothed = (old_weight * smoothed + alpha * value) / (old_weight + alpha);
                }
                old_weight = 1.0;
            }
        }
        out.push(smoothed);
    }

    out
}

fn ratio_pct(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        100.0 * numerator / denominator
    } else {
        f64::NAN
    }
}

fn defined(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
