use common::AtrMethod;

/// Calculate Average True Range
///
/// # Arguments
/// * `highs` - Slice of high prices
/// * `lows` - Slice of low prices
/// * `closes` - Slice of closing prices
/// * `period` - ATR period (typically 14)
/// * `method` - Wilder smoothing or a plain EMA of the true range
///
/// # Returns
/// Vector of ATR values, `NaN` for the first `period - 1` rows
pub fn calculate_atr(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    method: AtrMethod,
) -> Vec<f64> {
    let n = highs.len();
    let mut atr = vec![f64::NAN; n];
    if n < period || period == 0 {
        return atr;
    }

    let tr = true_range_series(highs, lows, closes);

    match method {
        AtrMethod::Wilder => {
            let alpha = 1.0 / period as f64;
            // Initial ATR is the SMA of the first `period` TR values
            atr[period - 1] = tr[..period].iter().sum::<f64>() / period as f64;
            for i in period..n {
                atr[i] = atr[i - 1] * (1.0 - alpha) + tr[i] * alpha;
            }
        }
        AtrMethod::Ema => {
            let multiplier = 2.0 / (period as f64 + 1.0);
            let mut ema = tr[0];
            for i in 1..n {
                ema = (tr[i] - ema) * multiplier + ema;
                if i + 1 >= period {
                    atr[i] = ema;
                }
            }
            if period == 1 {
                atr[0] = tr[0];
            }
        }
    }

    atr
}

/// True range for every bar; the first bar has no previous close and uses high - low
pub fn true_range_series(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut tr = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            tr.push(highs[0] - lows[0]);
        } else {
            tr.push(true_range(highs[i], lows[i], closes[i - 1]));
        }
    }
    tr
}

/// Calculate True Range for a single bar
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}
