/// Rolling cumulative volume delta ratio.
///
/// For each row: `(buy - sell) / total * 100` summed over the trailing
/// `window` rows (fewer at the start of the series). Rows with no traded
/// volume in the window read `0.0`.
pub fn calculate_cvd_ratio(volume: &[f64], taker_buy_volume: &[f64], window: usize) -> Vec<f64> {
    let n = volume.len().min(taker_buy_volume.len());
    let window = window.max(1);

    let delta: Vec<f64> = (0..n)
        .map(|i| {
            let buy = taker_buy_volume[i];
            let sell = volume[i] - buy;
            buy - sell
        })
        .collect();

    let mut ratio = Vec::with_capacity(n);
    let mut delta_sum = 0.0;
    let mut total_sum = 0.0;
    for i in 0..n {
        delta_sum += delta[i];
        total_sum += volume[i];
        if i >= window {
            delta_sum -= delta[i - window];
            total_sum -= volume[i - window];
        }

        if total_sum > 0.0 {
            ratio.push(delta_sum / total_sum * 100.0);
        } else {
            ratio.push(0.0);
        }
    }

    ratio
}
