/// Calculate Simple Moving Average
///
/// # Arguments
/// * `prices` - Slice of prices
/// * `period` - SMA period
///
/// # Returns
/// Vector the same length as `prices`, `NaN` until `period` values are available
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let n = prices.len();
    let mut sma = vec![f64::NAN; n];

    if n < period || period == 0 {
        return sma;
    }

    // Calculate initial sum
    let mut sum: f64 = prices[..period].iter().sum();
    sma[period - 1] = sum / period as f64;

    // Sliding window for subsequent values
    for i in period..n {
        sum = sum - prices[i - period] + prices[i];
        sma[i] = sum / period as f64;
    }

    sma
}
