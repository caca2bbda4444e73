use chrono::{DateTime, Duration, TimeZone, Utc};
use common::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Generate a reproducible random-walk series of one-minute bars.
///
/// The same `seed` always yields the same bars, so synthetic runs are
/// comparable across invocations.
pub fn generate_synthetic_bars(count: usize, initial_price: f64, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(count);

    let mut price = initial_price;
    let start = series_start();

    let volatility = 0.004;
    let drift = 0.00002;

    for i in 0..count {
        let random_return: f64 = rng.gen_range(-1.0..1.0);
        let bar_return = drift + volatility * random_return;
        let new_price = (price * (1.0 + bar_return)).max(0.01);

        let range = price * rng.gen_range(0.001..0.006);
        let open = price;
        let close = new_price;
        let high = open.max(close) + rng.gen_range(0.0..range);
        let low = (open.min(close) - rng.gen_range(0.0..range)).max(0.001);

        let volume = 1_000.0 * (1.0 + bar_return.abs() * 50.0) * rng.gen_range(0.8..1.2);
        // Buy share leans with the direction of the bar
        let buy_share = (0.5 + bar_return * 40.0 + rng.gen_range(-0.1..0.1)).clamp(0.05, 0.95);

        bars.push(Bar {
            timestamp: start + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume,
            taker_buy_volume: Some(volume * buy_share),
        });

        price = new_price;
    }

    bars
}

/// Bars at a constant price, useful for accounting checks
pub fn generate_flat_bars(count: usize, price: f64) -> Vec<Bar> {
    let start = series_start();
    (0..count)
        .map(|i| {
            Bar::new(
                start + Duration::minutes(i as i64),
                price,
                price,
                price,
                price,
                1_000.0,
            )
        })
        .collect()
}

/// Bars whose close follows the given path exactly
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let start = series_start();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar::new(
                start + Duration::minutes(i as i64),
                open,
                open.max(close),
                open.min(close),
                close,
                1_000.0,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_synthetic_bars() {
        let bars = generate_synthetic_bars(200, 50.0, 7);

        assert_eq!(bars.len(), 200);

        for bar in &bars {
            assert!(bar.high >= bar.low);
            assert!(bar.high >= bar.open);
            assert!(bar.high >= bar.close);
            assert!(bar.low <= bar.open);
            assert!(bar.low <= bar.close);
            assert!(bar.volume > 0.0);
            let buy = bar.taker_buy_volume.unwrap();
            assert!(buy > 0.0 && buy < bar.volume);
        }
    }

    #[test]
    fn test_same_seed_same_bars() {
        let a = generate_synthetic_bars(50, 100.0, 11);
        let b = generate_synthetic_bars(50, 100.0, 11);
        let c = generate_synthetic_bars(50, 100.0, 12);

        let closes = |bars: &[Bar]| bars.iter().map(|b| b.close).collect::<Vec<_>>();
        assert_eq!(closes(&a), closes(&b));
        assert_ne!(closes(&a), closes(&c));
    }

    #[test]
    fn test_bars_from_closes() {
        let bars = bars_from_closes(&[10.0, 12.0, 9.0]);

        assert_eq!(bars[1].open, 10.0);
        assert_eq!(bars[2].high, 12.0);
        assert_eq!(bars[2].low, 9.0);
    }
}
