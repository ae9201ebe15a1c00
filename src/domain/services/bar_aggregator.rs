use std::collections::BTreeMap;

use crate::domain::entities::bar::{Bar, VolumeAtPrice};
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::value_objects::time::{floor_sec, sec, MicroSec};

/// Aggregate time-ordered trades into fixed windows.
///
/// Windows are aligned to multiples of `window_sec`. Windows without trades
/// produce no bar. `query_end` cuts the last window short and marks it
/// provisional; pass 0 to cut at the last trade instead.
pub fn aggregate(trades: &[Trade], window_sec: i64, query_end: MicroSec) -> Vec<Bar> {
    let mut bars: Vec<Bar> = Vec::new();
    if trades.is_empty() || window_sec <= 0 {
        return bars;
    }

    let window = sec(window_sec);
    for trade in trades {
        let window_start = floor_sec(trade.time, window_sec);

        match bars.last_mut() {
            Some(bar) if bar.window_start == window_start => {
                bar.high = bar.high.max(trade.price);
                bar.low = bar.low.min(trade.price);
                bar.close = trade.price;
                add_volume(bar, trade);
            }
            _ => {
                let mut bar = Bar {
                    window_start,
                    window_end: window_start + window,
                    open: trade.price,
                    high: trade.price,
                    low: trade.price,
                    close: trade.price,
                    volume: 0.0,
                    buy_volume: 0.0,
                    sell_volume: 0.0,
                    trade_count: 0,
                    provisional: false,
                };
                add_volume(&mut bar, trade);
                bars.push(bar);
            }
        }
    }

    let cut = if query_end > 0 {
        query_end
    } else {
        // last trade time is inclusive
        trades.last().map_or(0, |t| t.time + 1)
    };
    if let Some(last) = bars.last_mut() {
        if cut < last.window_end {
            last.window_end = cut;
            last.provisional = true;
        }
    }

    bars
}

fn add_volume(bar: &mut Bar, trade: &Trade) {
    bar.volume += trade.size;
    match trade.side {
        OrderSide::Buy => bar.buy_volume += trade.size,
        OrderSide::Sell => bar.sell_volume += trade.size,
        OrderSide::Unknown => {}
    }
    bar.trade_count += 1;
}

/// Volume-at-price histogram with prices floored to `price_unit` buckets.
pub fn volume_at_price(trades: &[Trade], price_unit: f64) -> Vec<VolumeAtPrice> {
    let mut buckets: BTreeMap<i64, VolumeAtPrice> = BTreeMap::new();
    if price_unit <= 0.0 {
        return Vec::new();
    }

    for trade in trades {
        let bucket = (trade.price / price_unit).floor() as i64;
        let entry = buckets.entry(bucket).or_insert_with(|| VolumeAtPrice {
            price: bucket as f64 * price_unit,
            buy_size: 0.0,
            sell_size: 0.0,
            trade_count: 0,
        });
        match trade.side {
            OrderSide::Buy => entry.buy_size += trade.size,
            OrderSide::Sell => entry.sell_size += trade.size,
            OrderSide::Unknown => {}
        }
        entry.trade_count += 1;
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(t: MicroSec, side: OrderSide, price: f64, size: f64) -> Trade {
        Trade::new(t, side, price, size, "")
    }

    #[test]
    fn test_ohlc_within_window() {
        let trades = vec![
            trade(sec(0), OrderSide::Buy, 100.0, 1.0),
            trade(sec(10), OrderSide::Sell, 105.0, 2.0),
            trade(sec(20), OrderSide::Buy, 95.0, 1.0),
            trade(sec(30), OrderSide::Sell, 101.0, 0.5),
        ];
        let bars = aggregate(&trades, 60, sec(60));

        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 95.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.volume, 4.5);
        assert_eq!(bar.buy_volume, 2.0);
        assert_eq!(bar.sell_volume, 2.5);
        assert_eq!(bar.trade_count, 4);
        assert!(!bar.provisional);
    }

    #[test]
    fn test_ten_minutes_into_five_minute_bars() {
        let trades: Vec<Trade> = (0..10)
            .map(|i| trade(sec(60 * i), OrderSide::Buy, 100.0, (i + 1) as f64))
            .collect();
        let bars = aggregate(&trades, 300, sec(600));

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, 1.0 + 2.0 + 3.0 + 4.0 + 5.0);
        assert_eq!(bars[1].volume, 6.0 + 7.0 + 8.0 + 9.0 + 10.0);
        for bar in &bars {
            assert_eq!(bar.open, 100.0);
            assert_eq!(bar.high, 100.0);
            assert_eq!(bar.low, 100.0);
            assert_eq!(bar.close, 100.0);
            assert!(!bar.provisional);
        }
    }

    #[test]
    fn test_last_window_provisional() {
        let trades = vec![
            trade(sec(0), OrderSide::Buy, 100.0, 1.0),
            trade(sec(70), OrderSide::Buy, 101.0, 1.0),
        ];
        let bars = aggregate(&trades, 60, sec(90));

        assert_eq!(bars.len(), 2);
        assert!(!bars[0].provisional);
        assert!(bars[1].provisional);
        assert_eq!(bars[1].window_end, sec(90));
    }

    #[test]
    fn test_empty_windows_skipped() {
        let trades = vec![
            trade(sec(0), OrderSide::Buy, 100.0, 1.0),
            trade(sec(200), OrderSide::Buy, 101.0, 1.0),
        ];
        let bars = aggregate(&trades, 60, sec(240));
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].window_start, sec(180));
    }

    #[test]
    fn test_volume_at_price_buckets() {
        let trades = vec![
            trade(0, OrderSide::Buy, 100.2, 1.0),
            trade(1, OrderSide::Sell, 100.7, 2.0),
            trade(2, OrderSide::Buy, 101.1, 0.5),
        ];
        let vap = volume_at_price(&trades, 1.0);

        assert_eq!(vap.len(), 2);
        assert_eq!(vap[0].price, 100.0);
        assert_eq!(vap[0].buy_size, 1.0);
        assert_eq!(vap[0].sell_size, 2.0);
        assert_eq!(vap[0].trade_count, 2);
        assert_eq!(vap[1].total_size(), 0.5);
    }
}
