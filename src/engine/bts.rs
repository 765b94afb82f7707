use std::cell::Cell;

use chrono::{DateTime, Duration, Utc};

use crate::config::BacktestConfig;
use crate::engine::*;

fn t(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_secs(1515151515).unwrap() + Duration::hours(hours)
}

fn bar(hours: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    BarBuilder::builder()
        .timestamp(t(hours))
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .volume(1.0)
        .build()
        .unwrap()
}

fn get_data() -> Series {
    Series::new(vec![
        bar(0, 99.0, 101.0, 98.0, 100.0),
        bar(1, 102.0, 112.0, 101.0, 110.0),
        bar(2, 108.0, 109.0, 89.0, 90.0),
    ])
    .unwrap()
}

fn get_long_data() -> Series {
    Series::new(vec![
        bar(0, 90.0, 110.0, 80.0, 100.0),
        bar(1, 100.0, 119.0, 90.0, 110.0),
        bar(2, 110.0, 129.0, 100.0, 120.0),
        bar(3, 120.0, 125.0, 115.0, 118.0),
    ])
    .unwrap()
}

fn get_short_data() -> Series {
    Series::new(vec![
        bar(0, 150.0, 160.0, 131.0, 140.0),
        bar(1, 140.0, 150.0, 121.0, 130.0),
        bar(2, 130.0, 140.0, 111.0, 120.0),
        bar(3, 120.0, 126.0, 112.0, 115.0),
    ])
    .unwrap()
}

/// Enters on the first bar only.
fn enter_once(decision: Decision) -> impl Fn(&[Bar], &[Position]) -> Decision {
    move |history: &[Bar], _: &[Position]| {
        if history.len() == 1 { decision } else { Decision::Hold }
    }
}

fn assert_conservation(report: &Report) {
    for point in &report.equity_curve {
        assert!((point.cash + point.unrealized_pnl - point.equity).abs() < 1e-9);
        assert!(point.locked <= point.cash + 1e-9);
    }
}

#[test]
fn scenario_enter_on_close_fill_on_next_open() {
    let data = get_data();
    let mut bt = Backtest::new(data.clone(), BacktestConfig::default()).unwrap();

    let report = bt.run(&enter_once(Decision::long(None, None))).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.side, PositionSide::Long);
    assert_eq!(trade.entry_price, 102.0);
    assert_eq!(trade.entry_timestamp, t(1));
    assert_eq!(trade.exit_price, 90.0);
    assert_eq!(trade.exit_timestamp, t(2));
    assert_eq!(trade.exit_reason, ExitReason::EndOfData);
    assert!(trade.pnl < 0.0);

    // 2% of 10000 risked over a 5% default stop distance
    let quantity = 200.0 / (102.0 * 0.05);
    assert!((trade.quantity - quantity).abs() < 1e-9);

    assert_eq!(report.equity_curve.len(), data.len());
    assert!(report.final_equity() < 10_000.0);
    assert!((report.final_equity() - (10_000.0 + trade.pnl)).abs() < 1e-9);
    assert_conservation(&report);

    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].bar_index, 0);
    assert_eq!(report.decisions[0].outcome, DecisionOutcome::Opened(1));
}

#[test]
fn scenario_equity_curve_tracks_open_position() {
    let mut bt = Backtest::new(get_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(None, None))).unwrap();

    let curve = &report.equity_curve;
    assert_eq!(curve[0].equity, 10_000.0);
    assert_eq!(curve[0].open_positions, 0);

    let quantity = report.trades[0].quantity;
    assert_eq!(curve[1].open_positions, 1);
    assert!((curve[1].unrealized_pnl - (110.0 - 102.0) * quantity).abs() < 1e-9);
    assert_eq!(curve[1].cash, 10_000.0);

    assert_eq!(curve[2].open_positions, 0);
    assert_eq!(curve[2].unrealized_pnl, 0.0);
}

#[test]
fn scenario_open_long_position_and_take_profit() {
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(95.0), Some(125.0)))).unwrap();

    // filled at 100 on bar 1, target touched on bar 2 (high 129)
    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.entry_price, 100.0);
    assert_eq!(trade.exit_reason, ExitReason::Target);
    assert_eq!(trade.exit_price, 125.0);
    assert_eq!(trade.exit_timestamp, t(2));

    let quantity = 200.0 / 5.0;
    assert!((trade.quantity - quantity).abs() < 1e-9);
    assert!((trade.pnl - 25.0 * quantity).abs() < 1e-9);
    assert!((report.final_equity() - 11_000.0).abs() < 1e-9);
    assert_conservation(&report);
}

#[test]
fn scenario_open_long_position_and_stop_loss() {
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(95.0), Some(140.0)))).unwrap();

    // bar 1 is the entry bar, its low of 90 is ignored; bar 2 low 100 keeps the stop
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].exit_reason, ExitReason::EndOfData);
    assert_eq!(report.trades[0].exit_price, 118.0);

    let data = Series::new(vec![
        bar(0, 90.0, 110.0, 80.0, 100.0),
        bar(1, 100.0, 105.0, 98.0, 101.0),
        bar(2, 101.0, 102.0, 93.0, 94.0),
        bar(3, 94.0, 96.0, 90.0, 92.0),
    ])
    .unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(95.0), None))).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::Stop);
    assert_eq!(trade.exit_price, 95.0);
    assert_eq!(trade.exit_timestamp, t(2));
    // risk budget lost exactly
    assert!((trade.pnl + 200.0).abs() < 1e-9);
    assert!((report.final_equity() - 9_800.0).abs() < 1e-9);
}

#[test]
fn scenario_open_short_position_and_take_profit() {
    let mut bt = Backtest::new(get_short_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::short(Some(150.0), Some(115.0)))).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.side, PositionSide::Short);
    assert_eq!(trade.entry_price, 140.0);
    assert_eq!(trade.exit_reason, ExitReason::Target);
    assert_eq!(trade.exit_price, 115.0);
    assert_eq!(trade.exit_timestamp, t(2));
    assert!(trade.pnl > 0.0);
    assert_conservation(&report);
}

#[test]
fn scenario_open_short_position_and_stop_loss() {
    let data = Series::new(vec![
        bar(0, 150.0, 160.0, 131.0, 140.0),
        bar(1, 140.0, 144.0, 138.0, 142.0),
        bar(2, 142.0, 151.0, 140.0, 149.0),
    ])
    .unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::short(Some(150.0), None))).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::Stop);
    assert_eq!(trade.exit_price, 150.0);
    assert!((trade.pnl + 200.0).abs() < 1e-9);
}

#[test]
fn scenario_stop_wins_when_both_levels_touched() {
    let data = Series::new(vec![
        bar(0, 100.0, 101.0, 99.0, 100.0),
        bar(1, 100.0, 101.0, 99.0, 100.0),
        bar(2, 100.0, 120.0, 80.0, 100.0),
        bar(3, 100.0, 101.0, 99.0, 100.0),
    ])
    .unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(90.0), Some(110.0)))).unwrap();

    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].exit_reason, ExitReason::Stop);
    assert_eq!(report.trades[0].exit_price, 90.0);
}

#[test]
fn scenario_signal_exit_fills_at_next_open() {
    let strategy = |history: &[Bar], positions: &[Position]| match history.len() {
        1 => Decision::long(None, None),
        3 if !positions.is_empty() => Decision::exit_all(),
        _ => Decision::Hold,
    };
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&strategy).unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::Signal);
    assert_eq!(trade.exit_price, 120.0);
    assert_eq!(trade.exit_timestamp, t(3));
    assert_eq!(report.decisions[1].outcome, DecisionOutcome::Closed(vec![1]));
}

#[test]
fn scenario_capacity_rejects_second_entry() {
    let strategy = |_: &[Bar], _: &[Position]| Decision::long(None, None);
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&strategy).unwrap();

    assert!(report.equity_curve.iter().all(|p| p.open_positions <= 1));
    assert_eq!(report.trades.len(), 1);

    let outcomes = report.decisions.iter().map(|d| d.outcome.clone()).collect::<Vec<_>>();
    assert_eq!(
        outcomes,
        vec![
            DecisionOutcome::Opened(1),
            DecisionOutcome::Rejected(Rejection::Capacity { max_positions: 1 }),
            DecisionOutcome::Rejected(Rejection::NoNextBar),
            DecisionOutcome::Rejected(Rejection::NoNextBar),
        ]
    );
}

#[test]
fn scenario_many_positions() {
    let strategy = |_: &[Bar], _: &[Position]| Decision::long(None, None);
    let config = BacktestConfig::default().max_positions(2);
    let mut bt = Backtest::new(get_long_data(), config).unwrap();
    let report = bt.run(&strategy).unwrap();

    assert!(report.equity_curve.iter().all(|p| p.open_positions <= 2));
    assert_eq!(report.equity_curve[2].open_positions, 2);
    assert_eq!(report.trades.len(), 2);
    assert!(report.trades.iter().all(|t| t.exit_reason == ExitReason::EndOfData));
    assert_conservation(&report);
}

#[test]
fn scenario_invalid_decision_is_recorded() {
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(105.0), None))).unwrap();

    assert!(report.trades.is_empty());
    assert_eq!(report.decisions.len(), 1);
    assert!(matches!(
        report.decisions[0].outcome,
        DecisionOutcome::Invalid(InvalidReason::StopOnWrongSide { .. })
    ));
    assert!(report.equity_curve.iter().all(|p| p.equity == 10_000.0));
}

#[test]
fn scenario_zero_distance_stop_is_rejected() {
    let data = Series::new(vec![
        bar(0, 100.0, 101.0, 99.0, 100.0),
        bar(1, 100.0, 101.0, 99.0, 100.0),
        bar(2, 100.0, 101.0, 99.0, 100.0),
    ])
    .unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(100.0), None))).unwrap();

    assert!(report.trades.is_empty());
    assert!(matches!(
        report.decisions[0].outcome,
        DecisionOutcome::Rejected(Rejection::NonPositiveQuantity(_))
    ));
}

#[test]
fn scenario_with_market_fees() {
    let config = BacktestConfig::default().fee_bps(10.0).slippage_bps(5.0);
    let mut bt = Backtest::new(get_data(), config).unwrap();
    let report = bt.run(&enter_once(Decision::long(None, None))).unwrap();

    let trade = &report.trades[0];
    let rate = 15.0 / 10_000.0;
    let expected_fees = rate * trade.quantity * (102.0 + 90.0);
    assert!((trade.fees - expected_fees).abs() < 1e-9);
    let gross = (90.0 - 102.0) * trade.quantity;
    assert!((trade.pnl - (gross - expected_fees)).abs() < 1e-9);
    assert!((bt.fees_paid() - expected_fees).abs() < 1e-9);
    assert!((report.final_equity() - (10_000.0 + trade.pnl)).abs() < 1e-9);
    assert_conservation(&report);
}

#[test]
fn scenario_empty_series() {
    let mut bt = Backtest::new(Series::empty(), BacktestConfig::default()).unwrap();
    let report = bt.run(&|_: &[Bar], _: &[Position]| Decision::long(None, None)).unwrap();

    assert!(report.trades.is_empty());
    assert!(report.decisions.is_empty());
    assert_eq!(report.equity_curve.len(), 1);
    assert_eq!(report.equity_curve[0].equity, 10_000.0);
    assert_eq!(report.final_equity(), 10_000.0);
}

#[test]
fn scenario_single_bar_entry_has_no_fill() {
    let data = Series::new(vec![bar(0, 100.0, 101.0, 99.0, 100.0)]).unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&|_: &[Bar], _: &[Position]| Decision::long(None, None)).unwrap();

    assert!(report.trades.is_empty());
    assert_eq!(report.decisions[0].outcome, DecisionOutcome::Rejected(Rejection::NoNextBar));
}

#[test]
fn scenario_strategy_sees_only_past_bars() {
    let data = get_long_data();
    let seen = Cell::new(0);
    let strategy = |history: &[Bar], _: &[Position]| {
        seen.set(seen.get() + 1);
        assert_eq!(history.len(), seen.get());
        assert_eq!(history.last().unwrap().timestamp(), t(seen.get() as i64 - 1));
        Decision::Hold
    };
    let mut bt = Backtest::new(data.clone(), BacktestConfig::default()).unwrap();
    bt.run(&strategy).unwrap();
    assert_eq!(seen.get(), data.len());
}

#[test]
fn scenario_step_by_step() {
    let strategy = enter_once(Decision::long(None, None));
    let mut bt = Backtest::new(get_data(), BacktestConfig::default()).unwrap();

    assert!(bt.step(&strategy).unwrap());
    assert_eq!(bt.positions().count(), 0);
    assert_eq!(bt.equity_curve().len(), 1);

    assert!(bt.step(&strategy).unwrap());
    assert_eq!(bt.positions().count(), 1);
    assert_eq!(bt.locked(), bt.positions().next().unwrap().cost());

    assert!(bt.step(&strategy).unwrap());
    assert!(bt.is_finished());
    assert!(!bt.step(&strategy).unwrap());
    assert_eq!(bt.trades().len(), 1);
    assert_eq!(bt.locked(), 0.0);
}

#[test]
fn scenario_run_twice_is_identical() {
    let strategy = |history: &[Bar], positions: &[Position]| {
        if positions.is_empty() && history.len() % 2 == 1 {
            Decision::long(None, None)
        } else if !positions.is_empty() {
            Decision::exit_all()
        } else {
            Decision::Hold
        }
    };
    let mut bt = Backtest::new(get_long_data(), BacktestConfig::default()).unwrap();
    let first = bt.run(&strategy).unwrap();
    let second = bt.run(&strategy).unwrap();
    assert_eq!(first, second);
}

#[test]
fn scenario_shorts_liquidated_on_a_spike() {
    let data = Series::new(vec![
        bar(0, 100.0, 101.0, 99.0, 100.0),
        bar(1, 100.0, 101.0, 99.0, 100.0),
        bar(2, 100.0, 101.0, 99.0, 100.0),
        bar(3, 300.0, 301.0, 299.0, 300.0),
        bar(4, 300.0, 301.0, 299.0, 300.0),
    ])
    .unwrap();
    let strategy = |history: &[Bar], _: &[Position]| match history.len() {
        1 | 2 => Decision::short(None, None),
        3 => Decision::Exit(ExitScope::Position(1)),
        _ => Decision::Hold,
    };
    let config = BacktestConfig::default().risk_per_trade(0.025).max_positions(2);
    let mut bt = Backtest::new(data, config).unwrap();

    for _ in 0..4 {
        assert!(bt.step(&strategy).unwrap());
        assert!(bt.locked() <= bt.balance());
    }

    // two 5_000 notional shorts, each losing exactly its notional
    let trades = bt.trades();
    assert_eq!(trades.len(), 2);
    for trade in trades {
        assert_eq!(trade.exit_reason, ExitReason::Liquidation);
        assert_eq!(trade.exit_price, 200.0);
        assert_eq!(trade.pnl, -5_000.0);
    }
    assert_eq!(bt.balance(), 0.0);
    assert_eq!(bt.equity_curve()[2].locked, 10_000.0);
    assert_eq!(bt.equity_curve()[3].locked, 0.0);
    assert_eq!(bt.equity_curve()[3].open_positions, 0);
}

#[test]
fn scenario_stop_crossed_on_entry_bar_is_not_filled() {
    let data = Series::new(vec![
        bar(0, 100.0, 101.0, 99.0, 100.0),
        bar(1, 100.0, 101.0, 90.0, 100.0),
        bar(2, 100.0, 103.0, 97.0, 100.0),
        bar(3, 100.0, 101.0, 99.0, 100.0),
    ])
    .unwrap();
    let mut bt = Backtest::new(data, BacktestConfig::default()).unwrap();
    let report = bt.run(&enter_once(Decision::long(Some(95.0), None))).unwrap();

    // the entry bar's low of 90 is not checked against the 95 stop
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].position_id, 1);
    assert_eq!(report.trades[0].entry_timestamp, t(1));
    assert_eq!(report.trades[0].exit_reason, ExitReason::EndOfData);
    assert_eq!(report.trades[0].exit_price, 100.0);
    assert_conservation(&report);
}

#[test]
fn reject_invalid_config() {
    let config = BacktestConfig::default().risk_per_trade(0.0);
    assert!(Backtest::new(get_data(), config).is_err());
}
