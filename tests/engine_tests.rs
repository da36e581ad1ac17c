//! Engine dispatch: timetable loading, hydration, routing, day rollover,
//! the run loop and replay against the paper venue.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use harness::recording_notifier::RecordingNotifier;
use rangelock::adapter::inbound::ReplayDriver;
use rangelock::adapter::outbound::{PaperAdapter, ReplayBarProvider, ReplayClock, ReplayRecord};
use rangelock::application::{
    BarEvent, DayTransition, Engine, EngineInput, EngineOptions, EngineParts, SessionSchedule,
    StreamDeps, StreamSettings,
};
use rangelock::domain::{
    Bar, BarSource, Instrument, IntentId, NoTradeReason, OrderKind, StreamKey, StreamState,
    TerminalReason, TimeService,
};
use rangelock::port::{ExecutionEvent, FillReport, NotifierRegistry, TimetableRow};
use rangelock::testkit::domain::{
    at, bar_from, canonical_range, flat_bar, registry, stream_key, time, trading_date,
};
use rangelock::testkit::sources::{row, StaticBarProvider, StaticTimetable};
use rangelock::testkit::stream::Fixture;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

struct Rig {
    engine: Engine,
    clock: Arc<ReplayClock>,
    bars: Arc<StaticBarProvider>,
    timetable: Arc<StaticTimetable>,
}

fn schedule() -> SessionSchedule {
    SessionSchedule::new(time(20, 0)).with_session("S1", time(13, 0))
}

fn time_service() -> TimeService {
    TimeService::new("UTC", NaiveTime::MIN).unwrap()
}

fn options() -> EngineOptions {
    EngineOptions {
        hydration_timeout: Duration::from_millis(50),
        ..EngineOptions::default()
    }
}

fn build_rig(fixture: &Fixture, rows: Vec<TimetableRow>, bars: StaticBarProvider, start: DateTime<Utc>) -> Rig {
    let clock = Arc::new(ReplayClock::new(start));
    let bars = Arc::new(bars);
    let timetable = Arc::new(StaticTimetable::new().with_rows(trading_date(), rows));
    let engine = Engine::new(EngineParts {
        time: time_service(),
        schedule: schedule(),
        registry: Arc::new(registry()),
        timetable: Arc::clone(&timetable) as _,
        bars: Arc::clone(&bars) as _,
        clock: Arc::clone(&clock) as _,
        settings: Arc::clone(&fixture.settings),
        deps: fixture.deps(),
        options: options(),
    });
    Rig {
        engine,
        clock,
        bars,
        timetable,
    }
}

fn es1() -> Vec<TimetableRow> {
    vec![row("ES1", "ES", time(14, 0))]
}

fn recording_fixture() -> (Fixture, RecordingNotifier) {
    let recorder = RecordingNotifier::new();
    let mut notifiers = NotifierRegistry::new();
    notifiers.register(Box::new(recorder.clone()));
    (Fixture::with_notifiers(notifiers), recorder)
}

async fn state_of(engine: &Engine, key: &StreamKey) -> StreamState {
    engine.stream(key).unwrap().lock().await.state()
}

async fn feed(rig: &mut Rig, symbol: &str, bars: Vec<Bar>) {
    for bar in bars {
        rig.clock.set(bar.timestamp);
        rig.engine
            .on_bar(BarEvent {
                symbol: symbol.to_string(),
                bar,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn streams_are_created_from_the_timetable() {
    let fixture = Fixture::new();
    let rows = vec![row("ES1", "ES", time(14, 0)), row("ES2", "MES", time(14, 30))];
    let mut rig = build_rig(&fixture, rows, StaticBarProvider::new(), at(12, 0));

    let transition = rig.engine.sync_day().await.unwrap();

    assert_eq!(transition, Some(DayTransition::Initialize(trading_date())));
    let es2 = StreamKey::new(trading_date(), "ES2", Instrument::new("ES"), "S1", time(14, 30));
    assert_eq!(rig.engine.stream_keys(), vec![stream_key("ES1"), es2.clone()]);
    assert_eq!(state_of(&rig.engine, &es2).await, StreamState::Armed);
    assert!(rig
        .engine
        .snapshot()
        .await
        .iter()
        .all(|r| r.hydration_complete && !r.committed));
    // Same date again: nothing to do.
    assert_eq!(rig.engine.sync_day().await.unwrap(), None);
}

#[tokio::test]
async fn invalid_timetable_rows_are_skipped_and_alerted() {
    let (fixture, recorder) = recording_fixture();
    let mut bad_session = row("ES4", "ES", time(14, 0));
    if let TimetableRow::Valid(entry) = &mut bad_session {
        entry.session = "S9".to_string();
    }
    let rows = vec![
        TimetableRow::Invalid {
            raw: "ES3,,14:00".to_string(),
            reason: "missing instrument".to_string(),
        },
        row("ES1", "ES", time(14, 0)),
        row("NQ1", "NQ", time(14, 0)),
        bad_session,
        row("ES5", "ES", time(12, 30)),
        row("ES1", "MES", time(14, 0)),
    ];
    let mut rig = build_rig(&fixture, rows, StaticBarProvider::new(), at(12, 0));

    rig.engine.on_tick().await.unwrap();

    assert_eq!(rig.engine.stream_keys(), vec![stream_key("ES1")]);
    assert_eq!(recorder.count("timetable_invalid"), 5);
}

#[tokio::test]
async fn hydration_requests_the_window_up_to_now() {
    let fixture = Fixture::new();
    let provider =
        StaticBarProvider::new().with_bars("ES", canonical_range(BarSource::RequestedHistorical));
    let mut rig = build_rig(&fixture, es1(), provider, at(13, 30));

    rig.engine.on_tick().await.unwrap();

    assert_eq!(
        rig.bars.requests(),
        vec![(Instrument::new("ES"), at(13, 0), at(13, 30))]
    );
    let machine = rig.engine.stream(&stream_key("ES1")).unwrap();
    let machine = machine.lock().await;
    assert_eq!(machine.state(), StreamState::RangeBuilding);
    assert_eq!(machine.buffer_extremes(), (Some(dec!(100.00)), Some(dec!(99.00))));
    drop(machine);

    // Hydration is requested once per stream.
    rig.clock.set(at(13, 31));
    rig.engine.on_tick().await.unwrap();
    assert_eq!(rig.bars.requests().len(), 1);
}

#[tokio::test]
async fn failing_hydration_is_marked_incomplete() {
    let (fixture, recorder) = recording_fixture();
    let provider = StaticBarProvider::new().failing("feed down");
    let mut rig = build_rig(&fixture, es1(), provider, at(13, 30));

    rig.engine.on_tick().await.unwrap();

    let records = rig.engine.snapshot().await;
    assert!(!records[0].hydration_complete);
    assert_eq!(records[0].state, StreamState::RangeBuilding);
    assert_eq!(recorder.count("hydration_incomplete"), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_hydration_times_out() {
    let fixture = Fixture::new();
    let provider = StaticBarProvider::new()
        .with_bars("ES", canonical_range(BarSource::RequestedHistorical))
        .with_delay(Duration::from_secs(60));
    let mut rig = build_rig(&fixture, es1(), provider, at(13, 30));

    rig.engine.on_tick().await.unwrap();

    let machine = rig.engine.stream(&stream_key("ES1")).unwrap();
    let machine = machine.lock().await;
    assert!(!machine.record().hydration_complete);
    assert_eq!(machine.buffer_extremes(), (None, None));
}

#[tokio::test]
async fn bars_route_by_canonical_symbol() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();

    feed(&mut rig, "MES", canonical_range(BarSource::Live)).await;
    // Another instrument never reaches the stream.
    feed(&mut rig, "NQ", vec![flat_bar(at(14, 0), dec!(500.00))]).await;
    feed(&mut rig, "ES 03-25", vec![flat_bar(at(14, 1), dec!(99.50))]).await;

    let machine = rig.engine.stream(&stream_key("ES1")).unwrap();
    let machine = machine.lock().await;
    assert_eq!(machine.state(), StreamState::RangeLocked);
    let range = machine.range().unwrap();
    assert_eq!((range.range_high, range.range_low), (dec!(100.00), dec!(99.00)));
    assert_eq!(fixture.adapter.entry_submissions().len(), 2);
}

#[tokio::test]
async fn invalid_bars_are_dropped() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();

    let mut broken = flat_bar(at(13, 5), dec!(99.50));
    broken.high = dec!(98.00);
    feed(&mut rig, "ES", vec![broken]).await;

    let machine = rig.engine.stream(&stream_key("ES1")).unwrap();
    assert_eq!(machine.lock().await.buffer_extremes(), (None, None));
}

#[tokio::test]
async fn fills_route_by_intent_id() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();
    feed(&mut rig, "ES", canonical_range(BarSource::Live)).await;
    feed(&mut rig, "ES", vec![flat_bar(at(14, 1), dec!(99.50))]).await;

    let key = stream_key("ES1");
    let long = rig
        .engine
        .stream(&key)
        .unwrap()
        .lock()
        .await
        .record()
        .long_intent_id
        .clone()
        .unwrap();

    rig.clock.set(at(14, 2));
    rig.engine
        .on_execution(ExecutionEvent::Fill(FillReport {
            intent_id: long.clone(),
            kind: OrderKind::Entry,
            broker_order_id: None,
            price: dec!(100.30),
            delta: 1,
            at: at(14, 2),
        }))
        .await
        .unwrap();

    let machine = rig.engine.stream(&key).unwrap();
    let machine = machine.lock().await;
    assert_eq!(machine.record().active_intent_id, Some(long));
    assert_eq!(fixture.adapter.protective_submissions().len(), 2);
}

#[tokio::test]
async fn unknown_intent_is_ignored() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();

    rig.engine
        .on_execution(ExecutionEvent::Fill(FillReport {
            intent_id: IntentId::new("nobody"),
            kind: OrderKind::Entry,
            broker_order_id: None,
            price: dec!(100.00),
            delta: 1,
            at: at(13, 1),
        }))
        .await
        .unwrap();

    assert!(fixture.adapter.calls().is_empty());
}

#[tokio::test]
async fn restarted_engine_resumes_from_journals() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();
    feed(&mut rig, "ES", canonical_range(BarSource::Live)).await;
    feed(&mut rig, "ES", vec![flat_bar(at(14, 1), dec!(99.50))]).await;
    let before = rig.engine.snapshot().await;
    drop(rig);

    let restarted = fixture.restarted();
    let mut rig = build_rig(&restarted, es1(), StaticBarProvider::new(), at(14, 5));
    rig.engine.on_tick().await.unwrap();

    let after = rig.engine.snapshot().await;
    assert_eq!(after[0].range, before[0].range);
    assert_eq!(after[0].state, StreamState::RangeLocked);
    assert_eq!(fixture.adapter.entry_submissions().len(), 2);
}

#[tokio::test]
async fn rollover_drops_the_previous_days_streams() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(13, 0));
    rig.engine.on_tick().await.unwrap();
    assert_eq!(rig.engine.stream_keys().len(), 1);

    let next = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();
    rig.timetable.set_rows(next, vec![row("ES3", "ES", time(14, 0))]);
    rig.clock.set(Utc.with_ymd_and_hms(2025, 3, 11, 12, 0, 0).unwrap());

    let transition = rig.engine.sync_day().await.unwrap();

    assert_eq!(
        transition,
        Some(DayTransition::Rollover {
            previous: trading_date(),
            new: next,
        })
    );
    assert_eq!(rig.engine.trading_date(), Some(next));
    assert_eq!(
        rig.engine.stream_keys(),
        vec![StreamKey::new(next, "ES3", Instrument::new("ES"), "S1", time(14, 0))]
    );
    assert!(rig.engine.stream(&stream_key("ES1")).is_none());
}

#[tokio::test]
async fn run_loop_dispatches_inputs_until_the_channel_closes() {
    let fixture = Fixture::new();
    let provider = StaticBarProvider::new().with_bars("ES", canonical_range(BarSource::Live));
    let start = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 1).unwrap();
    let mut rig = build_rig(&fixture, es1(), provider, start);
    rig.engine.on_tick().await.unwrap();
    assert_eq!(state_of(&rig.engine, &stream_key("ES1")).await, StreamState::RangeBuilding);

    let (tx, rx) = mpsc::channel(8);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let producer = async move {
        tx.send(EngineInput::Bar(BarEvent {
            symbol: "ES".to_string(),
            bar: flat_bar(at(14, 1), dec!(99.50)),
        }))
        .await
        .unwrap();
    };

    let (result, ()) = tokio::join!(rig.engine.run(rx, stop_rx), producer);

    result.unwrap();
    assert_eq!(state_of(&rig.engine, &stream_key("ES1")).await, StreamState::RangeLocked);
    assert_eq!(fixture.adapter.entry_submissions().len(), 2);
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let fixture = Fixture::new();
    let mut rig = build_rig(&fixture, es1(), StaticBarProvider::new(), at(12, 0));
    let (_tx, rx) = mpsc::channel::<EngineInput>(8);
    let (stop_tx, stop_rx) = watch::channel(false);

    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(rig.engine.run(rx, stop_rx), stopper);

    result.unwrap();
    assert_eq!(rig.engine.trading_date(), Some(trading_date()));
}

fn replay_records() -> Vec<ReplayRecord> {
    let mut bars = canonical_range(BarSource::FileReplay);
    bars.push(bar_from(BarSource::FileReplay, at(14, 1), dec!(99.50), dec!(99.75), dec!(99.25), dec!(99.50)));
    bars.push(bar_from(BarSource::FileReplay, at(14, 2), dec!(99.75), dec!(100.50), dec!(99.75), dec!(100.40)));
    bars.push(bar_from(BarSource::FileReplay, at(14, 3), dec!(100.40), dec!(104.50), dec!(100.30), dec!(104.40)));
    bars.into_iter()
        .map(|bar| ReplayRecord {
            symbol: "MES".to_string(),
            instrument: Instrument::new("ES"),
            bar,
        })
        .collect()
}

/// Engine trading against the paper venue, hydrating from the replay file.
fn paper_engine(
    fixture: &Fixture,
    paper: &Arc<PaperAdapter>,
    records: &Arc<ReplayBarProvider>,
) -> (Engine, Arc<ReplayClock>) {
    let settings = StreamSettings {
        simulated: true,
        ..(*fixture.settings).clone()
    };
    engine_over(fixture, paper, records, Arc::new(settings))
}

fn engine_over(
    fixture: &Fixture,
    paper: &Arc<PaperAdapter>,
    records: &Arc<ReplayBarProvider>,
    settings: Arc<StreamSettings>,
) -> (Engine, Arc<ReplayClock>) {
    let clock = Arc::new(ReplayClock::new(at(12, 59)));
    let engine = Engine::new(EngineParts {
        time: time_service(),
        schedule: schedule(),
        registry: Arc::new(registry()),
        timetable: Arc::new(StaticTimetable::new().with_rows(trading_date(), es1())),
        bars: Arc::clone(records) as _,
        clock: Arc::clone(&clock) as _,
        settings,
        deps: StreamDeps {
            adapter: Arc::clone(paper) as _,
            ..fixture.deps()
        },
        options: options(),
    });
    (engine, clock)
}

#[tokio::test]
async fn replay_trades_a_breakout_to_its_target() {
    let fixture = Fixture::new();
    let paper = Arc::new(PaperAdapter::new());
    let records = Arc::new(ReplayBarProvider::from_records(replay_records()));
    let (mut engine, clock) = paper_engine(&fixture, &paper, &records);

    let summary = ReplayDriver::new(clock, Arc::clone(&paper), records)
        .finish_at(at(20, 5))
        .run(&mut engine)
        .await
        .unwrap();

    assert_eq!(summary.bars, 64);
    assert_eq!(summary.fills, 2);
    assert!(!summary.interrupted);
    let record = &summary.streams[0];
    assert_eq!(record.terminal_reason, Some(TerminalReason::TargetHit));
    let range = record.range.as_ref().unwrap();
    assert_eq!(range.freeze_close_source, BarSource::FileReplay);

    let long = record.long_intent_id.clone().unwrap();
    let entry = fixture.journal.get_entry(&long).unwrap();
    assert_eq!(entry.order(OrderKind::Entry).unwrap().average_fill_price(), Some(dec!(100.25)));
    assert_eq!(entry.order(OrderKind::Target).unwrap().average_fill_price(), Some(dec!(104.25)));
    assert_eq!(paper.position(&long), 0);
    assert_eq!(paper.working_orders(), 0);
}

#[tokio::test]
async fn replay_data_is_not_traded_outside_a_simulated_run() {
    let fixture = Fixture::new();
    let paper = Arc::new(PaperAdapter::new());
    let records = Arc::new(ReplayBarProvider::from_records(replay_records()));
    let (mut engine, clock) = engine_over(&fixture, &paper, &records, Arc::clone(&fixture.settings));

    let summary = ReplayDriver::new(clock, Arc::clone(&paper), records)
        .finish_at(at(20, 5))
        .run(&mut engine)
        .await
        .unwrap();

    assert_eq!(summary.fills, 0);
    let record = &summary.streams[0];
    assert_eq!(
        record.range.as_ref().map(|r| r.freeze_close_source),
        Some(BarSource::FileReplay)
    );
    assert_eq!(
        record.terminal_reason,
        Some(TerminalReason::NoTrade(NoTradeReason::MarketClose))
    );
    assert!(!fixture.journal.any_submission_for(&record.stream));
    assert_eq!(paper.working_orders(), 0);
}

#[tokio::test]
async fn replay_stops_between_bars_on_shutdown() {
    let fixture = Fixture::new();
    let paper = Arc::new(PaperAdapter::new());
    let records = Arc::new(ReplayBarProvider::from_records(replay_records()));
    let (mut engine, clock) = paper_engine(&fixture, &paper, &records);
    let (_stop_tx, stop_rx) = watch::channel(true);

    let summary = ReplayDriver::new(clock, Arc::clone(&paper), records)
        .with_shutdown(stop_rx)
        .finish_at(at(20, 5))
        .run(&mut engine)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.bars, 0);
    assert!(!summary.streams[0].committed);
}
