//! On-disk journals: what a later process reads back after a trade, a torn
//! write and a series of incidents.

mod harness;

use std::fs::OpenOptions;
use std::io::Write;

use harness::temp_journal::TempJournal;
use rangelock::application::{
    ExecutionJournal, FileStreamJournalStore, IncidentKind, StreamJournalStore, StreamMachine,
};
use rangelock::domain::{BarSource, IntentId, OrderKind, OrderLifecycle, StreamState};
use rangelock::port::FillReport;
use rangelock::testkit::domain::{at, bar, canonical_range, flat_bar, stream_config, stream_key, trading_date};
use rangelock::testkit::stream::Fixture;
use rust_decimal_macros::dec;

async fn long_position(fixture: &Fixture) -> (StreamMachine, IntentId) {
    let mut machine = fixture
        .hydrated(stream_config("ES1"), canonical_range(BarSource::Live), at(14, 0))
        .await;
    machine
        .on_bar(&flat_bar(at(14, 1), dec!(99.50)), at(14, 1))
        .await
        .unwrap();
    let long = machine.record().long_intent_id.clone().unwrap();
    machine
        .on_fill(
            &FillReport {
                intent_id: long.clone(),
                kind: OrderKind::Entry,
                broker_order_id: None,
                price: dec!(100.30),
                delta: 1,
                at: at(14, 2),
            },
            at(14, 2),
        )
        .await
        .unwrap();
    (machine, long)
}

#[tokio::test]
async fn reopened_ledger_replays_the_trade() {
    let temp = TempJournal::create();
    let fixture = Fixture::on_disk(temp.root());
    let (mut machine, long) = long_position(&fixture).await;
    machine
        .on_bar(&bar(at(14, 5), dec!(100.50), dec!(103.00), dec!(100.50), dec!(102.50)), at(14, 5))
        .await
        .unwrap();
    let short = machine.record().short_intent_id.clone().unwrap();
    drop(machine);

    let reopened = ExecutionJournal::open(temp.root().join("execution")).unwrap();

    let entry = reopened.get_entry(&long).unwrap();
    assert_eq!(entry.entry_filled(), 1);
    assert_eq!(entry.open_quantity(), 1);
    assert_eq!(entry.break_even_stop, Some(dec!(100.00)));
    let stop = entry.order(OrderKind::Stop).unwrap();
    assert_eq!(stop.price, Some(dec!(100.00)));
    assert!(stop.is_working());
    let broker_id = stop.broker_order_id.clone().unwrap();
    assert_eq!(reopened.locate_broker_order(&broker_id), Some((long.clone(), OrderKind::Stop)));

    assert!(reopened.get_entry(&short).unwrap().order(OrderKind::Entry).unwrap().cancelled);
    assert_eq!(reopened.intents_for(&stream_key("ES1")).len(), 2);
    assert!(reopened.is_break_even_applied(&long));
}

#[tokio::test]
async fn torn_ledger_write_keeps_the_open_position() {
    let temp = TempJournal::create();
    let fixture = Fixture::on_disk(temp.root());
    let (machine, long) = long_position(&fixture).await;
    drop(machine);
    assert_eq!(fixture.adapter.protective_submissions().len(), 2);

    // Crash in the middle of appending a record.
    let path = temp.root().join("execution").join(format!("{long}.jsonl"));
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"record":"filled","kind":"tar"#).unwrap();
    drop(file);

    let restarted = fixture.restarted();
    let mut restored = restarted.restore(stream_config("ES1"), at(14, 10)).await;

    assert!(!restored.is_committed());
    assert_eq!(restored.record().active_intent_id, Some(long.clone()));
    assert_eq!(restored.record().order_state, OrderLifecycle::ProtectiveSubmitted);
    assert_eq!(restarted.journal.get_entry(&long).unwrap().open_quantity(), 1);
    // Protectives already working at the right size are left alone.
    assert_eq!(fixture.adapter.protective_submissions().len(), 2);

    restored
        .on_fill(
            &FillReport {
                intent_id: long.clone(),
                kind: OrderKind::Target,
                broker_order_id: None,
                price: dec!(104.25),
                delta: 1,
                at: at(14, 20),
            },
            at(14, 20),
        )
        .await
        .unwrap();
    assert!(restored.is_committed());
    let reopened = ExecutionJournal::open(temp.root().join("execution")).unwrap();
    assert_eq!(reopened.get_entry(&long).unwrap().open_quantity(), 0);
}

#[tokio::test]
async fn stream_records_are_listed_per_day() {
    let temp = TempJournal::create();
    let fixture = Fixture::on_disk(temp.root());
    let _es1 = fixture.create(stream_config("ES1"), at(12, 0));
    let _es2 = fixture.create(stream_config("ES2"), at(12, 0));

    let store = FileStreamJournalStore::new(temp.root().join("streams"));
    let mut records = store.list(trading_date()).unwrap();
    records.sort_by(|a, b| a.stream.stream.cmp(&b.stream.stream));

    assert_eq!(temp.stream_files(trading_date()).len(), 2);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].stream, stream_key("ES1"));
    assert!(records.iter().all(|r| r.state == StreamState::PreHydration));
    assert!(store.list(trading_date().succ_opt().unwrap()).unwrap().is_empty());
}

#[tokio::test]
async fn incidents_accumulate_across_restarts() {
    let temp = TempJournal::create();
    let fixture = Fixture::on_disk(temp.root());
    let mut machine = fixture.hydrated(stream_config("ES1"), Vec::new(), at(14, 0)).await;
    machine.on_tick(at(14, 1)).await.unwrap();
    assert!(machine.is_committed());

    let restarted = fixture.restarted();
    restarted
        .health
        .record_incident(IncidentKind::FlattenFailed, None, "operator drill", at(15, 0))
        .unwrap();

    let incidents = temp.incidents();
    assert_eq!(incidents.len(), 2);
    assert_eq!(incidents[0].kind, IncidentKind::NoRangeData);
    assert_eq!(incidents[0].stream, Some(stream_key("ES1")));
    assert_eq!(incidents[1].kind, IncidentKind::FlattenFailed);
    assert_eq!(restarted.health.incidents().len(), 1);
}
