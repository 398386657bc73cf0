use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use meshflow_db::Database;
use meshflow_gateway::{Notifier, Publisher};
use meshflow_ingest::{IngestError, IngestService};
use meshflow_types::BROADCAST_ID;
use meshflow_types::events::ViewerEvent;
use meshflow_types::models::{LocationSource, ManagedNode, PacketKind};

const BASE: i64 = 1_700_000_000;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// Keeps every published event for inspection.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ViewerEvent>>,
}

impl Publisher for Recorder {
    fn publish(&self, event: &ViewerEvent) -> Result<usize> {
        self.events.lock().unwrap().push(event.clone());
        Ok(1)
    }
}

struct Unreachable;

impl Publisher for Unreachable {
    fn publish(&self, _event: &ViewerEvent) -> Result<usize> {
        Err(anyhow!("topic unavailable"))
    }
}

struct Harness {
    service: IngestService,
    db: Arc<Database>,
    owner: Uuid,
}

impl Harness {
    fn new(publisher: Arc<dyn Publisher>) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = Self::user(&db, "owner");
        Self {
            service: IngestService::new(db.clone(), publisher),
            db,
            owner,
        }
    }

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), name).unwrap();
        id
    }

    fn gateway(&self, node_id: i64, name: &str) -> ManagedNode {
        self.db.create_managed_node(node_id, name, self.owner).unwrap()
    }
}

fn text_packet(id: i64, from: i64, to: i64, text: &str, channel: i64) -> Value {
    json!({
        "id": id,
        "from": from,
        "to": to,
        "channel": channel,
        "hopLimit": 2,
        "hopStart": 3,
        "rxTime": BASE,
        "rxRssi": -101,
        "rxSnr": 4.25,
        "decoded": { "portnum": "TEXT_MESSAGE_APP", "text": text },
    })
}

#[test]
fn one_packet_many_observers() {
    let recorder = Arc::new(Recorder::default());
    let h = Harness::new(recorder.clone());
    let gateways: Vec<ManagedNode> = (0..3).map(|n| h.gateway(0x100 + n, &format!("gw-{n}"))).collect();

    let payload = text_packet(4242, 0x3ade68b1, BROADCAST_ID, "anyone out there?", 0);
    let mut first_observed = None;
    for (n, gateway) in gateways.iter().enumerate() {
        let now = at(BASE + 10 + n as i64);
        let outcome = h.service.ingest_at(gateway, &payload, now).unwrap();
        assert_eq!(outcome.event.created, n == 0);
        first_observed.get_or_insert(now);
        assert_eq!(outcome.event.packet.first_observed_time, first_observed.unwrap());
    }

    assert_eq!(h.db.count_packets(PacketKind::Message).unwrap(), 1);
    let packet = h.db.get_packet(PacketKind::Message, 4242).unwrap().unwrap();
    assert_eq!(packet.first_observed_time, at(BASE + 10));
    assert_eq!(h.db.get_observations(PacketKind::Message, packet.id).unwrap().len(), 3);

    // One message, published once, with the observers known at that point
    assert_eq!(h.db.count_text_messages().unwrap(), 1);
    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let ViewerEvent::TextMessage(view) = &events[0];
    assert_eq!(view.sender.node_id_str, "!3ade68b1");
    assert_eq!(view.sender.long_name, "Meshtastic 68b1");
    assert_eq!(view.heard.len(), 1);
    assert_eq!(view.heard[0].observer.name, "gw-0");
    assert_eq!(view.original_packet_id, packet.id);
}

#[test]
fn same_packet_id_in_different_kinds_is_distinct() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");

    h.service.ingest_at(&gw, &text_packet(77, 5, 6, "hi", 0), at(BASE)).unwrap();
    h.service
        .ingest_at(
            &gw,
            &json!({
                "id": 77, "from": 5, "rxTime": BASE,
                "decoded": { "portnum": "POSITION_APP", "position": { "latitude": 1.5, "longitude": 2.5 } },
            }),
            at(BASE),
        )
        .unwrap();

    assert_eq!(h.db.count_packets(PacketKind::Message).unwrap(), 1);
    assert_eq!(h.db.count_packets(PacketKind::Position).unwrap(), 1);
}

#[test]
fn claim_key_in_direct_message_is_accepted_once() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");
    let alice = Harness::user(&h.db, "alice");
    let radio = 0x3ade68b1;

    h.db.ensure_observed_node(radio).unwrap();
    h.db.create_claim(radio, alice, "orange tiger 42", at(BASE - 60)).unwrap().unwrap();

    h.service
        .ingest_at(&gw, &text_packet(1, radio, 0x10, "  Orange  TIGER 42 ", 0), at(BASE))
        .unwrap();

    let node = h.db.get_observed_node(radio).unwrap().unwrap();
    assert_eq!(node.claimed_by, Some(alice));
    let claim = h.db.get_claim(radio, alice).unwrap().unwrap();
    assert_eq!(claim.accepted_at, Some(at(BASE)));

    // A second DM with the same key finds nothing pending
    h.service
        .ingest_at(&gw, &text_packet(2, radio, 0x10, "orange tiger 42", 0), at(BASE + 5))
        .unwrap();
    let claim = h.db.get_claim(radio, alice).unwrap().unwrap();
    assert_eq!(claim.accepted_at, Some(at(BASE)));
}

#[test]
fn non_claim_text_and_broadcasts_leave_claims_pending() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");
    let bob = Harness::user(&h.db, "bob");
    let radio = 0x1234;

    h.db.ensure_observed_node(radio).unwrap();
    h.db.create_claim(radio, bob, "hello there friend", at(BASE - 60)).unwrap();

    h.service
        .ingest_at(&gw, &text_packet(1, radio, 0x10, "hello there friend", 0), at(BASE))
        .unwrap();
    assert!(h.db.get_claim(radio, bob).unwrap().unwrap().accepted_at.is_none());

    let carol = Harness::user(&h.db, "carol");
    h.db.create_claim(radio, carol, "blue moon 77", at(BASE - 30)).unwrap();
    h.service
        .ingest_at(&gw, &text_packet(2, radio, BROADCAST_ID, "blue moon 77", 0), at(BASE))
        .unwrap();

    assert!(h.db.get_claim(radio, carol).unwrap().unwrap().accepted_at.is_none());
    assert_eq!(h.db.get_observed_node(radio).unwrap().unwrap().claimed_by, None);
}

#[test]
fn position_without_source_is_unset_and_attributed_to_sender() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");

    h.service
        .ingest_at(
            &gw,
            &json!({
                "id": 555, "from": 0x3ade68b1_i64, "to": BROADCAST_ID, "rxTime": BASE,
                "decoded": { "portnum": "POSITION_APP", "position": { "latitude": 37.7749, "longitude": -122.4194 } },
            }),
            at(BASE + 1),
        )
        .unwrap();

    let positions = h.db.get_positions(0x3ade68b1).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].location_source, LocationSource::Unset);
    assert_eq!(positions[0].latitude, 37.7749);
    assert_eq!(positions[0].longitude, -122.4194);
    assert_eq!(positions[0].reported_time, at(BASE + 1));
    assert!(h.db.get_positions(0x10).unwrap().is_empty());
}

#[test]
fn repeated_readings_are_stored_once() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let payload = json!({
        "id": 900, "from": 42, "rxTime": BASE,
        "decoded": { "portnum": "TELEMETRY_APP", "telemetry": {
            "time": BASE - 3, "localStats": { "numPacketsTx": 5, "numOnlineNodes": 9 },
        } },
    });

    for n in 0..3 {
        let gw = h.gateway(0x20 + n, &format!("gw-{n}"));
        h.service.ingest_at(&gw, &payload, at(BASE + n)).unwrap();
    }

    let stats = h.db.get_local_stats(42).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].num_online_nodes, 9);
    assert_eq!(stats[0].num_rx_dupe, 0);
    assert_eq!(stats[0].reported_time, at(BASE - 3));
}

#[test]
fn channel_slot_resolves_through_observer_mapping() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");
    let longfast = h.db.create_message_channel("LongFast").unwrap();
    h.db.set_channel_slot(gw.id, 1, longfast).unwrap();
    let gw = h.db.get_managed_node(gw.id).unwrap().unwrap();

    let mapped = h.service.ingest_at(&gw, &text_packet(1, 5, 6, "a", 1), at(BASE)).unwrap();
    let unmapped = h.service.ingest_at(&gw, &text_packet(2, 5, 6, "b", 2), at(BASE)).unwrap();
    let out_of_range = h.service.ingest_at(&gw, &text_packet(3, 5, 6, "c", 9), at(BASE)).unwrap();

    let channel_of = |packet_ref| h.db.get_text_message_for_packet(packet_ref).unwrap().unwrap().channel_id;
    assert_eq!(channel_of(mapped.event.packet.id), Some(longfast));
    assert_eq!(channel_of(unmapped.event.packet.id), None);
    assert_eq!(channel_of(out_of_range.event.packet.id), None);
}

#[test]
fn publish_failure_keeps_the_message() {
    let h = Harness::new(Arc::new(Unreachable));
    let gw = h.gateway(0x10, "gw");

    let outcome = h.service.ingest_at(&gw, &text_packet(1, 5, 6, "still here", 0), at(BASE));
    assert!(outcome.is_ok());

    let message = h.db.get_text_message_for_packet(outcome.unwrap().event.packet.id).unwrap().unwrap();
    assert_eq!(message.message_text, "still here");
}

#[test]
fn rejected_payloads_name_the_field() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");

    let mut payload = text_packet(1, 5, 6, "a", 0);
    payload["rxTime"] = json!("soon");
    match h.service.ingest_at(&gw, &payload, at(BASE)) {
        Err(IngestError::Invalid { field, .. }) => assert_eq!(field, "rxTime"),
        other => panic!("expected rxTime error, got {:?}", other.map(|o| o.event.packet.id)),
    }
    assert_eq!(h.db.count_packets(PacketKind::Message).unwrap(), 0);
}

#[tokio::test]
async fn viewers_receive_new_messages() {
    let notifier = Notifier::new(8);
    let mut viewer = notifier.subscribe();
    let h = Harness::new(Arc::new(notifier.clone()));
    let gw = h.gateway(0x10, "gw");

    h.service
        .ingest_at(&gw, &text_packet(1, 0xabcd, BROADCAST_ID, "evening all", 0), at(BASE) + Duration::seconds(2))
        .unwrap();

    let frame: Value = serde_json::from_str(&viewer.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "text_message");
    assert_eq!(frame["data"]["message_text"], "evening all");
    assert_eq!(frame["data"]["sender"]["short_name"], "abcd");
    assert_eq!(frame["data"]["heard"][0]["observer"]["node_id_str"], "!00000010");
}

#[test]
fn simultaneous_uploads_keep_one_packet() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gateways: Vec<ManagedNode> = (0..8).map(|n| h.gateway(0x200 + n, &format!("gw-{n}"))).collect();
    let payload = text_packet(9001, 0x3ade68b1, BROADCAST_ID, "storm warning", 0);

    let (service, payload) = (&h.service, &payload);
    let outcomes: Vec<_> = std::thread::scope(|s| {
        let uploads: Vec<_> = gateways
            .iter()
            .map(|gateway| s.spawn(move || service.ingest_at(gateway, payload, at(BASE)).unwrap()))
            .collect();
        uploads.into_iter().map(|upload| upload.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.event.created).count(), 1);
    assert_eq!(h.db.count_packets(PacketKind::Message).unwrap(), 1);
    let packet = h.db.get_packet(PacketKind::Message, 9001).unwrap().unwrap();
    assert!(outcomes.iter().all(|outcome| outcome.event.packet.id == packet.id));
    assert_eq!(h.db.get_observations(PacketKind::Message, packet.id).unwrap().len(), 8);
    assert_eq!(h.db.count_text_messages().unwrap(), 1);
}

#[test]
fn racing_claim_messages_accept_once() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let gw = h.gateway(0x10, "gw");
    let dana = Harness::user(&h.db, "dana");
    let radio = 0x0bad_cafe;

    h.db.ensure_observed_node(radio).unwrap();
    h.db.create_claim(radio, dana, "silver river 31", at(BASE - 60)).unwrap().unwrap();

    // Distinct packets carrying the same key, uploaded at once
    std::thread::scope(|s| {
        for id in 0..6 {
            let (h, gw) = (&h, &gw);
            s.spawn(move || {
                let payload = text_packet(500 + id, radio, 0x10, "silver river 31", 0);
                h.service.ingest_at(gw, &payload, at(BASE + id)).unwrap();
            });
        }
    });

    assert_eq!(h.db.count_text_messages().unwrap(), 6);
    assert_eq!(h.db.get_observed_node(radio).unwrap().unwrap().claimed_by, Some(dana));
    assert!(h.db.get_claim(radio, dana).unwrap().unwrap().accepted_at.is_some());
}

#[test]
fn parallel_claim_acceptance_has_one_winner() {
    let h = Harness::new(Arc::new(Notifier::new(8)));
    let erin = Harness::user(&h.db, "erin");
    let radio = 0x77;

    h.db.ensure_observed_node(radio).unwrap();
    h.db.create_claim(radio, erin, "copper comet 88", at(BASE)).unwrap().unwrap();

    let accepted: Vec<_> = std::thread::scope(|s| {
        let attempts: Vec<_> = (0..8)
            .map(|n| {
                let db = &h.db;
                s.spawn(move || db.accept_claim(radio, "copper comet 88", at(BASE + n)).unwrap())
            })
            .collect();
        attempts.into_iter().filter_map(|attempt| attempt.join().unwrap()).collect()
    });

    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].user_id, erin);
    let stored = h.db.get_claim(radio, erin).unwrap().unwrap();
    assert_eq!(stored.accepted_at, accepted[0].accepted_at);
}
