//! Routing canonical events over optimistic state.

mod common;

use assert_matches::assert_matches;
use common::{Harness, SID, message_ids, message_info, part_ids, part_props, session_info};
use serde_json::json;
use tether_core::{
    Message, OptimisticSource, Part, PartBody, RoutingError, ToolState, ToolStatus, ValidationError,
};
use tether_store::{EntityKind, MatchStrategy};
use tether_sync::SessionPhase;

#[test]
fn text_part_replaces_optimistic_by_message_and_type() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h
        .graph()
        .stage_part(Part::text("m1-text-opt", "m1", "hel").in_session(SID), OptimisticSource::Stream)
        .unwrap();

    let _ = h.send("message.part.updated", part_props(&Part::text("m1-text", "m1", "hello").in_session(SID)));

    let parts = h.graph().parts().get_by_message("m1");
    assert_eq!(part_ids(&parts), ["m1-text"]);
    assert!(!h.graph().parts().contains("m1-text-opt"));
    let recon = h.observer.reconciliations();
    assert_eq!(recon.len(), 1);
    assert_eq!(recon[0].kind, EntityKind::Part);
    assert_eq!(recon[0].from, "m1-text-opt");
    assert_eq!(recon[0].strategy, MatchStrategy::MessageType);
}

#[test]
fn tool_part_matches_on_call_id() {
    let mut h = Harness::new();
    h.open(&[Message::assistant("m1", SID, "u0", 1_000)]);
    let optimistic = Part::tool("tool-opt", "m1", "bash", "c1", ToolState::new(ToolStatus::Running));
    let _ = h.graph().stage_part(optimistic, OptimisticSource::Stream).unwrap();

    let canonical = Part::tool("tool-1", "m1", "bash", "c1", ToolState::new(ToolStatus::Completed));
    let _ = h.send("message.part.updated", part_props(&canonical));

    assert!(!h.graph().parts().contains("tool-opt"));
    let part = h.graph().parts().get("tool-1").unwrap();
    assert!(!part.is_optimistic());
    assert_matches!(part.body, PartBody::Tool { ref state, .. } if state.status == ToolStatus::Completed);
    assert_eq!(h.observer.reconciliations()[0].strategy, MatchStrategy::MessageCallId);
}

#[test]
fn shared_id_resolves_by_exact_id() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h
        .graph()
        .stage_part(Part::text("shared-1", "m1", "draft"), OptimisticSource::Local)
        .unwrap();

    let _ = h.send("message.part.updated", part_props(&Part::text("shared-1", "m1", "final")));

    let parts = h.graph().parts().get_by_message("m1");
    assert_eq!(parts.len(), 1);
    assert!(!parts[0].is_optimistic());
    assert_matches!(parts[0].body, PartBody::Text { ref text } if text == "final");
    assert_eq!(h.observer.reconciliations()[0].strategy, MatchStrategy::ExactId);
}

#[test]
fn user_message_by_parent_window_role_then_dependent_by_exact_id() {
    let mut h = Harness::new();
    h.open(&[]);
    h.clock.set(10_000);
    let _ = h
        .graph()
        .stage_message(Message::user("opt-u1", SID, 10_000), OptimisticSource::Local)
        .unwrap();
    let _ = h
        .graph()
        .stage_message(Message::assistant("a1", SID, "opt-u1", 10_050), OptimisticSource::Stream)
        .unwrap();

    h.clock.set(10_400);
    let _ = h.send("message.updated", message_info(&Message::user("can-u1", SID, 10_200)));

    // The optimistic dependent follows its parent to the canonical id.
    let a1 = h.graph().messages().get("a1").unwrap();
    assert!(a1.is_optimistic());
    assert_eq!(a1.parent_id.as_deref(), Some("can-u1"));

    let _ = h.send(
        "message.updated",
        message_info(&Message::assistant("a1", SID, "can-u1", 10_300)),
    );

    let messages = h.graph().messages().get_by_session(SID);
    let mut ids = message_ids(&messages);
    ids.sort_unstable();
    assert_eq!(ids, ["a1", "can-u1"]);
    assert!(messages.iter().all(|m| !m.is_optimistic()));

    let strategies: Vec<_> = h.observer.reconciliations().into_iter().map(|r| (r.from, r.strategy)).collect();
    assert_eq!(
        strategies,
        [
            ("opt-u1".to_owned(), MatchStrategy::ParentWindowRole),
            ("a1".to_owned(), MatchStrategy::ExactId),
        ]
    );
}

#[test]
fn stale_optimistic_message_outside_window_is_not_matched() {
    let mut h = Harness::new();
    h.open(&[]);
    let _ = h
        .graph()
        .stage_message(Message::user("opt-u1", SID, 1_000), OptimisticSource::Local)
        .unwrap();

    h.clock.advance(31_000);
    let _ = h.send("message.updated", message_info(&Message::user("can-u1", SID, 32_000)));

    assert!(h.graph().messages().contains("opt-u1"));
    assert!(h.graph().messages().contains("can-u1"));
    assert!(h.observer.reconciliations().is_empty());
}

#[test]
fn no_optimistic_record_shares_a_reconciled_key() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    for id in ["opt-a", "opt-b"] {
        let _ = h
            .graph()
            .stage_part(Part::text(id, "m1", ""), OptimisticSource::Stream)
            .unwrap();
    }

    let canonical = Part::text("m1-text", "m1", "done");
    let key = canonical.correlation_key();
    let _ = h.send("message.part.updated", part_props(&canonical));

    assert_eq!(h.observer.reconciliations()[0].from, "opt-a");
    let leftovers = h
        .graph()
        .parts()
        .find(|p| p.optimistic.as_ref().is_some_and(|m| m.correlation_key == key));
    assert!(leftovers.is_empty());
    assert_eq!(part_ids(&h.graph().parts().get_by_message("m1")), ["m1-text"]);
}

#[test]
fn parts_follow_message_id_change() {
    let mut h = Harness::new();
    h.open(&[]);
    let _ = h
        .graph()
        .stage_message(Message::user("opt-u1", SID, 1_000), OptimisticSource::Local)
        .unwrap();
    let _ = h
        .graph()
        .stage_part(Part::text("u1-text", "opt-u1", "hi"), OptimisticSource::Local)
        .unwrap();

    let _ = h.send("message.updated", message_info(&Message::user("can-u1", SID, 1_005)));

    assert!(h.graph().parts().get_by_message("opt-u1").is_empty());
    let moved = h.graph().parts().get_by_message("can-u1");
    assert_eq!(part_ids(&moved), ["u1-text"]);
    assert!(moved[0].is_optimistic());
    assert_eq!(h.router.phase(SID), Some(SessionPhase::Streaming));
}

#[test]
fn part_for_unknown_message_is_rejected() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);

    let _ = h.send("message.part.updated", part_props(&Part::text("p1", "missing", "x")));

    assert!(h.graph().parts().get_by_message("missing").is_empty());
    assert!(!h.graph().parts().contains("p1"));
    assert_matches!(
        h.observer.validation_errors().as_slice(),
        [ValidationError::MissingMessage { part_id, message_id }]
            if part_id == "p1" && message_id == "missing"
    );
}

#[test]
fn message_for_unknown_session_is_rejected() {
    let mut h = Harness::new();
    let _ = h.send("message.updated", message_info(&Message::user("m1", SID, 1)));
    assert!(h.graph().messages().is_empty());
    assert_matches!(
        h.observer.validation_errors().as_slice(),
        [ValidationError::MissingSession { .. }]
    );
}

#[test]
fn session_delete_cascades_to_parts() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h.send("message.part.updated", part_props(&Part::text("p1", "m1", "x")));
    let _ = h.send(
        "question.requested",
        json!({"id": "q1", "sessionID": SID, "question": "continue?"}),
    );

    let _ = h.send("session.deleted", json!({"info": {"id": SID}}));

    let snapshot = h.graph().snapshot();
    assert!(snapshot.sessions.is_empty());
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.parts.is_empty());
    assert!(snapshot.questions.is_empty());
    assert_eq!(h.router.tracked_sessions(), 0);
}

#[test]
fn replayed_event_is_a_noop() {
    let mut h = Harness::new();
    let created = h.event("session.created", session_info());
    let _ = h.router.route(created.clone()).unwrap();
    let message = h.event("message.updated", message_info(&Message::user("m1", SID, 1)));
    let _ = h.router.route(message.clone()).unwrap();
    let before = h.graph().snapshot();

    assert_matches!(h.router.route(message), Err(RoutingError::Duplicate { .. }));
    assert_matches!(h.router.route(created), Err(RoutingError::Duplicate { .. }));

    assert_eq!(h.graph().snapshot(), before);
    assert_eq!(h.router.cursor(SID), Some(2));
}

#[test]
fn unknown_type_is_reported_and_does_not_block() {
    let mut h = Harness::new();
    h.open(&[]);
    assert_eq!(h.send("lsp.diagnostics", json!({"file": "a.rs"})), 1);
    let _ = h.send("message.updated", message_info(&Message::user("m1", SID, 1)));

    assert_matches!(
        h.observer.routing_errors().as_slice(),
        [RoutingError::UnknownEventType { event_type, .. }] if event_type == "lsp.diagnostics"
    );
    assert!(h.graph().messages().contains("m1"));
}

#[test]
fn malformed_payload_is_reported_and_does_not_block() {
    let mut h = Harness::new();
    h.open(&[]);
    let _ = h.send("message.updated", json!({"info": {"id": 7}}));
    let _ = h.send("message.updated", message_info(&Message::user("m1", SID, 1)));

    assert_matches!(
        h.observer.routing_errors().as_slice(),
        [RoutingError::MalformedPayload { .. }]
    );
    assert!(h.graph().messages().contains("m1"));
}

#[test]
fn out_of_order_events_wait_for_the_gap() {
    let mut h = Harness::new();
    let created = h.event("session.created", session_info());
    let message = h.event("message.updated", message_info(&Message::user("m1", SID, 1)));
    let part = h.event("message.part.updated", part_props(&Part::text("p1", "m1", "x")));

    assert_eq!(h.router.route(part).unwrap(), 0);
    assert_eq!(h.router.route(message).unwrap(), 0);
    assert_eq!(h.router.buffered(SID), 2);
    assert!(h.graph().parts().is_empty());

    assert_eq!(h.router.route(created).unwrap(), 3);
    assert_eq!(h.router.buffered(SID), 0);
    assert!(h.graph().parts().contains("p1"));
    assert!(h.observer.validation_errors().is_empty());
}

#[test]
fn update_of_existing_part_sweeps_optimistic_duplicate() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h.send("message.part.updated", part_props(&Part::text("m1-text", "m1", "hel")));
    let _ = h
        .graph()
        .stage_part(Part::text("m1-text-opt", "m1", "hell"), OptimisticSource::Stream)
        .unwrap();

    let canonical = Part::text("m1-text", "m1", "hello");
    let key = canonical.correlation_key();
    let _ = h.send("message.part.updated", part_props(&canonical));

    let leftovers = h
        .graph()
        .parts()
        .find(|p| p.optimistic.as_ref().is_some_and(|m| m.correlation_key == key));
    assert!(leftovers.is_empty());
    assert_eq!(part_ids(&h.graph().parts().get_by_message("m1")), ["m1-text"]);
    assert!(h.observer.reconciliations().is_empty());
}

#[test]
fn permission_part_replaces_optimistic_by_permission_id() {
    let mut h = Harness::new();
    h.open(&[Message::assistant("m1", SID, "u0", 1_000)]);
    let permission = |id: &str| {
        Part::new(
            id,
            "m1",
            PartBody::Permission {
                permission_id: "perm-1".into(),
                tool_name: "bash".into(),
                args: json!({"cmd": "ls"}),
            },
        )
    };
    let _ = h
        .graph()
        .stage_part(permission("opt-perm"), OptimisticSource::Stream)
        .unwrap();

    let _ = h.send("message.part.updated", part_props(&permission("prt-perm")));

    assert_eq!(part_ids(&h.graph().parts().get_by_message("m1")), ["prt-perm"]);
    let recon = h.observer.reconciliations();
    assert_eq!(recon.len(), 1);
    assert_eq!(recon[0].from, "opt-perm");
    assert_eq!(recon[0].strategy, MatchStrategy::MessagePermissionId);
}

#[test]
fn new_message_sweeps_same_key_leftover_outside_window() {
    let mut h = Harness::new();
    h.open(&[]);
    let _ = h
        .graph()
        .stage_message(Message::user("opt-u1", SID, 1_000), OptimisticSource::Local)
        .unwrap();
    let _ = h
        .graph()
        .stage_part(Part::text("opt-u1-text", "opt-u1", "hi"), OptimisticSource::Local)
        .unwrap();

    h.clock.advance(31_000);
    let _ = h.send("message.updated", message_info(&Message::user("u1", SID, 1_000)));

    assert_eq!(message_ids(&h.graph().messages().get_by_session(SID)), ["u1"]);
    assert!(h.graph().parts().is_empty());
    assert!(h.observer.reconciliations().is_empty());
    assert!(!h.graph().has_optimistic(SID));
}

#[test]
fn optimistic_events_are_staged_then_reconciled() {
    let mut h = Harness::new();
    h.open(&[]);
    let optimistic_user = Message::user("opt-u1", SID, 1_000).into_optimistic(OptimisticSource::Local, 1_000);
    let optimistic_text =
        Part::text("opt-u1-text", "opt-u1", "list files").into_optimistic(OptimisticSource::Local, 1_000);
    let _ = h.send("message.updated", message_info(&optimistic_user));
    let _ = h.send("message.part.updated", part_props(&optimistic_text));

    assert!(h.graph().messages().get("opt-u1").unwrap().is_optimistic());
    assert!(h.graph().has_optimistic(SID));
    assert!(h.observer.reconciliations().is_empty());

    h.clock.advance(200);
    let _ = h.send("message.updated", message_info(&Message::user("u1", SID, 1_150)));
    let _ = h.send("message.part.updated", part_props(&Part::text("u1-text", "u1", "list files")));

    assert_eq!(message_ids(&h.graph().messages().get_by_session(SID)), ["u1"]);
    assert_eq!(part_ids(&h.graph().parts().get_by_message("u1")), ["u1-text"]);
    assert!(!h.graph().has_optimistic(SID));
    let strategies: Vec<_> = h.observer.reconciliations().into_iter().map(|r| r.strategy).collect();
    assert_eq!(strategies, [MatchStrategy::ParentWindowRole, MatchStrategy::MessageType]);
}

#[test]
fn extreme_optimistic_timestamp_falls_outside_window() {
    let mut h = Harness::new();
    h.open(&[]);
    let ancient = Message::user("opt-u1", SID, 1_000).into_optimistic(OptimisticSource::Stream, i64::MIN);
    let _ = h.send("message.updated", message_info(&ancient));
    h.clock.set(i64::MAX);

    let _ = h.send("message.updated", message_info(&Message::user("u1", SID, 1_000)));

    assert!(h.observer.reconciliations().is_empty());
    assert_eq!(message_ids(&h.graph().messages().get_by_session(SID)), ["u1"]);
}

#[test]
fn late_events_after_delete_do_not_recreate_state() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h.send("session.deleted", json!({"info": {"id": SID}}));

    let late = h.event("message.part.updated", part_props(&Part::text("p1", "m1", "x")));
    assert_matches!(h.router.route(late), Err(RoutingError::SessionDeleted { .. }));
    assert_eq!(h.router.tracked_sessions(), 0);
    assert_eq!(h.router.buffered(SID), 0);
    assert!(h.graph().snapshot().parts.is_empty());
}

#[test]
fn removal_addressed_to_another_session_is_refused() {
    let mut h = Harness::new();
    h.open(&[Message::user("m1", SID, 1_000)]);
    let _ = h.send("message.part.updated", part_props(&Part::text("p1", "m1", "x")));
    let foreign = tether_sync::InboundEvent::new(
        "s2-0",
        0,
        "message.removed",
        "s2",
        json!({"sessionID": "s2", "messageID": "m1"}),
    );

    assert_eq!(h.router.route(foreign).unwrap(), 1);

    assert!(h.graph().messages().contains("m1"));
    assert!(h.graph().parts().contains("p1"));
    assert_matches!(
        h.observer.routing_errors().as_slice(),
        [RoutingError::NotOwned { record_id, owner, .. }] if record_id == "m1" && owner == SID
    );
}
