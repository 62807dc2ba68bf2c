mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;

use grouparchive::{
    archive::{
        planner::{PlanOutcome, PlanRequest, load_or_create_operation},
        snapshot::{IdStream, group_details},
    },
    message::FailedMessage,
    record::OperationRecord,
    store::{DocumentStore, memory::InMemoryDocumentStore},
    types::{ArchiveType, MessageStatus, OperationKind, UNDEFINED_GROUP_NAME},
};

use common::{messages, message};

fn request(kind: OperationKind, group_id: &str, batch_size: usize) -> PlanRequest<'_> {
    PlanRequest {
        kind,
        group_id,
        archive_type: ArchiveType::FailureGroup,
        batch_size,
        page_size: 128,
    }
}

fn batch_sizes(store: &dyn DocumentStore, op: &OperationRecord) -> Vec<usize> {
    (0..op.total_batches)
        .map(|i| {
            store
                .load_batch(&op.batch_id(i))
                .expect("load batch")
                .map_or(0, |b| b.message_ids.len())
        })
        .collect()
}

#[test]
fn group_of_2500_is_split_into_three_batches() {
    let store = InMemoryDocumentStore::new();
    store
        .insert_messages(messages("g1", 2500, MessageStatus::Unresolved))
        .expect("seed");

    let outcome = load_or_create_operation(&store, &request(OperationKind::Archive, "g1", 1000)).expect("plan");
    let PlanOutcome::Created(op) = outcome else {
        panic!("expected a new plan, got {outcome:?}");
    };

    assert_eq!(op.version, 1);
    assert_eq!(op.value.id, "ArchiveOperations/g1/FailureGroup");
    assert_eq!(op.value.total_message_count, 2500);
    assert_eq!(op.value.total_batches, 3);
    assert_eq!(op.value.current_batch, 0);
    assert_eq!(op.value.processed_count, 0);
    assert_eq!(op.value.group_name, "Exception in g1");
    assert_eq!(batch_sizes(&store, &op.value), vec![1000, 1000, 500]);
    assert_eq!(
        store.batch_ids().expect("ids"),
        vec![
            "ArchiveOperations/g1/FailureGroup/0".to_string(),
            "ArchiveOperations/g1/FailureGroup/1".to_string(),
            "ArchiveOperations/g1/FailureGroup/2".to_string(),
        ]
    );
    // Planning does not touch message statuses.
    assert_eq!(store.count_with_status(MessageStatus::Unresolved).expect("count"), 2500);
}

#[test]
fn planning_twice_resumes_the_first_plan() {
    let store = InMemoryDocumentStore::new();
    store
        .insert_messages(messages("g1", 30, MessageStatus::Unresolved))
        .expect("seed");

    let first = load_or_create_operation(&store, &request(OperationKind::Archive, "g1", 10))
        .expect("plan")
        .into_record()
        .expect("record");

    store
        .insert_messages(messages("g1", 45, MessageStatus::Unresolved))
        .expect("more");
    let second = load_or_create_operation(&store, &request(OperationKind::Archive, "g1", 10)).expect("replan");

    assert_eq!(second, PlanOutcome::Resumed(first.clone()));
    assert_eq!(store.batch_ids().expect("ids").len(), 3);
}

#[test]
fn empty_or_unknown_group_has_nothing_to_do() {
    let store = InMemoryDocumentStore::new();
    store
        .insert_messages(messages("g2", 4, MessageStatus::Archived))
        .expect("seed");

    let outcome = load_or_create_operation(&store, &request(OperationKind::Archive, "g2", 10)).expect("plan");
    assert_eq!(
        outcome,
        PlanOutcome::NothingToDo {
            group_name: UNDEFINED_GROUP_NAME.to_string()
        }
    );
    assert!(store.list_operations().expect("list").is_empty());
    assert!(store.batch_ids().expect("ids").is_empty());

    let outcome = load_or_create_operation(&store, &request(OperationKind::Archive, "nope", 10)).expect("plan");
    assert!(matches!(outcome, PlanOutcome::NothingToDo { .. }));
}

#[test]
fn unarchive_plans_from_archived_messages_only() {
    let store = InMemoryDocumentStore::new();
    let mut seeded = messages("g3", 6, MessageStatus::Archived);
    seeded.push(message("g3", 99, MessageStatus::Unresolved));
    store.insert_messages(seeded).expect("seed");

    let op = load_or_create_operation(&store, &request(OperationKind::Unarchive, "g3", 4))
        .expect("plan")
        .into_record()
        .expect("record");

    assert_eq!(op.value.id, "UnarchiveOperations/g3/FailureGroup");
    assert_eq!(op.value.total_message_count, 6);
    assert_eq!(batch_sizes(&store, &op.value), vec![4, 2]);
    let planned: Vec<String> = (0..2)
        .flat_map(|i| store.load_batch(&op.value.batch_id(i)).expect("load").expect("batch").message_ids)
        .collect();
    assert!(!planned.contains(&FailedMessage::make_id("g3-000099")));
}

#[test]
fn archive_and_unarchive_of_one_group_are_independent() {
    let store = InMemoryDocumentStore::new();
    let mut seeded = messages("g4", 3, MessageStatus::Unresolved);
    seeded.extend((10..12).map(|i| message("g4", i, MessageStatus::Archived)));
    store.insert_messages(seeded).expect("seed");

    let archive = load_or_create_operation(&store, &request(OperationKind::Archive, "g4", 10)).expect("archive");
    let unarchive = load_or_create_operation(&store, &request(OperationKind::Unarchive, "g4", 10)).expect("unarchive");

    assert!(matches!(archive, PlanOutcome::Created(_)));
    assert!(matches!(unarchive, PlanOutcome::Created(_)));
    assert_eq!(store.list_operations().expect("list").len(), 2);
}

#[test]
fn id_stream_pages_through_the_whole_group_in_order() {
    let store = InMemoryDocumentStore::new();
    store
        .insert_messages(messages("g5", 23, MessageStatus::Unresolved))
        .expect("seed");
    store
        .insert_messages(messages("other", 5, MessageStatus::Unresolved))
        .expect("seed other");

    let ids: Vec<String> = IdStream::new(&store, "g5", MessageStatus::Unresolved, 5)
        .collect::<Result<_, _>>()
        .expect("stream");

    assert_eq!(ids.len(), 23);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(ids.iter().all(|id| id.starts_with("FailedMessages/g5-")));

    let details = group_details(&store, "g5", MessageStatus::Unresolved).expect("details");
    assert_eq!(details.message_count, 23);
    assert_eq!(details.group_name, "Exception in g5");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn batches_partition_the_group(n in 1usize..180, batch_size in 1usize..40, page_size in 1usize..50) {
        let store = InMemoryDocumentStore::new();
        store.insert_messages(messages("p", n, MessageStatus::Unresolved)).expect("seed");

        let op = load_or_create_operation(
            &store,
            &PlanRequest {
                kind: OperationKind::Archive,
                group_id: "p",
                archive_type: ArchiveType::FailureGroup,
                batch_size,
                page_size,
            },
        )
        .expect("plan")
        .into_record()
        .expect("record");

        prop_assert_eq!(op.value.total_batches, n.div_ceil(batch_size));
        prop_assert_eq!(op.value.total_message_count, n);

        let mut seen = BTreeSet::new();
        for i in 0..op.value.total_batches {
            let batch = store.load_batch(&op.value.batch_id(i)).expect("load").expect("batch");
            prop_assert_eq!(batch.batch_index, i);
            prop_assert!(!batch.message_ids.is_empty());
            prop_assert!(batch.message_ids.len() <= batch_size);
            if i + 1 < op.value.total_batches {
                prop_assert_eq!(batch.message_ids.len(), batch_size);
            }
            for id in batch.message_ids {
                prop_assert!(seen.insert(id), "id planned twice");
            }
        }
        let expected: BTreeSet<String> = messages("p", n, MessageStatus::Unresolved).into_iter().map(|m| m.id).collect();
        prop_assert_eq!(seen, expected);
    }
}
