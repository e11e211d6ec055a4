mod utils;

use std::{sync::Arc, time::Duration};

use googletest::prelude::*;
use jupyter_bridge_kernel::{EventKind, ExecutionState, KernelEvent};
use jupyter_bridge_relay::{CorrelationTable, EventRelay, OutputWriter};
use mock_kernel::MockKernel;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use utils::{wait_until, SharedBuffer};

fn stream(parent: Option<&str>, text: &str) -> KernelEvent {
    KernelEvent::new(
        parent,
        EventKind::Stream {
            name: "stdout".to_string(),
            text: text.to_string(),
        },
    )
}

fn relay_for(
    kernel: &Arc<MockKernel>,
    table: &Arc<CorrelationTable>,
    output: &SharedBuffer,
) -> EventRelay {
    EventRelay::new(
        kernel.clone(),
        Arc::clone(table),
        Arc::new(OutputWriter::new(output.clone())),
        Duration::from_millis(10),
    )
}

#[googletest::test]
#[tokio::test]
async fn relay_tags_events_with_originating_request() {
    let kernel = Arc::new(MockKernel::new());
    let table = Arc::new(CorrelationTable::new());
    let output = SharedBuffer::default();
    table.register("m1", Some("r1".to_string()));
    let cancellation = CancellationToken::new();

    let handle = relay_for(&kernel, &table, &output).spawn(cancellation.clone());
    kernel.push_event(stream(Some("m1"), "hello\n"));
    kernel.push_event(stream(None, "orphan\n"));

    expect_that!(wait_until(|| output.responses().len() == 2).await, eq(true));
    cancellation.cancel();
    handle.await.unwrap();

    expect_that!(
        output.responses(),
        elements_are![
            eq(json!({ "type": "stream", "id": "r1", "name": "stdout", "text": "hello\n" })),
            eq(json!({ "type": "stream", "id": null, "name": "stdout", "text": "orphan\n" }))
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn relay_filters_unreported_events() {
    let kernel = Arc::new(MockKernel::new());
    let table = Arc::new(CorrelationTable::new());
    let output = SharedBuffer::default();
    let cancellation = CancellationToken::new();

    let handle = relay_for(&kernel, &table, &output).spawn(cancellation.clone());
    kernel.push_event(KernelEvent::new(
        None,
        EventKind::Status {
            state: ExecutionState::Other("starting".to_string()),
        },
    ));
    kernel.push_event(KernelEvent::new(
        None,
        EventKind::Unclassified {
            msg_type: "comm_open".to_string(),
        },
    ));
    kernel.push_event(stream(None, "marker\n"));

    expect_that!(wait_until(|| !output.responses().is_empty()).await, eq(true));
    cancellation.cancel();
    handle.await.unwrap();

    let responses = output.responses();
    expect_that!(responses, len(eq(1)));
    expect_that!(responses[0]["text"], eq("marker\n"));
}

#[googletest::test]
#[tokio::test]
async fn relay_stops_promptly_when_cancelled() {
    let kernel = Arc::new(MockKernel::new());
    let table = Arc::new(CorrelationTable::new());
    let output = SharedBuffer::default();
    let cancellation = CancellationToken::new();

    let handle = relay_for(&kernel, &table, &output).spawn(cancellation.clone());
    expect_that!(wait_until(|| kernel.polls() > 2).await, eq(true));

    cancellation.cancel();
    let joined = timeout(Duration::from_millis(500), handle).await;
    expect_that!(joined, ok(ok(anything())));

    let polls = kernel.polls();
    kernel.push_event(stream(None, "too late\n"));
    sleep(Duration::from_millis(50)).await;

    expect_that!(kernel.polls(), eq(polls));
    expect_that!(output.responses(), empty());
}

#[googletest::test]
#[tokio::test]
async fn relay_keeps_polling_after_channel_errors() {
    let kernel = Arc::new(MockKernel::new().with_failing_polls(3));
    let table = Arc::new(CorrelationTable::new());
    let output = SharedBuffer::default();
    let cancellation = CancellationToken::new();

    let handle = relay_for(&kernel, &table, &output).spawn(cancellation.clone());
    kernel.push_event(stream(None, "after errors\n"));

    expect_that!(wait_until(|| output.responses().len() == 1).await, eq(true));
    cancellation.cancel();
    handle.await.unwrap();

    expect_that!(kernel.polls(), ge(4));
}
