mod utils;

use std::{sync::Arc, time::Duration};

use googletest::prelude::*;
use jupyter_bridge_relay::{detached_reader, Bridge, ExitStatus, LifecycleState, OutputWriter};
use mock_kernel::{MockKernel, StartBehavior};
use serde_json::json;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    time::{sleep, timeout},
};
use utils::{test_config, wait_until, with_type, SharedBuffer};

fn bridge(kernel: &Arc<MockKernel>, output: &SharedBuffer) -> Bridge {
    Bridge::new(
        kernel.clone(),
        Arc::new(OutputWriter::new(output.clone())),
        test_config(),
    )
}

#[googletest::test]
#[tokio::test]
async fn full_session_emits_ready_then_outputs() {
    let kernel = Arc::new(MockKernel::new());
    let output = SharedBuffer::default();
    let bridge = bridge(&kernel, &output);
    expect_that!(bridge.state(), eq(LifecycleState::Starting));

    let (mut client, server) = tokio::io::duplex(256);
    let session = tokio::spawn(bridge.run(BufReader::new(server)));

    client
        .write_all(b"{\"id\":\"r1\",\"action\":\"execute\",\"code\":\"6*7\"}\n")
        .await
        .unwrap();
    let idle = || {
        output
            .responses()
            .iter()
            .any(|r| r["type"] == "status" && r["state"] == "idle")
    };
    expect_that!(wait_until(idle).await, eq(true));

    client
        .write_all(b"{\"id\":\"s1\",\"action\":\"shutdown\"}\n")
        .await
        .unwrap();
    expect_that!(session.await.unwrap(), eq(ExitStatus::Graceful));

    let responses = output.responses();
    expect_that!(responses[0], eq(json!({ "type": "ready", "language": "python" })));
    expect_that!(with_type(&responses, "ready"), len(eq(1)));
    expect_that!(with_type(&responses, "stream")[0]["id"], eq("r1"));
    expect_that!(with_type(&responses, "execute_result")[0]["id"], eq("r1"));
    expect_that!(
        kernel.calls(),
        elements_are![
            eq("start"),
            eq("wait_for_ready"),
            eq("language"),
            eq("execute"),
            eq("shutdown")
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn missing_dependency_reports_single_startup_error() {
    let kernel = Arc::new(MockKernel::new().with_start(StartBehavior::MissingDependency));
    let output = SharedBuffer::default();

    let status = bridge(&kernel, &output)
        .run(br#"{"action":"execute","code":"1"}"#.as_slice())
        .await;

    expect_that!(status, eq(ExitStatus::StartupFailed));
    expect_that!(status.code(), eq(1));

    let responses = output.responses();
    expect_that!(responses, len(eq(1)));
    expect_that!(responses[0]["type"], eq("error"));
    expect_that!(responses[0]["ename"], eq("ImportError"));
    expect_that!(responses[0]["traceback"], eq(json!([])));
    expect_that!(responses[0].get("id"), none());
    expect_that!(kernel.executed(), empty());
}

#[googletest::test]
#[tokio::test]
async fn kernel_that_never_becomes_ready_is_torn_down() {
    let kernel = Arc::new(MockKernel::new().with_start(StartBehavior::NeverReady));
    let output = SharedBuffer::default();

    let status = bridge(&kernel, &output).run(&b""[..]).await;

    expect_that!(status, eq(ExitStatus::StartupFailed));
    let responses = output.responses();
    expect_that!(responses, len(eq(1)));
    expect_that!(responses[0]["ename"], eq("KernelTimeout"));
    expect_that!(kernel.calls(), contains(eq("shutdown")));
}

#[googletest::test]
#[tokio::test]
async fn language_falls_back_to_python() {
    let kernel = Arc::new(MockKernel::new().with_language(None));
    let output = SharedBuffer::default();

    let status = bridge(&kernel, &output).run(&b""[..]).await;

    expect_that!(status, eq(ExitStatus::Graceful));
    expect_that!(
        output.responses(),
        elements_are![eq(json!({ "type": "ready", "language": "python" }))]
    );
}

#[googletest::test]
#[tokio::test]
async fn reports_kernel_language() {
    let kernel = Arc::new(MockKernel::new().with_language(Some("julia")));
    let output = SharedBuffer::default();

    bridge(&kernel, &output).run(&b""[..]).await;

    expect_that!(output.responses()[0]["language"], eq("julia"));
}

#[googletest::test]
#[tokio::test]
async fn closed_input_shuts_down_gracefully() {
    let kernel = Arc::new(MockKernel::new());
    let output = SharedBuffer::default();

    let status = bridge(&kernel, &output).run(&b""[..]).await;

    expect_that!(status, eq(ExitStatus::Graceful));
    expect_that!(status.code(), eq(0));
    let calls = kernel.calls();
    expect_that!(calls.last().map(String::as_str), some(eq("shutdown")));
}

#[googletest::test]
#[tokio::test]
async fn external_cancellation_shuts_down_gracefully() {
    let kernel = Arc::new(MockKernel::new());
    let output = SharedBuffer::default();
    let bridge = bridge(&kernel, &output);
    let cancellation = bridge.cancellation_token();

    let (_client, server) = tokio::io::duplex(64);
    let session = tokio::spawn(bridge.run(BufReader::new(server)));
    expect_that!(wait_until(|| !output.responses().is_empty()).await, eq(true));

    cancellation.cancel();
    let status = timeout(Duration::from_secs(2), session).await;

    expect_that!(status, ok(ok(eq(ExitStatus::Graceful))));
    expect_that!(kernel.calls(), contains(eq("shutdown")));
}

#[googletest::test]
#[tokio::test]
async fn cancellation_during_startup_exits_gracefully() {
    let kernel = Arc::new(MockKernel::new().with_start(StartBehavior::NeverReady));
    let output = SharedBuffer::default();
    let bridge = bridge(&kernel, &output);
    bridge.cancellation_token().cancel();

    let status = bridge.run(&b""[..]).await;

    expect_that!(status, eq(ExitStatus::Graceful));
    expect_that!(output.responses(), empty());
    expect_that!(kernel.calls(), contains(eq("shutdown")));
}

#[googletest::test]
#[tokio::test]
async fn nothing_is_emitted_after_run_returns() {
    let kernel = Arc::new(MockKernel::new());
    let output = SharedBuffer::default();

    bridge(&kernel, &output)
        .run(br#"{"id":"r1","action":"execute","code":"late"}"#.as_slice())
        .await;
    let emitted = output.responses().len();

    sleep(Duration::from_millis(50)).await;
    expect_that!(output.responses().len(), eq(emitted));
}

// Stands in for a terminal or pipe whose writer never sends anything.
struct SilentInput;

impl std::io::Read for SilentInput {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            std::thread::park();
        }
    }
}

#[googletest::test]
fn cancelled_session_over_blocking_input_releases_the_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let kernel = Arc::new(MockKernel::new());
    let output = SharedBuffer::default();

    let status = runtime.block_on(async {
        let bridge = bridge(&kernel, &output);
        let cancellation = bridge.cancellation_token();
        let input = detached_reader(SilentInput).unwrap();
        let session = tokio::spawn(bridge.run(input));

        expect_that!(wait_until(|| !output.responses().is_empty()).await, eq(true));
        cancellation.cancel();
        timeout(Duration::from_secs(2), session).await
    });

    let started = std::time::Instant::now();
    drop(runtime);

    expect_that!(status, ok(ok(eq(ExitStatus::Graceful))));
    expect_that!(started.elapsed(), lt(Duration::from_secs(1)));
}
