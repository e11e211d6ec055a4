#![allow(dead_code)]

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use jupyter_bridge_relay::BridgeConfig;
use serde_json::Value;
use tokio::time::{sleep, Instant};

/// In-memory outbound stream shared with the writer under test.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    pub fn responses(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        ready_timeout: Duration::from_millis(200),
        restart_timeout: Duration::from_millis(200),
        kernel_info_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        teardown_timeout: Duration::from_secs(1),
        correlation_capacity: None,
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn with_type<'a>(responses: &'a [Value], kind: &str) -> Vec<&'a Value> {
    responses
        .iter()
        .filter(|response| response["type"] == kind)
        .collect()
}
