//! 远程链路端到端测试（Mock 消息总线）

use crossbeam_channel::{Receiver, Sender, unbounded};
use neopia_sdk::driver::{BusConnection, BusConnector, LinkError};
use neopia_sdk::prelude::*;
use neopia_sdk::tools::{LinkConfig, SchedulerConfig};
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Bus {
    inbound: Receiver<String>,
    outbound: Sender<String>,
}

struct BusConn {
    inbound: Receiver<String>,
    outbound: Sender<String>,
}

impl BusConnection for BusConn {
    fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| LinkError::Closed)
    }

    fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        match self.inbound.recv_timeout(Duration::from_millis(2)) {
            Ok(text) => Ok(Some(text)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn close(&mut self) {}
}

impl BusConnector for Bus {
    fn connect(
        &self,
        _url: &str,
        _read_timeout: Duration,
    ) -> Result<Box<dyn BusConnection>, LinkError> {
        Ok(Box::new(BusConn {
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
        }))
    }
}

#[test]
fn test_linked_robot_exchanges_json() {
    let (to_host, inbound) = unbounded();
    let (outbound, from_host) = unbounded();
    let linker = Linker::with_connector(
        LinkConfig {
            send_interval_ms: 5,
            read_timeout_ms: 2,
            ..LinkConfig::default()
        },
        Arc::new(Bus { inbound, outbound }),
    );

    let scheduler = Scheduler::new(SchedulerConfig {
        cycle_ms: 5,
        poll_ms: 2,
    });
    let robot = neopia_sdk::linked_neosoco(&scheduler, 0, &linker).unwrap();
    assert!(!scheduler.readiness().is_ready());

    to_host
        .send(
            json!({
                "module": "hamster",
                "index": 0,
                "connectionState": 2,
                "leftProximity": 33,
                "tiltId": 1,
                "tilt": 3,
            })
            .to_string(),
        )
        .unwrap();
    scheduler.wait_until_ready().unwrap();
    let r = robot.clone();
    scheduler
        .wait_until(move || r.read(neosoco::LEFT_PROXIMITY) == Value::Integer(33))
        .unwrap();
    assert_eq!(robot.neobots()[0].connection_state(), ConnectionState::Connected);

    robot.write(neosoco::RIGHT_MOTOR, 15).unwrap();
    robot.write(neosoco::NOTE, 40).unwrap();

    let seen = Arc::new(Mutex::new(None::<JsonValue>));
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let Ok(text) = from_host.recv_timeout(Duration::from_millis(10)) else {
            continue;
        };
        let packet: JsonValue = serde_json::from_str(&text).unwrap();
        if packet["hamster0"]["noteId"] == json!(1) {
            *seen.lock() = Some(packet);
            break;
        }
    }
    let packet = seen.lock().take().expect("motoring with note change id");
    assert_eq!(packet["hamster0"]["rightWheel"], json!(15));
    assert_eq!(packet["hamster0"]["note"], json!(40));

    scheduler.shutdown();
    assert_eq!(linker.link_count(), 0);
    linker.stop();
}
