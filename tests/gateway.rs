//! Request gateway routing and status mapping.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use tiny_http::Method;
use tokio_util::sync::CancellationToken;

use asset_services::asset::{
    signal::PERCENT, Asset, AssetProfile, RegistryBuilder, ServiceDef, Signal,
};
use asset_services::error::OwnerError;
use asset_services::gateway::{Gateway, JSON};
use asset_services::owner::{spawn_owner, AssetState, Reply};
use asset_services::systems::{analog::AnalogTraits, AnalogChannel, Thermometer};

/// Asset whose writes take a second.
struct Sluggish {
    profile: AssetProfile,
    value: f64,
}

impl Asset for Sluggish {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for Sluggish {
    fn read(&self, _service: &str) -> Reply {
        Ok(Signal::new(self.value, PERCENT))
    }

    async fn write(&mut self, _service: &str, signal: Signal) -> Reply {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.value = signal.value;
        Ok(signal)
    }

    fn absorb(&mut self, _signal: Signal) {}
}

fn profile(name: &str, services: Vec<ServiceDef>) -> AssetProfile {
    AssetProfile {
        name: name.into(),
        details: Default::default(),
        services,
        consumed: vec![],
    }
}

fn gateway(token: &CancellationToken) -> Gateway {
    let mut builder = RegistryBuilder::new();

    let traits = AnalogTraits {
        address: "InputValue_1".into(),
        value: 12.0,
        min_value: 0.0,
        max_value: 10_000.0,
    };
    let analog_profile = profile("LevelSensor_1", AnalogChannel::default_services());
    let (handle, _, _) = spawn_owner(
        AnalogChannel::new(analog_profile.clone(), traits, None),
        8,
        token.clone(),
    );
    builder.insert(analog_profile, handle).unwrap();

    let probe_profile = profile("Probe", Thermometer::default_services());
    let (handle, _, _) = spawn_owner(Thermometer::new(probe_profile.clone()), 8, token.clone());
    builder.insert(probe_profile, handle).unwrap();

    let slow_profile = profile(
        "Slow",
        vec![ServiceDef::new("value", "value", PERCENT, "slow writes")],
    );
    let slow = Sluggish {
        profile: slow_profile.clone(),
        value: 1.0,
    };
    let (handle, _, _) = spawn_owner(slow, 8, token.clone());
    builder.insert(slow_profile, handle).unwrap();

    Gateway::new("tank", Arc::new(builder.freeze()), Duration::from_millis(200))
}

fn body(value: f64) -> Vec<u8> {
    serde_json::to_vec(&Signal::new(value, PERCENT)).unwrap()
}

#[tokio::test]
async fn get_returns_signal_json() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);

    let reply = gateway
        .dispatch(&Method::Get, "/tank/LevelSensor_1/access", None, &[])
        .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["value"], 12.0);
    assert_eq!(reply.body["unit"], PERCENT);
    assert_eq!(reply.body["version"], "SignalA_v1.0");
}

#[tokio::test]
async fn system_root_lists_assets() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);

    let reply = gateway.dispatch(&Method::Get, "/tank", None, &[]).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["system"], "tank");
    let names: Vec<&str> = reply.body["assets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["LevelSensor_1", "Probe", "Slow"]);
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);

    for url in [
        "/tank/Pump_9/access",
        "/tank/LevelSensor_1/rotation",
        "/other/LevelSensor_1/access",
        "/tank/LevelSensor_1",
    ] {
        let reply = gateway.dispatch(&Method::Get, url, None, &[]).await;
        assert_eq!(reply.status, 404, "{url}");
    }
}

#[tokio::test]
async fn write_requires_json_media_type() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);
    let url = "/tank/LevelSensor_1/access";

    let reply = gateway.dispatch(&Method::Put, url, Some("text/plain"), &body(3.0)).await;
    assert_eq!(reply.status, 400);

    let reply = gateway.dispatch(&Method::Put, url, None, &body(3.0)).await;
    assert_eq!(reply.status, 400);

    let reply = gateway
        .dispatch(&Method::Put, url, Some(JSON), br#"{"value": "high"}"#)
        .await;
    assert_eq!(reply.status, 400);
}

#[tokio::test]
async fn refused_and_unavailable_map_to_client_and_server_errors() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);

    // input-only channel
    let reply = gateway
        .dispatch(
            &Method::Post,
            "/tank/LevelSensor_1/access",
            Some("application/json; charset=utf-8"),
            &body(40.0),
        )
        .await;
    assert_eq!(reply.status, 400);

    // nothing sampled yet
    let reply = gateway.dispatch(&Method::Get, "/tank/Probe/temperature", None, &[]).await;
    assert_eq!(reply.status, 500);

    let reply = gateway
        .dispatch(&Method::Delete, "/tank/LevelSensor_1/access", None, &[])
        .await;
    assert_eq!(reply.status, 405);
}

#[tokio::test(start_paused = true)]
async fn slow_owner_times_out_with_504_and_keeps_serving() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);

    let reply = gateway
        .dispatch(&Method::Put, "/tank/Slow/value", Some(JSON), &body(9.0))
        .await;
    assert_eq!(reply.status, 504);

    // the owner finishes the abandoned write, then answers again
    tokio::time::sleep(Duration::from_secs(2)).await;
    let reply = gateway.dispatch(&Method::Get, "/tank/Slow/value", None, &[]).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["value"], 9.0);
}

#[tokio::test]
async fn owner_gone_is_500() {
    let token = CancellationToken::new();
    let gateway = gateway(&token);
    token.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = gateway
        .dispatch(&Method::Get, "/tank/LevelSensor_1/access", None, &[])
        .await;
    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, json!({ "error": OwnerError::Closed.to_string() }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_over_http() {
    let token = CancellationToken::new();
    let gateway = Arc::new(gateway(&token));

    let (addr, accept) = gateway
        .serve("127.0.0.1:0", tokio::runtime::Handle::current(), token.clone())
        .unwrap();
    let addr = addr.expect("ip listener");
    let client = reqwest::Client::new();

    let signal: Signal = client
        .get(format!("http://{addr}/tank/LevelSensor_1/access"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(signal.value, 12.0);

    let response = client
        .put(format!("http://{addr}/tank/Slow/value"))
        .header("Content-Type", "text/plain")
        .body("5")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    token.cancel();
    tokio::task::spawn_blocking(move || accept.join().unwrap())
        .await
        .unwrap();
}
