#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use cascade_node::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
servers:
  - host: "10.0.0.1"
    prot: 8440 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.node.listen, "0.0.0.0:8450");
    assert_eq!(cfg.node.local_api, "http://127.0.0.1:8440");
    assert!(cfg.servers.is_empty());
    assert_eq!(cfg.reconnect.interval(), Duration::from_secs(5));
    assert_eq!(cfg.rpc.timeout(), Duration::from_secs(10));
    assert_eq!(cfg.relay.health_interval(), Duration::from_secs(15));
}

#[test]
fn full_config_and_register_urls() {
    let ok = r#"
version: 1
node:
  listen: "127.0.0.1:9450"
cinfo:
  cid: "edge-01"
  name: "Edge 01"
  serial: "SN-01"
servers:
  - protocol: https
    host: "up.example.com"
    port: 443
    conextpath: "/media"
  - protocol: http
    host: "10.0.0.2"
    port: 8450
reconnect:
  interval_ms: 2000
  jitter_ms: 500
push:
  live/cam1: "ws://10.0.0.2:8450/erwscascade/wspush/on"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.cinfo.cid, "edge-01");
    assert_eq!(
        cfg.servers[0].register_url("edge-01").unwrap().as_str(),
        "wss://up.example.com/media/erwscascade/wsocket/register?cid=edge-01"
    );
    assert_eq!(
        cfg.servers[1].register_url("edge-01").unwrap().as_str(),
        "ws://10.0.0.2:8450/erwscascade/wsocket/register?cid=edge-01"
    );
    assert_eq!(cfg.reconnect.jitter(), Duration::from_millis(500));
    assert_eq!(cfg.push.len(), 1);
}

#[test]
fn range_checks() {
    for bad in [
        "version: 2\n",
        "version: 1\nrpc:\n  timeout_ms: 5\n",
        "version: 1\nreconnect:\n  interval_ms: 1000\n  jitter_ms: 2000\n",
        "version: 1\nnode:\n  listen: \"nowhere\"\n",
        "version: 1\nservers:\n  - protocol: ftp\n",
        "version: 1\npush:\n  live/a: \"http://up/x\"\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}
