use crate::*;
use proplet_services::TaskState;

// ══════════════════════════════════════════════════════════════════════════════
//  Chunked registry transfers
// ══════════════════════════════════════════════════════════════════════════════

/// Three chunks whose concatenation is an envelope of P: exactly one ack,
/// and the engine receives P.
#[test]
fn three_chunk_transfer_acks_once_and_runs() {
    let result = (|| -> Result<()> {
        let mut h = Harness::new();
        h.deliver(Topic::Start, &registry_start("t1"));

        let fetch = h.transport.on(Topic::RegistryFetch);
        assert_eq!(fetch, vec![serde_json::json!({ "app_name": "registry.local/app:1" })]);

        let (envelope, digest) = seal(b"three chunk workload")?;
        let size = envelope.len().div_ceil(3);
        let chunks = chunks(&envelope, size, &digest);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            h.deliver(Topic::RegistryResponse, chunk);
        }

        assert_eq!(
            h.transport.on(Topic::RegistryAck),
            vec![serde_json::json!({ "id": "t1", "status": "downloaded" })]
        );
        let started = h.engine.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].binary, b"three chunk workload");
        assert!(h.agent.reassembler().is_idle());
        Ok(())
    })();
    result.unwrap();
}

#[test]
fn skipping_a_chunk_aborts_the_transfer() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &registry_start("t1"));
    let (envelope, digest) = seal(b"skip me").unwrap();
    let chunks = chunks(&envelope, 10, &digest);

    h.deliver(Topic::RegistryResponse, &chunks[0]);
    assert!(!h.agent.reassembler().is_idle());
    h.deliver(Topic::RegistryResponse, &chunks[2]);
    assert!(h.agent.reassembler().is_idle());

    // The rest of the stream goes nowhere.
    for chunk in &chunks[1..] {
        h.deliver(Topic::RegistryResponse, chunk);
    }
    assert!(h.engine.started().is_empty());
    assert!(h.transport.on(Topic::RegistryAck).is_empty());
}

#[test]
fn restarted_transfer_succeeds_after_abort() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &registry_start("t1"));
    let (envelope, digest) = seal(b"second attempt").unwrap();
    let chunks = chunks(&envelope, 8, &digest);

    h.deliver(Topic::RegistryResponse, &chunks[0]);
    h.deliver(Topic::RegistryResponse, &chunks[0]);
    h.deliver(Topic::RegistryResponse, &chunks[2]);
    for chunk in &chunks {
        h.deliver(Topic::RegistryResponse, chunk);
    }

    assert_eq!(h.engine.started().len(), 1);
    assert_eq!(h.engine.started()[0].binary, b"second attempt");
    assert_eq!(h.transport.on(Topic::RegistryAck).len(), 1);
}

#[test]
fn transfer_over_capacity_fails_at_the_offending_chunk() {
    let mut config = config();
    config.workload.max_workload_bytes = 64;
    let mut h = Harness::with_config(config);
    h.deliver(Topic::Start, &registry_start("t1"));

    let (envelope, digest) = seal(&[7u8; 80]).unwrap();
    let chunks = chunks(&envelope, 32, &digest);
    assert_eq!(chunks.len(), 4);

    h.deliver(Topic::RegistryResponse, &chunks[0]);
    h.deliver(Topic::RegistryResponse, &chunks[1]);
    assert_eq!(h.agent.reassembler().cursor(), Some(64));

    h.deliver(Topic::RegistryResponse, &chunks[2]);
    assert!(h.agent.reassembler().is_idle());
    assert!(h.engine.started().is_empty());
}

#[test]
fn tampered_transfer_is_not_acked_or_run() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &registry_start("t1"));
    let (mut envelope, digest) = seal(b"tamper target").unwrap();
    envelope[20] ^= 0x04;

    for chunk in chunks(&envelope, 16, &digest) {
        h.deliver(Topic::RegistryResponse, &chunk);
    }
    assert!(h.transport.on(Topic::RegistryAck).is_empty());
    assert!(h.engine.started().is_empty());
    assert!(h.agent.reassembler().is_idle());
}

#[test]
fn transfer_with_no_task_is_not_run() {
    let mut h = Harness::new();
    let (envelope, digest) = seal(b"nobody asked").unwrap();
    for chunk in chunks(&envelope, 16, &digest) {
        h.deliver(Topic::RegistryResponse, &chunk);
    }
    assert!(h.engine.started().is_empty());
    assert!(h.transport.on(Topic::RegistryAck).is_empty());
    assert!(h.agent.reassembler().is_idle());
}

/// A binary pushed again while the task runs replaces the run.
#[test]
fn transfer_for_a_running_task_relaunches_it() {
    let result = (|| -> Result<()> {
        let mut h = Harness::new();
        let (envelope, digest) = seal(b"inline first")?;
        h.deliver(Topic::Start, &inline_start("t1", &envelope, &digest));

        let (envelope, digest) = seal(b"pushed by the registry")?;
        for chunk in chunks(&envelope, 10, &digest) {
            h.deliver(Topic::RegistryResponse, &chunk);
        }

        let started = h.engine.started();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].task_id, "t1");
        assert_eq!(started[1].binary, b"pushed by the registry");
        assert_eq!(
            h.transport.on(Topic::RegistryAck),
            vec![serde_json::json!({ "id": "t1", "status": "downloaded" })]
        );
        Ok(())
    })();
    result.unwrap();
}

#[test]
fn failed_launch_is_not_acked() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &registry_start("t1"));
    let (envelope, digest) = seal(b"never launches").unwrap();
    h.engine.refuse_next();

    for chunk in chunks(&envelope, 16, &digest) {
        h.deliver(Topic::RegistryResponse, &chunk);
    }
    assert!(h.engine.started().is_empty());
    assert!(h.transport.on(Topic::RegistryAck).is_empty());
    assert_eq!(
        h.agent.registry().current().map(|t| t.state),
        Some(TaskState::Idle)
    );
}

#[test]
fn stalled_transfer_is_expired_by_heartbeat() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &registry_start("t1"));
    let (envelope, digest) = seal(b"stalls").unwrap();
    let chunks = chunks(&envelope, 8, &digest);
    h.deliver(Topic::RegistryResponse, &chunks[0]);

    let later = std::time::Instant::now() + std::time::Duration::from_secs(301);
    h.agent.heartbeat(later).unwrap();
    assert!(h.agent.reassembler().is_idle());

    h.deliver(Topic::RegistryResponse, &chunks[1]);
    assert!(h.agent.reassembler().is_idle());
}
