use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Integrity, decryption and inline starts
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn envelope_round_trip_for_any_plaintext() {
    let key = key();
    let big = vec![0xa5u8; 64 * 1024];
    let cases: [&[u8]; 4] = [b"", b"x", b"\0asm\x01\0\0\0", &big];
    for plaintext in cases {
        let envelope = crypto::seal(plaintext, &key).unwrap();
        assert_eq!(envelope.len(), plaintext.len() + crypto::MIN_ENVELOPE_LEN);
        assert_eq!(crypto::decrypt(&envelope, &key).unwrap(), plaintext);
    }
}

#[test]
fn any_flipped_bit_breaks_the_checksum() {
    let data = b"workload bytes".to_vec();
    let digest = crypto::sha256_hex(&data);
    for byte in 0..data.len() {
        for bit in 0..8 {
            let mut tampered = data.clone();
            tampered[byte] ^= 1 << bit;
            assert!(crypto::verify(&tampered, &digest).is_err(), "byte {byte} bit {bit}");
        }
    }
}

#[test]
fn checksum_is_optional() {
    for data in [&b""[..], &b"anything"[..]] {
        assert_eq!(crypto::verify(data, "").unwrap(), proplet_core::Integrity::Skipped);
        assert_eq!(
            crypto::verify(data, "not-64-hex").unwrap(),
            proplet_core::Integrity::Skipped
        );
    }
}

#[test]
fn short_envelopes_fail_on_length() {
    for len in 0..crypto::MIN_ENVELOPE_LEN {
        let err = crypto::decrypt(&vec![0u8; len], &key()).unwrap_err();
        assert!(matches!(err, proplet_core::CryptoError::TooShort { .. }), "len {len}");
    }
}

/// start {id, name, file, checksum} hands exactly the plaintext to the engine.
#[test]
fn inline_start_runs_plaintext() {
    let result = (|| -> Result<()> {
        let mut h = Harness::new();
        let (envelope, digest) = seal(b"\0asm inline workload")?;
        h.deliver(Topic::Start, &inline_start("t1", &envelope, &digest));

        let started = h.engine.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].task_id, "t1");
        assert_eq!(started[0].binary, b"\0asm inline workload");
        assert_eq!(started[0].inputs, vec![1, 2]);
        // Inline starts are not acknowledged on the registry topic.
        assert!(h.transport.on(Topic::RegistryAck).is_empty());
        Ok(())
    })();
    result.unwrap();
}

#[test]
fn inline_start_without_checksum_still_runs() {
    let mut h = Harness::new();
    let (envelope, _) = seal(b"unchecked").unwrap();
    h.deliver(Topic::Start, &inline_start("t1", &envelope, ""));
    assert_eq!(h.engine.started()[0].binary, b"unchecked");
}

#[test]
fn tampered_inline_workload_never_runs() {
    let mut h = Harness::new();
    let (mut envelope, digest) = seal(b"payload").unwrap();
    let last = envelope.len() - 1;
    envelope[last] ^= 0x80;

    h.deliver(Topic::Start, &inline_start("t1", &envelope, &digest));
    assert!(h.engine.started().is_empty());
    assert!(h.agent.registry().current().is_none());
    assert_eq!(h.transport.count(), 0);
}

#[test]
fn inline_workload_under_wrong_key_never_runs() {
    let mut h = Harness::new();
    let envelope = crypto::seal(b"payload", &WorkloadKey::generate()).unwrap();
    let digest = crypto::sha256_hex(&envelope);

    h.deliver(Topic::Start, &inline_start("t1", &envelope, &digest));
    assert!(h.engine.started().is_empty());
}

#[test]
fn oversized_inline_workload_is_refused() {
    let mut config = config();
    config.workload.max_workload_bytes = 256;
    let mut h = Harness::with_config(config);

    let (envelope, digest) = seal(&[0u8; 512]).unwrap();
    h.deliver(Topic::Start, &inline_start("t1", &envelope, &digest));
    assert!(h.engine.started().is_empty());
    assert!(h.agent.registry().current().is_none());
}

#[test]
fn malformed_start_is_dropped_silently() {
    let mut h = Harness::new();
    h.deliver(Topic::Start, &serde_json::json!({ "name": "no id" }));
    h.deliver(Topic::Start, &serde_json::json!({ "id": "t1" }));
    h.deliver(Topic::Start, &serde_json::json!([1, 2, 3]));

    assert!(h.agent.registry().current().is_none());
    assert_eq!(h.transport.count(), 0);
}

#[test]
fn inputs_are_capped_to_the_configured_limit() {
    let mut h = Harness::new();
    let (envelope, digest) = seal(b"x").unwrap();
    let mut start = inline_start("t1", &envelope, &digest);
    start["inputs"] = (0..40).collect::<Vec<u32>>().into();

    h.deliver(Topic::Start, &start);
    assert_eq!(h.engine.started()[0].inputs.len(), 16);
}
