use proptest::prelude::*;
use serial_rpc::Slip;

fn any_slip() -> impl Strategy<Value = Slip> {
    prop_oneof![
        Just(Slip::STANDARD),
        Just(Slip::READABLE),
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_filter_map("reserved bytes must differ", |(a, b, c, d)| {
                Slip::new(a, b, c, d).ok()
            }),
    ]
}

fn framed(slip: &Slip, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0; slip.encoded_len(payload)];
    let n = slip.encode(payload, &mut buf).unwrap();
    buf.truncate(n);
    buf
}

proptest! {
    #[test]
    fn decode_inverts_encode(
        slip in any_slip(),
        payload in proptest::collection::vec(any::<u8>(), 1..300),
    ) {
        let wire = framed(&slip, &payload);
        let mut out = vec![0; payload.len()];
        let n = slip.decode(&wire, &mut out).unwrap();
        prop_assert_eq!(&out[..n], &payload[..]);
    }

    #[test]
    fn terminator_only_at_the_end(
        slip in any_slip(),
        payload in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let wire = framed(&slip, &payload);
        prop_assert_eq!(wire.last().copied(), Some(slip.end()));
        prop_assert!(!wire[..wire.len() - 1].contains(&slip.end()));
        prop_assert_eq!(wire.len(), slip.encoded_len(&payload));
    }

    #[test]
    fn trailing_bytes_are_ignored(
        payload in proptest::collection::vec(any::<u8>(), 1..64),
        junk in proptest::collection::vec(any::<u8>(), 0..16),
    ) {
        let slip = Slip::STANDARD;
        let mut wire = framed(&slip, &payload);
        wire.extend_from_slice(&junk);
        let mut out = vec![0; 64];
        let n = slip.decode(&wire, &mut out).unwrap();
        prop_assert_eq!(&out[..n], &payload[..]);
    }
}
