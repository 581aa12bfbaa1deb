use mx_net::{Endpoint, NetworkAddress};

#[test]
fn full_grammar_combinations_parse_as_expected() {
    let cases = [
        ("theta.position", Endpoint::Tcp { host: "localhost".to_string(), port: 9727 }, "theta", "position"),
        ("scaler1:absorbed_dose.value", Endpoint::Tcp { host: "scaler1".to_string(), port: 9727 }, "absorbed_dose", "value"),
        (
            "scaler1@9800:absorbed_dose.value",
            Endpoint::Tcp { host: "scaler1".to_string(), port: 9800 },
            "absorbed_dose",
            "value",
        ),
        (
            "scaler1@/var/run/mx.sock:absorbed_dose.value",
            Endpoint::Unix { path: "/var/run/mx.sock".to_string() },
            "absorbed_dose",
            "value",
        ),
    ];

    for (text, endpoint, record, field) in cases {
        let parsed = NetworkAddress::parse(text).unwrap_or_else(|e| panic!("{text}: {e}"));
        assert_eq!(parsed.endpoint, endpoint, "endpoint mismatch for {text}");
        assert_eq!(parsed.record, record);
        assert_eq!(parsed.field, field);
    }
}

#[test]
fn rejects_addresses_without_a_record_field_separator() {
    for bad in ["scaler1:absorbed_dose", "", "scaler1@9800:"] {
        assert!(NetworkAddress::parse(bad).is_err(), "expected {bad:?} to be rejected");
    }
}
