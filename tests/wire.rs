//! Wire-format checks against stored byte-for-byte message vectors.

use pretty_assertions::assert_eq;
use stubdns::resource::{Resource, MX};
use stubdns::types::*;
use stubdns::Error;

/// A response for `example.com` with an A answer and an MX answer, both
/// owner names compressed against the question, and the MX exchange
/// compressed inside its RDATA.
const EXAMPLE_RESPONSE: &str = concat!(
    "123481800001000200000000",               // header: id 0x1234, qr rd ra
    "076578616d706c6503636f6d0000010001",     // example.com A IN
    "c00c00010001",                           // -> offset 12, A, IN
    "0000012c",                               // ttl 300
    "0004",                                   // rdlength
    "5db8d822",                               // 93.184.216.34
    "c00c000f0001",                           // -> offset 12, MX, IN
    "00000e10",                               // ttl 3600
    "0009",                                   // rdlength
    "000a",                                   // preference 10
    "046d61696cc00c",                         // mail + pointer to example.com
);

#[test]
fn decodes_compressed_answers() {
    let wire = hex::decode(EXAMPLE_RESPONSE).unwrap();
    let m = Message::from_slice(&wire).unwrap();

    assert_eq!(m.id, 0x1234);
    assert_eq!(m.qr, QR::Response);
    assert!(m.rd);
    assert!(m.ra);
    assert_eq!(m.rcode, Rcode::NoError);

    assert_eq!(m.questions.len(), 1);
    assert_eq!(m.questions[0].name, "example.com");

    assert_eq!(m.answers.len(), 2);
    assert_eq!(m.answers[0].name, "example.com");
    assert_eq!(m.answers[0].ttl, 300);
    assert_eq!(
        m.answers[0].resource,
        Resource::A("93.184.216.34".parse().unwrap())
    );
    assert_eq!(
        m.answers[1].resource,
        Resource::MX(MX {
            preference: 10,
            exchange: "mail.example.com".to_string(),
        })
    );
}

#[test]
fn reencodes_semantically_equal() {
    let wire = hex::decode(EXAMPLE_RESPONSE).unwrap();
    let m = Message::from_slice(&wire).unwrap();

    let again = Message::from_slice(&m.to_vec().unwrap()).unwrap();
    assert_eq!(again, m);
}

#[test]
fn displays_dig_style() {
    let wire = hex::decode(EXAMPLE_RESPONSE).unwrap();
    let m = Message::from_slice(&wire).unwrap();

    let out = m.to_string();
    assert!(out.contains("status: NoError, id: 4660"));
    assert!(out.contains("93.184.216.34"));
    assert!(out.contains("10 mail.example.com"));
}

#[test]
fn rejects_self_pointer() {
    // The question name is a pointer to itself.
    let wire = hex::decode("123401000001000000000000c00c00010001").unwrap();
    assert_eq!(Message::from_slice(&wire), Err(Error::BadName));
}

#[test]
fn rejects_unassigned_label_prefix() {
    // 0x40 length prefix is neither a label nor a pointer.
    let wire = hex::decode("12340100000100000000000040616200010001").unwrap();
    assert_eq!(Message::from_slice(&wire), Err(Error::BadName));
}

#[test]
fn rejects_truncated_message() {
    let wire = hex::decode(EXAMPLE_RESPONSE).unwrap();
    for cut in [4, 11, 13, 20, 30, wire.len() - 1] {
        assert!(
            Message::from_slice(&wire[..cut]).is_err(),
            "cut at {} should fail",
            cut
        );
    }
}
